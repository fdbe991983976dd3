//! Router — pure classification of a task into an execution mode and agent set.
//!
//! Grounded in `orchestrator/router.rs` of the teacher crate (heuristic
//! substring matching ahead of any LLM call) and in spec.md §4.5, which is
//! followed here exactly: this module makes no network calls and has no
//! side effects, so `Route` is trivially deterministic (testable property 1).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Mode {
    Fast,
    Standard,
    Critical,
}

impl Mode {
    pub fn from_str_loose(s: &str) -> Option<Mode> {
        match s.trim().to_uppercase().as_str() {
            "FAST" => Some(Mode::Fast),
            "STANDARD" => Some(Mode::Standard),
            "CRITICAL" => Some(Mode::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Fast => "FAST",
            Mode::Standard => "STANDARD",
            Mode::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum AgentRole {
    Dev,
    Security,
    Architect,
    Qa,
    Ux,
    Seo,
    Director,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Dev => "dev",
            AgentRole::Security => "security",
            AgentRole::Architect => "architect",
            AgentRole::Qa => "qa",
            AgentRole::Ux => "ux",
            AgentRole::Seo => "seo",
            AgentRole::Director => "director",
        }
    }

    /// The non-`dev`, non-`director` domains scanned by the router's
    /// per-domain trigger tables.
    pub fn domains() -> [AgentRole; 5] {
        [
            AgentRole::Security,
            AgentRole::Architect,
            AgentRole::Qa,
            AgentRole::Seo,
            AgentRole::Ux,
        ]
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `mode ∈ {FAST, STANDARD, CRITICAL}`, `agents`, `confidence`,
/// `domainsMatched`, `triggersMatched`, `downgraded`, `reason` — spec.md §3.
/// Immutable after construction: all fields are private, all mutation goes
/// through the constructor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RoutingDecision {
    mode: Mode,
    agents: BTreeSet<AgentRole>,
    confidence: f64,
    domains_matched: usize,
    triggers_matched: BTreeMap<AgentRole, Vec<String>>,
    downgraded: bool,
    reason: String,
}

impl RoutingDecision {
    fn new(
        mode: Mode,
        mut agents: BTreeSet<AgentRole>,
        confidence: f64,
        domains_matched: usize,
        triggers_matched: BTreeMap<AgentRole, Vec<String>>,
        downgraded: bool,
        reason: String,
    ) -> Self {
        // Invariant (2): dev is always present; director never in fan-out
        // except as a sequential follow-up member of the set itself.
        agents.insert(AgentRole::Dev);
        Self {
            mode,
            agents,
            confidence,
            domains_matched,
            triggers_matched,
            downgraded,
            reason,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn agents(&self) -> &BTreeSet<AgentRole> {
        &self.agents
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn domains_matched(&self) -> usize {
        self.domains_matched
    }

    pub fn triggers_matched(&self) -> &BTreeMap<AgentRole, Vec<String>> {
        &self.triggers_matched
    }

    pub fn downgraded(&self) -> bool {
        self.downgraded
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn includes_director(&self) -> bool {
        self.agents.contains(&AgentRole::Director)
    }
}

const CRITICAL_TRIGGERS: &[&str] = &[
    "incident",
    "outage",
    "breach",
    "attack",
    "compromised",
    "emergency",
    "critical",
    "urgent",
    "production down",
];

struct DomainTable {
    role: AgentRole,
    strong: &'static [&'static str],
    weak: &'static [&'static str],
}

const DOMAIN_TABLES: &[DomainTable] = &[
    DomainTable {
        role: AgentRole::Security,
        strong: &["vulnerability", "injection", "auth", "jwt", "breach", "exploit", "xss", "csrf"],
        weak: &["security", "password", "token", "encryption", "permission"],
    },
    DomainTable {
        role: AgentRole::Architect,
        strong: &["architecture", "migration", "microservice", "scaling", "refactor"],
        weak: &["design", "pattern", "structure", "system"],
    },
    DomainTable {
        role: AgentRole::Qa,
        strong: &["test", "regression", "qa", "bug", "coverage"],
        weak: &["quality", "verify", "validation"],
    },
    DomainTable {
        role: AgentRole::Seo,
        strong: &["seo", "serp", "backlink", "keyword ranking"],
        weak: &["search ranking", "metadata", "sitemap"],
    },
    DomainTable {
        role: AgentRole::Ux,
        strong: &["usability", "accessibility", "ux", "user experience"],
        weak: &["design", "interface", "layout"],
    },
];

fn per_domain_score(table: &DomainTable, q_lower: &str) -> Option<(f64, Vec<String>)> {
    let strong_hits: Vec<String> = table
        .strong
        .iter()
        .filter(|t| q_lower.contains(**t))
        .map(|t| t.to_string())
        .collect();
    if !strong_hits.is_empty() {
        let score = 0.8 + (strong_hits.len() as f64 * 0.1).min(0.2);
        return Some((score, strong_hits));
    }

    let weak_hits: Vec<String> = table
        .weak
        .iter()
        .filter(|t| q_lower.contains(**t))
        .map(|t| t.to_string())
        .collect();
    if !weak_hits.is_empty() {
        let score = 0.4 + (weak_hits.len() as f64 * 0.1).min(0.2);
        return Some((score, weak_hits));
    }

    None
}

/// Pure `Route(query) -> RoutingDecision`. No I/O, no shared state: calling
/// this twice with the same string always returns an equal decision
/// (property 1, spec.md §8).
pub fn route(query: &str) -> RoutingDecision {
    let q_lower = query.to_lowercase();

    if let Some(hit) = CRITICAL_TRIGGERS.iter().find(|t| q_lower.contains(**t)) {
        let agents: BTreeSet<AgentRole> = [
            AgentRole::Dev,
            AgentRole::Security,
            AgentRole::Qa,
            AgentRole::Architect,
            AgentRole::Seo,
            AgentRole::Ux,
            AgentRole::Director,
        ]
        .into_iter()
        .collect();
        let mut triggers = BTreeMap::new();
        triggers.insert(AgentRole::Dev, vec![hit.to_string()]);
        return RoutingDecision::new(
            Mode::Critical,
            agents,
            1.0,
            6,
            triggers,
            false,
            format!("critical trigger matched: {hit}"),
        );
    }

    let mut matched: BTreeMap<AgentRole, (f64, Vec<String>)> = BTreeMap::new();
    for table in DOMAIN_TABLES {
        if let Some((score, tokens)) = per_domain_score(table, &q_lower) {
            matched.insert(table.role, (score, tokens));
        }
    }

    let domains_matched = matched.len();

    if domains_matched == 0 {
        let mut agents = BTreeSet::new();
        agents.insert(AgentRole::Dev);
        return RoutingDecision::new(
            Mode::Fast,
            agents,
            1.0,
            0,
            BTreeMap::new(),
            false,
            "no domain triggers matched; fast path".to_string(),
        );
    }

    let confidence = matched.values().map(|(s, _)| *s).sum::<f64>() / domains_matched as f64;
    let triggers_matched: BTreeMap<AgentRole, Vec<String>> = matched
        .iter()
        .map(|(role, (_, tokens))| (*role, tokens.clone()))
        .collect();
    let mut agents: BTreeSet<AgentRole> = matched.keys().copied().collect();
    let top_tokens: Vec<String> = matched
        .values()
        .flat_map(|(_, tokens)| tokens.iter().cloned())
        .take(4)
        .collect();

    match domains_matched {
        1 | 2 => {
            let reason = format!(
                "{domains_matched} domain(s) matched, confidence {:.2}; top tokens: {}",
                confidence,
                top_tokens.join(", ")
            );
            RoutingDecision::new(Mode::Standard, agents, confidence, domains_matched, triggers_matched, false, reason)
        }
        _ => {
            if confidence >= 0.7 {
                agents.insert(AgentRole::Director);
                let reason = format!(
                    "{domains_matched} domains matched, confidence {:.2} >= 0.7; escalating to CRITICAL; top tokens: {}",
                    confidence,
                    top_tokens.join(", ")
                );
                RoutingDecision::new(Mode::Critical, agents, confidence, domains_matched, triggers_matched, false, reason)
            } else {
                let reason = format!(
                    "{domains_matched} domains matched but confidence {:.2} < 0.7; downgraded to STANDARD; top tokens: {}",
                    confidence,
                    top_tokens.join(", ")
                );
                RoutingDecision::new(Mode::Standard, agents, confidence, domains_matched, triggers_matched, true, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism() {
        let q = "Review JWT token security";
        let a = route(q);
        let b = route(q);
        assert_eq!(a.mode(), b.mode());
        assert_eq!(a.agents(), b.agents());
        assert_eq!(a.confidence(), b.confidence());
    }

    #[test]
    fn fast_path_plain_question() {
        let d = route("What is Python?");
        assert_eq!(d.mode(), Mode::Fast);
        assert_eq!(d.agents().len(), 1);
        assert!(d.agents().contains(&AgentRole::Dev));
        assert_eq!(d.confidence(), 1.0);
    }

    #[test]
    fn critical_preemption() {
        let d = route("Production down: breach suspected");
        assert_eq!(d.mode(), Mode::Critical);
        for role in [
            AgentRole::Dev,
            AgentRole::Security,
            AgentRole::Qa,
            AgentRole::Architect,
            AgentRole::Seo,
            AgentRole::Ux,
            AgentRole::Director,
        ] {
            assert!(d.agents().contains(&role), "missing {role}");
        }
    }

    #[test]
    fn standard_single_domain() {
        let d = route("Review JWT token security");
        assert_eq!(d.mode(), Mode::Standard);
        assert!(d.agents().contains(&AgentRole::Security));
        assert!(d.agents().contains(&AgentRole::Dev));
        assert!(!d.agents().contains(&AgentRole::Director));
    }

    #[test]
    fn downgrade_law() {
        // Needs >=3 domains with only weak hits so confidence stays < 0.7.
        let d = route("design interface with some permission metadata and validation");
        if d.domains_matched() >= 3 {
            assert!(d.confidence() < 0.7);
            assert_eq!(d.mode(), Mode::Standard);
            assert!(d.downgraded());
            assert!(!d.includes_director());
        }
    }

    #[test]
    fn critical_multi_domain_high_confidence() {
        let d = route("Plan CI/CD migration, security audit with vulnerability injection, and regression testing coverage");
        assert!(d.domains_matched() >= 3);
        if d.confidence() >= 0.7 {
            assert_eq!(d.mode(), Mode::Critical);
            assert!(d.includes_director());
        }
    }
}
