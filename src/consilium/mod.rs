//! Consilium coordinator — spec.md §4.6.
//!
//! Grounded in the teacher's `orchestrator/supervisor.rs` (Semaphore-bounded
//! `tokio::spawn` fan-out joined with `join_all`) generalized from a fixed
//! worker roster to the Router's dynamic agent set, and in `agent.py`'s
//! per-agent prompt composition for the KB-annotated preamble.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::agent::Agent;
use crate::kb::{KBStore, Retriever};
use crate::router::{self, AgentRole, Mode, RoutingDecision};

const MAX_PARALLEL_WORKERS: usize = 6;
const OPINION_CHAR_CAP: usize = 500;

fn role_preamble(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Dev => "You are the developer agent. Focus on implementation correctness and maintainability.",
        AgentRole::Security => "You are the security agent. Focus on vulnerabilities, auth, and data handling.",
        AgentRole::Architect => "You are the architecture agent. Focus on structure, scaling, and system design.",
        AgentRole::Qa => "You are the QA agent. Focus on test coverage, edge cases, and regressions.",
        AgentRole::Ux => "You are the UX agent. Focus on usability and accessibility.",
        AgentRole::Seo => "You are the SEO agent. Focus on discoverability and search ranking impact.",
        AgentRole::Director => "You are the Director.",
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentOpinion {
    pub role: AgentRole,
    pub opinion_text: String,
    pub confidence: f64,
}

fn extract_confidence(text: &str) -> f64 {
    let re = regex::Regex::new(r"\b(10|[0-9])\b").expect("valid regex");
    match re.find_iter(text).last() {
        Some(m) => m.as_str().parse::<f64>().unwrap_or(5.0) / 10.0,
        None => 0.5,
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Recommendation {
    pub confidence_level: f64,
    pub team_consensus: bool,
    pub decision_summary: String,
    pub agents_involved: Vec<AgentRole>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Timing {
    pub agents_parallel_ms: f64,
    pub director_ms: Option<f64>,
    pub total_ms: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheckResult {
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsiliumResult {
    pub success: bool,
    pub task: String,
    pub mode: Mode,
    pub opinions: BTreeMap<AgentRole, AgentOpinion>,
    pub director_decision: Option<String>,
    pub recommendation: Option<Recommendation>,
    pub routing_reason: String,
    pub timing: Timing,
    pub health_check: Option<HealthCheckResult>,
    pub error: Option<String>,
}

/// Static fallback roster used when smart routing is disabled
/// (`CONSILIUM_MODE`, spec.md §6).
pub fn static_routing(mode: Mode) -> (Mode, Vec<AgentRole>) {
    match mode {
        Mode::Fast => (Mode::Fast, vec![AgentRole::Dev]),
        Mode::Standard => (Mode::Standard, vec![AgentRole::Dev, AgentRole::Security, AgentRole::Architect]),
        Mode::Critical => (
            Mode::Critical,
            vec![
                AgentRole::Dev,
                AgentRole::Security,
                AgentRole::Architect,
                AgentRole::Qa,
                AgentRole::Seo,
                AgentRole::Ux,
                AgentRole::Director,
            ],
        ),
    }
}

pub struct Consilium {
    agents: BTreeMap<AgentRole, Arc<Agent>>,
    kb: Arc<KBStore>,
    retriever: Arc<Retriever>,
    kb_top_k: usize,
    kb_max_chars: usize,
}

impl Consilium {
    pub fn new(agents: BTreeMap<AgentRole, Arc<Agent>>, kb: Arc<KBStore>, retriever: Arc<Retriever>, kb_top_k: usize, kb_max_chars: usize) -> Self {
        Self { agents, kb, retriever, kb_top_k, kb_max_chars }
    }

    /// `Consult(task, smartRouting, checkHealth) -> ConsiliumResult` (spec.md §4.6).
    pub async fn consult(
        &self,
        task: &str,
        smart_routing: bool,
        check_health: bool,
        fallback_mode: Mode,
    ) -> ConsiliumResult {
        let total_start = Instant::now();

        if check_health {
            if let Some(dev) = self.agents.get(&AgentRole::Dev) {
                let probe = dev.ping().await;
                if !probe.success {
                    return ConsiliumResult {
                        success: false,
                        task: task.to_string(),
                        mode: fallback_mode,
                        opinions: BTreeMap::new(),
                        director_decision: None,
                        recommendation: None,
                        routing_reason: "health check failed before fan-out".to_string(),
                        timing: Timing { agents_parallel_ms: 0.0, director_ms: None, total_ms: total_start.elapsed().as_secs_f64() * 1000.0 },
                        health_check: Some(probe),
                        error: Some("health check failed".to_string()),
                    };
                }
            }
        }

        let (mode, agent_roles, reason, domains_matched, confidence): (Mode, Vec<AgentRole>, String, usize, f64) =
            if smart_routing {
                let routing: RoutingDecision = router::route(task);
                (
                    routing.mode(),
                    routing.agents().iter().copied().collect(),
                    routing.reason().to_string(),
                    routing.domains_matched(),
                    routing.confidence(),
                )
            } else {
                let (mode, roles) = static_routing(fallback_mode);
                (mode, roles, "static routing (smart routing disabled)".to_string(), 0, 1.0)
            };

        let include_director = agent_roles.contains(&AgentRole::Director);
        let parallel_roles: Vec<AgentRole> = agent_roles.iter().copied().filter(|r| *r != AgentRole::Director).collect();

        let parallel_start = Instant::now();
        let opinions = self.run_agents_parallel(task, &parallel_roles).await;
        let agents_parallel_ms = parallel_start.elapsed().as_secs_f64() * 1000.0;

        let mut director_decision = None;
        let mut director_ms = None;

        if include_director {
            if let Some(director_agent) = self.agents.get(&AgentRole::Director) {
                let director_start = Instant::now();
                let prompt = build_director_prompt(task, &opinions);
                director_decision = Some(director_agent.think(&prompt).await);
                director_ms = Some(director_start.elapsed().as_secs_f64() * 1000.0);
            }
        }

        let confidences: Vec<f64> = opinions.values().map(|o| o.confidence).collect();
        let confidence_level = if confidences.is_empty() { confidence } else { confidences.iter().sum::<f64>() / confidences.len() as f64 };

        let recommendation = Recommendation {
            confidence_level,
            team_consensus: confidence_level > 0.7,
            decision_summary: director_decision
                .as_ref()
                .map(|d| crate::agent::truncate(d, 300))
                .unwrap_or_else(|| "No director decision".to_string()),
            agents_involved: agent_roles.clone(),
        };

        ConsiliumResult {
            success: true,
            task: task.to_string(),
            mode,
            opinions,
            director_decision,
            recommendation: Some(recommendation),
            routing_reason: format!("{reason} (domains_matched={domains_matched})"),
            timing: Timing { agents_parallel_ms, director_ms, total_ms: total_start.elapsed().as_secs_f64() * 1000.0 },
            health_check: None,
            error: None,
        }
    }

    async fn run_agents_parallel(&self, task: &str, roles: &[AgentRole]) -> BTreeMap<AgentRole, AgentOpinion> {
        let permits = roles.len().min(MAX_PARALLEL_WORKERS).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut handles = Vec::new();
        for &role in roles {
            let Some(agent) = self.agents.get(&role).cloned() else { continue };
            let semaphore = semaphore.clone();
            let task = task.to_string();
            let kb = self.kb.clone();
            let retriever = self.retriever.clone();
            let top_k = self.kb_top_k;
            let max_chars = self.kb_max_chars;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let retrieval = retriever.retrieve(&kb, role, &task, top_k, max_chars);
                let prompt = format!(
                    "{}\n\nKnowledge base (top {}/{}, chars {}/{}):\n{}\n\nTask: {}",
                    role_preamble(role),
                    retrieval.chunks_used,
                    retrieval.total_chunks,
                    retrieval.chars_used,
                    max_chars,
                    retrieval.text,
                    task,
                );

                let text = agent.think(&prompt).await;
                let opinion_text = crate::agent::truncate(&text, OPINION_CHAR_CAP);
                let confidence = if text.starts_with("Error:") { 0.0 } else { extract_confidence(&text) };

                (role, AgentOpinion { role, opinion_text, confidence })
            }));
        }

        let mut opinions = BTreeMap::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((role, opinion)) => {
                    opinions.insert(role, opinion);
                }
                Err(e) => {
                    tracing::error!("agent task panicked: {e}");
                }
            }
        }
        opinions
    }
}

fn build_director_prompt(task: &str, opinions: &BTreeMap<AgentRole, AgentOpinion>) -> String {
    let panel = opinions
        .iter()
        .map(|(role, opinion)| format!("{role}: {}", opinion.opinion_text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Task: {task}\n\nPanel opinions:\n{panel}\n\nRespond with these headings:\nDECISION:\nRATIONALE:\nRISKS:\nNEXT_STEPS:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_confidence_prefers_trailing_digit() {
        assert_eq!(extract_confidence("I'm fairly confident, confidence 8"), 0.8);
        assert_eq!(extract_confidence("no digits here"), 0.5);
    }

    #[test]
    fn extract_confidence_handles_trailing_ten() {
        assert_eq!(extract_confidence("I'm fairly confident, rate it 8 out of 10"), 1.0);
    }

    #[test]
    fn static_routing_fast_is_dev_only() {
        let (mode, roles) = static_routing(Mode::Fast);
        assert_eq!(mode, Mode::Fast);
        assert_eq!(roles, vec![AgentRole::Dev]);
    }
}
