//! Director Adapter and Active Director — spec.md §4.7, §4.8.
//!
//! Grounded in `director_adapter.py::DirectorAdapter` (sanitization regexes,
//! JSON-object response, fallback decision on error) and
//! `shadow_director.py` (risk-level determination, capsule compaction). The
//! circuit-breaker half of Active Director lives in [`circuit`].

pub mod circuit;

use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::llm::{ChatMessage, LlmClient};
use crate::router::RoutingDecision;
use circuit::{DirectorCircuitBreaker, DirectorContext, DirectorMode};

const PREFILTER_CONF_LT: f64 = 0.75;
const LOW_CONF_LT: f64 = 0.70;
const DIFF_GTE: f64 = 0.10;
const MULTI_DOMAIN_GTE: usize = 3;

const HIGH_RISK_KEYWORDS: &[&str] =
    &["auth", "token", "password", "payment", "migration", "vulnerability", "security"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Determine `riskLevel` (spec.md §4.8 Step A).
pub fn determine_risk_level(task: &str, opinions_include_security: bool, confidence: f64, domains_matched: usize) -> RiskLevel {
    let task_lower = task.to_lowercase();
    let has_high_risk_keyword = HIGH_RISK_KEYWORDS.iter().any(|kw| task_lower.contains(kw));

    if opinions_include_security || has_high_risk_keyword {
        RiskLevel::High
    } else if confidence < 0.70 || domains_matched >= MULTI_DOMAIN_GTE {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PreFilterResult {
    pub passed: bool,
    pub reason_tokens: Vec<String>,
}

/// Cheap gate: Director is *not* called iff all three hold (spec.md §4.8 Step B).
pub fn pre_filter(risk_level: RiskLevel, confidence: f64, domains_matched: usize) -> PreFilterResult {
    let skip_director = risk_level != RiskLevel::High && confidence >= PREFILTER_CONF_LT && domains_matched < MULTI_DOMAIN_GTE;

    let mut reason_tokens = Vec::new();
    if skip_director {
        // Property 11 / Scenario S1: calm_task plus the exact risk/conf/domains tokens.
        reason_tokens.push("calm_task".to_string());
        reason_tokens.push(format!("risk={}", risk_level.as_str()));
        reason_tokens.push(format!("conf={confidence:.2}"));
        reason_tokens.push(format!("domains={domains_matched}"));
    } else {
        if risk_level == RiskLevel::High {
            reason_tokens.push("high_risk".to_string());
        }
        if confidence < PREFILTER_CONF_LT {
            reason_tokens.push(format!("conf<0.75({confidence:.2})"));
        }
        if domains_matched >= MULTI_DOMAIN_GTE {
            reason_tokens.push(format!("multi_domain({domains_matched})"));
        }
    }

    PreFilterResult { passed: !skip_director, reason_tokens }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DecisionCapsule {
    pub problem_summary: String,
    pub facts: Vec<String>,
    pub agent_summaries: std::collections::BTreeMap<String, String>,
    pub risk_level: RiskLevel,
    pub confidence: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DirectorDecision {
    pub decision: String,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
    pub next_step: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default = "default_decision_class")]
    pub decision_class: String,
}

fn default_decision_class() -> String {
    "unknown".to_string()
}

fn sanitize(data: &str) -> String {
    let patterns: &[&str] = &[
        r#"(?i)api[_-]?key["\s]*[:=]["\s]*[a-zA-Z0-9_-]+"#,
        r#"(?i)token["\s]*[:=]["\s]*[a-zA-Z0-9_.-]+"#,
        r#"(?i)password["\s]*[:=]["\s]*[^\s"]+"#,
        r#"(?i)secret["\s]*[:=]["\s]*[^\s"]+"#,
        r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
        r"\b\d{3}-\d{2}-\d{4}\b",
    ];

    let mut out = data.to_string();
    for pattern in patterns {
        let re = Regex::new(pattern).expect("valid sanitization regex");
        out = re.replace_all(&out, "[REDACTED]").to_string();
    }
    out
}

fn normalize_code(text: &str) -> String {
    let fenced = Regex::new(r"(?s)```.*?```").expect("valid regex");
    let inline = Regex::new(r"`[^`]+`").expect("valid regex");
    let path = Regex::new(r"(?:/|\b\w+/)[\w./-]+\.\w+").expect("valid regex");

    let step1 = fenced.replace_all(text, "[code]").to_string();
    let step2 = inline.replace_all(&step1, "[ref]").to_string();
    path.replace_all(&step2, "[file]").to_string()
}

fn extract_recommendation_sentence(text: &str) -> String {
    let marker = Regex::new(r"(?i)[^.]*\b(recommend|suggest|should|must|need to)\b[^.]*\.").expect("valid regex");
    marker
        .find(text)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| crate::agent::truncate(text, 80))
}

/// Builds the bounded `DecisionCapsule` from routing + per-agent opinions
/// (spec.md §4.7 "Capsule compaction").
pub fn build_capsule(
    task: &str,
    routing: &RoutingDecision,
    opinions: &std::collections::BTreeMap<String, String>,
    confidence: f64,
    risk_level: RiskLevel,
) -> DecisionCapsule {
    let task_head: String = task.chars().take(150).collect();
    let problem_summary = format!("{task_head} [conf:{confidence:.2}, domains:{}]", routing.domains_matched());

    let mut facts = vec![
        format!("mode={}", routing.mode()),
        format!("domains_matched={}", routing.domains_matched()),
        format!("agents={}", routing.agents().len()),
    ];
    if routing.downgraded() {
        facts.push("routing_downgraded=true".to_string());
    }
    facts.truncate(8);

    let mut agent_summaries = std::collections::BTreeMap::new();
    for (role, text) in opinions {
        let normalized = normalize_code(text);
        let sentence = extract_recommendation_sentence(&normalized);
        let cap = if role == "security" { 120 } else { 80 };
        agent_summaries.insert(role.clone(), crate::agent::truncate(&sentence, cap));
    }

    DecisionCapsule {
        problem_summary: crate::agent::truncate(&problem_summary, 300),
        facts,
        agent_summaries,
        risk_level,
        confidence,
    }
}

fn capsule_prompt(capsule: &DecisionCapsule) -> String {
    let facts = capsule.facts.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n");
    let summaries = capsule
        .agent_summaries
        .iter()
        .map(|(role, s)| format!("{role}: {s}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "TASK SUMMARY:\n{}\n\nFACTS:\n{facts}\n\nAGENT SUMMARIES:\n{summaries}\n\nRISK LEVEL: {}\nCONFIDENCE: {:.2}\n\n\
         Respond ONLY with a JSON object: {{\"decision\": string <=200 chars, \"risks\": [string], \
         \"recommendations\": [string], \"next_step\": string <=100 chars, \"confidence\": number, \"reasoning\": string}}",
        capsule.problem_summary,
        capsule.risk_level.as_str(),
        capsule.confidence,
    )
}

#[derive(Debug, Default)]
struct AdapterMetrics {
    calls_today: u64,
    total_tokens: u64,
    total_cost: f64,
    last_reset_day: Option<String>,
}

/// Process-wide cost/token counters for the Director LLM, reset on local-date
/// rollover (spec.md §4.7).
pub struct DirectorAdapter {
    llm: LlmClient,
    metrics: Mutex<AdapterMetrics>,
    calls_total: AtomicU64,
}

impl DirectorAdapter {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm, metrics: Mutex::new(AdapterMetrics::default()), calls_total: AtomicU64::new(0) }
    }

    fn roll_daily_metrics(&self, today: &str) {
        let mut metrics = self.metrics.lock().expect("director metrics poisoned");
        if metrics.last_reset_day.as_deref() != Some(today) {
            metrics.calls_today = 0;
            metrics.last_reset_day = Some(today.to_string());
        }
    }

    /// `Call(DecisionCapsule) -> DirectorDecision` (spec.md §4.7). Returns the
    /// decision, call latency, and this call's approximate token/cost spend.
    pub async fn call(&self, capsule: &DecisionCapsule, today: &str) -> (DirectorDecision, Duration, u64, f64) {
        self.roll_daily_metrics(today);
        self.calls_total.fetch_add(1, Ordering::SeqCst);
        {
            let mut metrics = self.metrics.lock().expect("director metrics poisoned");
            metrics.calls_today += 1;
        }

        let sanitized_prompt = sanitize(&capsule_prompt(capsule));
        let messages = vec![
            ChatMessage::system("You are an expert AI Director making architectural decisions."),
            ChatMessage::user(sanitized_prompt),
        ];

        let start = Instant::now();
        let decision = match self.llm.complete(&messages, 800).await {
            Ok(raw) => parse_director_response(&raw),
            Err(e) => fallback_decision(&e.sentinel().to_string()),
        };
        let elapsed = start.elapsed();

        // Rough per-token cost estimate; exact tokenization is out of scope.
        let approx_tokens = (sanitized_prompt.len() / 4) as u64 + 200;
        let cost = approx_tokens as f64 * 0.0004 / 1000.0;
        {
            let mut metrics = self.metrics.lock().expect("director metrics poisoned");
            metrics.total_tokens += approx_tokens;
            metrics.total_cost += cost;
        }

        (decision, elapsed, approx_tokens, cost)
    }

    pub fn avg_tokens_per_call(&self) -> f64 {
        let metrics = self.metrics.lock().expect("director metrics poisoned");
        if metrics.calls_today == 0 {
            metrics.total_tokens as f64
        } else {
            metrics.total_tokens as f64 / metrics.calls_today as f64
        }
    }

    pub fn last_call_cost(&self) -> f64 {
        self.metrics.lock().expect("director metrics poisoned").total_cost
    }
}

fn parse_director_response(raw: &str) -> DirectorDecision {
    match serde_json::from_str::<DirectorDecision>(raw) {
        Ok(mut decision) => {
            decision.decision = crate::agent::truncate(&decision.decision, 200);
            decision.next_step = crate::agent::truncate(&decision.next_step, 100);
            decision
        }
        Err(e) => fallback_decision(&format!("parse error: {e}")),
    }
}

fn fallback_decision(reason: &str) -> DirectorDecision {
    DirectorDecision {
        decision: "Director unavailable - proceed with local decision".to_string(),
        risks: vec!["Director service unavailable".to_string(), "Decision made locally".to_string()],
        recommendations: vec!["Manual review recommended".to_string(), "Retry Director call later".to_string()],
        next_step: "Proceed with caution using local agents".to_string(),
        confidence: 0.3,
        reasoning: format!("Director call failed: {reason}"),
        decision_class: "unknown".to_string(),
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OverrideOutcome {
    pub director_called: bool,
    pub override_applied: bool,
    pub soft_override_candidate: bool,
    pub shadow_soft_allow_candidate: bool,
    pub override_reason: Option<String>,
    pub pre_filter: PreFilterResult,
    pub director_confidence: f64,
    pub confidence_diff: f64,
    pub latency_seconds: f64,
}

/// Orchestrates Pre-Filter → circuit mode gate → Override Gate for one
/// consult (spec.md §4.8 Steps B–E). Does not itself call the Director;
/// callers invoke [`DirectorAdapter::call`] when `director_called` is set.
pub struct ActiveDirector {
    pub circuit: DirectorCircuitBreaker,
}

impl ActiveDirector {
    pub fn new(initial_mode: DirectorMode) -> Self {
        Self { circuit: DirectorCircuitBreaker::new(initial_mode) }
    }

    /// Runs the Pre-Filter (always, for logging) and then, only if it
    /// passed, the circuit's mode gate. Returns the `PreFilterResult` (to be
    /// logged regardless of outcome) alongside whether the Director should
    /// actually be called. `domains` is the set of agent domains the Router
    /// actually involved for this task (e.g. `routing.agents()`), not a
    /// guess from `risk_level` alone.
    pub fn gate_call(&self, risk_level: RiskLevel, confidence: f64, domains_matched: usize, domains: &[String]) -> (PreFilterResult, bool) {
        let pf = pre_filter(risk_level, confidence, domains_matched);
        if !pf.passed {
            return (pf, false);
        }

        let ctx = DirectorContext { risk_level_high: risk_level == RiskLevel::High, domains };
        let (should_call, _mode_reason) = self.circuit.should_use_director(&ctx);
        (pf, should_call)
    }

    /// Applies the Override Gate (spec.md §4.8 Step D/E) once the Director
    /// has actually been called, and feeds the outcome back into the circuit
    /// breaker.
    pub fn apply_override_gate(
        &self,
        pre_filter: PreFilterResult,
        risk_level: RiskLevel,
        consilium_confidence: f64,
        director_confidence: f64,
        latency: Duration,
        director_error: bool,
        domains: &[String],
    ) -> OverrideOutcome {
        let mode = self.circuit.mode();
        let risk_side = risk_level == RiskLevel::High || consilium_confidence < LOW_CONF_LT;
        let diff = director_confidence - consilium_confidence;
        let improvement_side = diff >= DIFF_GTE;

        let override_allowed_by_mode = mode == DirectorMode::Active;
        let override_applied = override_allowed_by_mode && risk_side && improvement_side;

        let soft_override_candidate = !override_applied && improvement_side;
        let shadow_soft_allow_candidate = soft_override_candidate && mode == DirectorMode::Shadow;

        let ctx = DirectorContext { risk_level_high: risk_level == RiskLevel::High, domains };
        let security_high = ctx.is_security_high();
        self.circuit.record_call(override_applied, 0.0, latency, director_error, security_high);

        OverrideOutcome {
            director_called: true,
            override_applied,
            soft_override_candidate,
            shadow_soft_allow_candidate,
            override_reason: if override_applied {
                Some(format!("risk_side={risk_side} diff={diff:.2}"))
            } else {
                None
            },
            pre_filter: PreFilterResult { passed: pre_filter.passed, reason_tokens: pre_filter.reason_tokens },
            director_confidence,
            confidence_diff: diff,
            latency_seconds: latency.as_secs_f64(),
        }
    }
}
