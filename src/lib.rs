//! Consilium — a multi-agent orchestration runtime.
//!
//! See `SPEC_FULL.md` for the full component breakdown. Wiring order
//! mirrors the data flow: Router → Consilium(agents + KB) → Active Director
//! → task-run log.

pub mod agent;
pub mod config;
pub mod consilium;
pub mod director;
pub mod error;
pub mod kb;
pub mod llm;
pub mod log;
pub mod router;

use std::collections::BTreeMap;
use std::sync::Arc;

use config::RuntimeConfig;
use consilium::ConsiliumResult;
use director::circuit::DirectorMode;
use director::{ActiveDirector, DirectorAdapter, OverrideOutcome};
use kb::{KBStore, Retriever};
use llm::breaker::CircuitBreaker;
use llm::{LlmClient, ReqwestBackend};
use log::{DirectorLog, JsonlLog, PreFilterLog, TaskRunRecord};
use router::AgentRole;

pub use consilium::Consilium;

#[derive(Debug, Clone, serde::Serialize)]
pub struct KbStats {
    pub version_hash: String,
    pub chunk_counts: BTreeMap<AgentRole, usize>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeStatus {
    pub llm_circuit_state: llm::breaker::CircuitState,
    pub director_mode: DirectorMode,
    pub kb: KbStats,
}

/// Ties every component together for one process: the shared LLM circuit
/// breaker, the KB store and retrieval cache, the agent roster, the Director
/// adapter/circuit, and the two append-only logs.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub consilium: consilium::Consilium,
    pub active_director: ActiveDirector,
    pub director_adapter: Option<DirectorAdapter>,
    pub llm_breaker: Arc<CircuitBreaker>,
    pub kb: Arc<KBStore>,
    pub task_run_log: JsonlLog,
    pub circuit_log: JsonlLog,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, kb: KBStore, log_dir: impl Into<std::path::PathBuf>) -> Self {
        let log_dir = log_dir.into();
        let llm_breaker = Arc::new(CircuitBreaker::new(Default::default()));
        let kb = Arc::new(kb);
        let retriever = Arc::new(Retriever::new(config.kb_cache_size));

        let mut agents = BTreeMap::new();
        for role in [
            AgentRole::Dev,
            AgentRole::Security,
            AgentRole::Architect,
            AgentRole::Qa,
            AgentRole::Ux,
            AgentRole::Seo,
            AgentRole::Director,
        ] {
            let backend = Box::new(ReqwestBackend::new(config.llm_url.clone(), "local-agent"));
            let llm = Arc::new(LlmClient::new(backend, llm_breaker.clone()));
            let agent = Arc::new(agent::Agent::new(role, format!("{role}-agent"), llm));
            agents.insert(role, agent);
        }

        let consilium = consilium::Consilium::new(agents, kb.clone(), retriever, config.kb_top_k, config.kb_max_chars);

        let director_adapter = config.director_llm_url.as_ref().map(|url| {
            let backend = Box::new(ReqwestBackend::new(url.clone(), config.director_model.clone()));
            let director_llm = LlmClient::new(backend, llm_breaker.clone());
            DirectorAdapter::new(director_llm)
        });

        let active_director = ActiveDirector::new(config.director_mode);

        Self {
            config,
            consilium,
            active_director,
            director_adapter,
            llm_breaker,
            kb,
            task_run_log: JsonlLog::new(log_dir.join("task_run.jsonl")),
            circuit_log: JsonlLog::new(log_dir.join("director_circuit_breaker.jsonl")),
        }
    }

    /// Ambient operator status surface (SPEC_FULL.md §10): not a network
    /// endpoint, just an in-process snapshot for a CLI or test harness.
    pub fn status(&self) -> RuntimeStatus {
        let (director_mode, _rolling) = self.active_director.circuit.status();
        RuntimeStatus {
            llm_circuit_state: self.llm_breaker.state(),
            director_mode,
            kb: KbStats { version_hash: self.kb.version_hash().to_string(), chunk_counts: self.kb.stats() },
        }
    }

    /// Runs the full pipeline for one task: `Router -> Consilium -> [Active
    /// Director] -> task-run log entry` (spec.md §1, §4.8 Step F).
    pub async fn run_task(&self, task_id: &str, task: &str, smart_routing: bool, today: &str) -> (ConsiliumResult, TaskRunRecord) {
        let consult = self.consilium.consult(task, smart_routing, false, self.config.consilium_mode).await;

        let opinions_include_security = consult.opinions.contains_key(&AgentRole::Security);
        let confidence = consult.recommendation.as_ref().map(|r| r.confidence_level).unwrap_or(0.0);
        let domains_matched = consult.recommendation.as_ref().map(|r| r.agents_involved.len().saturating_sub(1)).unwrap_or(0);
        let risk_level = director::determine_risk_level(task, opinions_include_security, confidence, domains_matched);

        // The Director's actual involved domains (spec.md §4.8 Step C/D), not a
        // guess derived from risk_level alone.
        let domains: Vec<String> = consult.opinions.keys().map(|r| r.to_string()).collect();

        let (pre_filter, should_call_director) = self.active_director.gate_call(risk_level, confidence, domains_matched, &domains);

        let mut override_outcome: Option<(OverrideOutcome, u64, f64)> = None;
        let mut final_recommendation = consult.recommendation.as_ref().map(|r| r.decision_summary.clone());

        if let (true, Some(adapter)) = (should_call_director, self.director_adapter.as_ref()) {
            let opinions_for_capsule: BTreeMap<String, String> =
                consult.opinions.iter().map(|(role, op)| (role.to_string(), op.opinion_text.clone())).collect();
            let routing = router::route(task);
            let capsule = director::build_capsule(task, &routing, &opinions_for_capsule, confidence, risk_level);

            let (decision, latency, tokens, cost) = adapter.call(&capsule, today).await;
            let outcome =
                self.active_director.apply_override_gate(pre_filter.clone(), risk_level, confidence, decision.confidence, latency, false, &domains);

            if outcome.override_applied {
                final_recommendation = Some(decision.decision.clone());
            }
            override_outcome = Some((outcome, tokens, cost));
        }

        let director_log = match &override_outcome {
            Some((outcome, tokens, cost)) => DirectorLog {
                called: true,
                override_applied: outcome.override_applied,
                soft_override_candidate: outcome.soft_override_candidate,
                shadow_soft_allow_candidate: outcome.shadow_soft_allow_candidate,
                override_reason: outcome.override_reason.clone(),
                director_confidence: Some(outcome.director_confidence),
                confidence_diff: Some(outcome.confidence_diff),
                tokens: Some(*tokens),
                cost: Some(*cost),
                latency_seconds: Some(outcome.latency_seconds),
            },
            None => DirectorLog::not_called(),
        };

        let record = TaskRunRecord {
            task_id: task_id.to_string(),
            timestamp: today.to_string(),
            task_summary: TaskRunRecord::task_summary_from(task),
            domains: consult.recommendation.as_ref().map(|r| r.agents_involved.iter().map(|a| a.to_string()).collect()).unwrap_or_default(),
            risk_level,
            consilium_confidence: confidence,
            pre_filter: PreFilterLog {
                passed: pre_filter.passed,
                reason_tokens: pre_filter.reason_tokens,
                thresholds: serde_json::json!({"prefilter_conf_lt": 0.75, "multi_domain_gte": 3}),
            },
            director: director_log,
        };

        if let Err(e) = self.task_run_log.append(&record) {
            tracing::error!("failed to append task run record: {e}");
        }

        let mut result = consult;
        if let (Some(rec), Some(text)) = (result.recommendation.as_mut(), final_recommendation) {
            rec.decision_summary = text;
        }

        (result, record)
    }
}
