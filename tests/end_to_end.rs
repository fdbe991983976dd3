//! End-to-end scenarios S1-S6 from spec.md §8, against a deterministic
//! stubbed LLM backend (no network, no tool server).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use consilium::agent::Agent;
use consilium::config::RuntimeConfig;
use consilium::director::circuit::DirectorMode;
use consilium::director::{ActiveDirector, DirectorAdapter};
use consilium::error::LlmError;
use consilium::kb::{KBStore, Retriever};
use consilium::llm::breaker::CircuitBreaker;
use consilium::llm::{ChatMessage, LlmBackend, LlmClient};
use consilium::log::JsonlLog;
use consilium::router::{AgentRole, Mode};
use consilium::Runtime;

struct ScriptedBackend {
    responses: AsyncMutex<VecDeque<String>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<&str>) -> Self {
        Self { responses: AsyncMutex::new(responses.into_iter().map(|s| s.to_string()).collect()) }
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn send(&self, _messages: &[ChatMessage], _max_tokens: u32) -> Result<String, LlmError> {
        let mut queue = self.responses.lock().await;
        Ok(queue.pop_front().unwrap_or_else(|| "Opinion text, confidence 7".to_string()))
    }
}

fn make_agent(role: AgentRole, responses: Vec<&str>, breaker: Arc<CircuitBreaker>) -> Arc<Agent> {
    let backend = Box::new(ScriptedBackend::new(responses));
    let llm = Arc::new(LlmClient::new(backend, breaker));
    Arc::new(Agent::new(role, format!("{role}-agent"), llm))
}

fn empty_kb() -> Arc<KBStore> {
    Arc::new(KBStore::from_memory(vec![]))
}

/// A backend whose every call fails with a non-retryable error, so each
/// `LlmClient::complete` records exactly one circuit-breaker failure.
struct FailingBackend;

#[async_trait]
impl LlmBackend for FailingBackend {
    async fn send(&self, _messages: &[ChatMessage], _max_tokens: u32) -> Result<String, LlmError> {
        Err(LlmError::ConnectionRefused)
    }
}

fn make_failing_agent(role: AgentRole, breaker: Arc<CircuitBreaker>) -> Arc<Agent> {
    let llm = Arc::new(LlmClient::new(Box::new(FailingBackend), breaker));
    Arc::new(Agent::new(role, format!("{role}-agent"), llm))
}

#[tokio::test]
async fn s1_fast_plain_question_runs_single_dev_agent() {
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut agents = BTreeMap::new();
    agents.insert(AgentRole::Dev, make_agent(AgentRole::Dev, vec!["Python is a programming language. Confidence 9"], breaker));

    let consilium = consilium::consilium::Consilium::new(agents, empty_kb(), Arc::new(Retriever::new(10)), 5, 4000);
    let result = consilium.consult("What is Python?", true, false, Mode::Standard).await;

    assert!(result.success);
    assert_eq!(result.mode, Mode::Fast);
    assert_eq!(result.opinions.len(), 1);
    assert!(result.opinions.contains_key(&AgentRole::Dev));
    assert!(result.director_decision.is_none());
}

#[tokio::test]
async fn s2_standard_security_task_invokes_dev_and_security() {
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut agents = BTreeMap::new();
    agents.insert(AgentRole::Dev, make_agent(AgentRole::Dev, vec!["Looks fine, confidence 7"], breaker.clone()));
    agents.insert(
        AgentRole::Security,
        make_agent(AgentRole::Security, vec!["Recommend rotating JWT secrets regularly. Confidence 8"], breaker),
    );

    let consilium = consilium::consilium::Consilium::new(agents, empty_kb(), Arc::new(Retriever::new(10)), 5, 4000);
    let result = consilium.consult("Review JWT token security", true, false, Mode::Standard).await;

    assert!(result.success);
    assert_eq!(result.mode, Mode::Standard);
    assert!(result.opinions.contains_key(&AgentRole::Security));
    assert!(result.director_decision.is_none());
}

#[tokio::test]
async fn s4_incident_triggers_critical_preemption_with_director() {
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut agents = BTreeMap::new();
    for role in [AgentRole::Dev, AgentRole::Security, AgentRole::Architect, AgentRole::Qa, AgentRole::Seo, AgentRole::Ux] {
        agents.insert(role, make_agent(role, vec!["Stabilize first. Confidence 9"], breaker.clone()));
    }
    agents.insert(
        AgentRole::Director,
        make_agent(
            AgentRole::Director,
            vec!["DECISION: Contain breach\nRATIONALE: active exploit\nRISKS: data loss\nNEXT_STEPS: isolate host"],
            breaker,
        ),
    );

    let consilium = consilium::consilium::Consilium::new(agents, empty_kb(), Arc::new(Retriever::new(10)), 5, 4000);
    let result = consilium.consult("Production down: breach suspected", true, false, Mode::Standard).await;

    assert!(result.success);
    assert_eq!(result.mode, Mode::Critical);
    assert!(result.director_decision.is_some());
    assert_eq!(result.opinions.len(), 6, "director itself is not part of the parallel fan-out");
}

#[tokio::test]
async fn s3_critical_multi_domain_applies_override() {
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut agents = BTreeMap::new();
    for role in [AgentRole::Dev, AgentRole::Architect, AgentRole::Security, AgentRole::Qa] {
        agents.insert(role, make_agent(role, vec!["Looks reasonable. Confidence 7"], breaker.clone()));
    }

    let orchestrator = consilium::consilium::Consilium::new(agents, empty_kb(), Arc::new(Retriever::new(10)), 5, 4000);
    let result = orchestrator
        .consult("Plan CI/CD migration, security audit, and regression testing", true, false, Mode::Standard)
        .await;

    assert!(result.success);
    assert_eq!(result.mode, Mode::Critical);
    assert!(result.opinions.contains_key(&AgentRole::Security));
    assert!(result.opinions.contains_key(&AgentRole::Architect));

    let domains: Vec<String> = result.opinions.keys().map(|r| r.to_string()).collect();
    let risk_level = consilium::director::determine_risk_level(
        "Plan CI/CD migration, security audit, and regression testing",
        result.opinions.contains_key(&AgentRole::Security),
        0.72,
        domains.len().saturating_sub(1),
    );
    assert_eq!(risk_level, consilium::director::RiskLevel::High);

    let director = ActiveDirector::new(DirectorMode::Active);
    let pf = consilium::director::pre_filter(risk_level, 0.72, domains.len());
    assert!(pf.passed, "a HIGH-risk multi-domain task must not be pre-filtered out");

    let outcome = director.apply_override_gate(
        pf,
        risk_level,
        0.72,
        0.90,
        std::time::Duration::from_millis(50),
        false,
        &domains,
    );
    assert!(outcome.override_applied, "risk side (HIGH) and improvement side (0.18 >= 0.10) both hold");
}

#[tokio::test]
async fn s6_retrieval_cache_hits_on_normalized_query() {
    let md = "## Overview\n\nIntro.\n\n## Guidance\n\nUse short-lived JWTs and rotate secrets.";
    let store = KBStore::from_memory(vec![(AgentRole::Security, "guide.md", md.to_string())]);
    let retriever = Retriever::new(10);

    let first = retriever.retrieve(&store, AgentRole::Security, "JWT auth", 5, 4000);
    let second = retriever.retrieve(&store, AgentRole::Security, "jwt   AUTH", 5, 4000);

    assert_eq!(first.text, second.text);
    assert_eq!(second.cache, consilium::kb::retrieval::CacheOutcome::Hit);
}

#[tokio::test]
async fn s5_breaker_open_after_five_failures_returns_structured_errors() {
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut agents = BTreeMap::new();
    agents.insert(AgentRole::Dev, make_failing_agent(AgentRole::Dev, breaker.clone()));

    let orchestrator = consilium::consilium::Consilium::new(agents, empty_kb(), Arc::new(Retriever::new(10)), 5, 4000);

    for _ in 0..5 {
        let result = orchestrator.consult("What is Python?", true, false, Mode::Fast).await;
        let opinion = &result.opinions[&AgentRole::Dev];
        assert_eq!(opinion.opinion_text, "[LLM_CONNECTION_ERROR]");
    }
    assert_eq!(breaker.state(), consilium::llm::breaker::CircuitState::Open);

    let sixth = orchestrator.consult("What is Python?", true, false, Mode::Fast).await;
    let opinion = &sixth.opinions[&AgentRole::Dev];
    assert_eq!(opinion.opinion_text, "[LLM_CIRCUIT_OPEN]", "sixth consult is short-circuited, not a new failure");
}

#[tokio::test]
async fn run_task_logs_calm_skip_reason_tokens_for_plain_question() {
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut agents = BTreeMap::new();
    agents.insert(AgentRole::Dev, make_agent(AgentRole::Dev, vec!["Python is a programming language. Confidence 10"], breaker.clone()));

    let consilium = consilium::consilium::Consilium::new(agents, empty_kb(), Arc::new(Retriever::new(10)), 5, 4000);
    let log_dir = tempfile::tempdir().expect("tempdir");

    let runtime = Runtime {
        config: RuntimeConfig::default(),
        consilium,
        active_director: ActiveDirector::new(DirectorMode::Active),
        director_adapter: None,
        llm_breaker: breaker,
        kb: empty_kb(),
        task_run_log: JsonlLog::new(log_dir.path().join("task_run.jsonl")),
        circuit_log: JsonlLog::new(log_dir.path().join("director_circuit_breaker.jsonl")),
    };

    let (result, record) = runtime.run_task("task-1", "What is Python?", true, "2026-07-28").await;

    assert!(result.success);
    assert!(!record.director.called, "calm task must skip the Director");
    assert_eq!(record.pre_filter.reason_tokens, vec!["calm_task", "risk=low", "conf=1.00", "domains=0"]);
    assert!(record.director.director_confidence.is_none());
    assert!(record.director.cost.is_none());
}

#[tokio::test]
async fn run_task_calls_director_and_applies_override_for_high_risk_task() {
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut agents = BTreeMap::new();
    for role in [AgentRole::Dev, AgentRole::Security] {
        agents.insert(role, make_agent(role, vec!["Rotate secrets regularly. Confidence 7"], breaker.clone()));
    }

    let consilium = consilium::consilium::Consilium::new(agents, empty_kb(), Arc::new(Retriever::new(10)), 5, 4000);
    let log_dir = tempfile::tempdir().expect("tempdir");

    let director_decision = serde_json::json!({
        "decision": "Rotate JWT secrets on a 30-day cadence",
        "risks": ["stale tokens"],
        "recommendations": ["automate rotation"],
        "next_step": "schedule rotation job",
        "confidence": 0.9,
        "reasoning": "security review",
    })
    .to_string();
    let director_llm = LlmClient::new(Box::new(ScriptedBackend::new(vec![director_decision.as_str()])), breaker.clone());

    let runtime = Runtime {
        config: RuntimeConfig::default(),
        consilium,
        active_director: ActiveDirector::new(DirectorMode::Active),
        director_adapter: Some(DirectorAdapter::new(director_llm)),
        llm_breaker: breaker,
        kb: empty_kb(),
        task_run_log: JsonlLog::new(log_dir.path().join("task_run.jsonl")),
        circuit_log: JsonlLog::new(log_dir.path().join("director_circuit_breaker.jsonl")),
    };

    let (result, record) = runtime.run_task("task-2", "Review JWT token security", true, "2026-07-28").await;

    assert!(result.success);
    assert!(record.director.called, "high-risk task must invoke the Director");
    assert!(record.pre_filter.reason_tokens.contains(&"high_risk".to_string()));
    assert!(record.director.override_applied, "director confidence 0.90 vs consilium ~0.70 clears the improvement side");
    assert_eq!(result.recommendation.expect("recommendation").decision_summary, "Rotate JWT secrets on a 30-day cadence");
}
