//! LLM Client with retry and circuit breaker — spec.md §4.3.
//!
//! Grounded in `agent.py::_call_llm` (timing window, simple HTTP POST to
//! `{llm_url}/chat/completions`) and in the teacher's `agent/provider.rs`
//! trait-object `LLMProvider` shape, generalized here into a trait so the
//! circuit breaker and retry policy can be tested against a stub.

pub mod breaker;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::LlmError;
use breaker::CircuitBreaker;

const TIMING_WINDOW: usize = 20;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Backend transport, implemented for the real `reqwest`-based client and
/// for deterministic test stubs.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn send(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String, LlmError>;
}

pub struct ReqwestBackend {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl ReqwestBackend {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for ReqwestBackend {
    async fn send(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": 0.7,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .json(&body)
            .timeout(Duration::from_secs(180))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(LlmError::HttpError(status.as_u16()));
        }
        if status.is_client_error() {
            return Err(LlmError::HttpError(status.as_u16()));
        }

        let value: serde_json::Value = resp.json().await.map_err(|_| LlmError::HttpError(502))?;
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or(LlmError::HttpError(502))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else if e.is_connect() {
        LlmError::ConnectionRefused
    } else {
        LlmError::ConnectionReset
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(8) }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

/// Sliding-window timing + retry metrics for one LLM client instance.
/// A single process-wide `CircuitBreaker` is shared across every client
/// (spec.md §4.3: "Single per-process circuit breaker shared across all
/// agents").
pub struct LlmClient {
    backend: Box<dyn LlmBackend>,
    breaker: std::sync::Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
    timings_ms: Mutex<VecDeque<f64>>,
    retry_count: Mutex<u64>,
}

impl LlmClient {
    pub fn new(backend: Box<dyn LlmBackend>, breaker: std::sync::Arc<CircuitBreaker>) -> Self {
        Self {
            backend,
            breaker,
            retry_policy: RetryPolicy::default(),
            timings_ms: Mutex::new(VecDeque::with_capacity(TIMING_WINDOW)),
            retry_count: Mutex::new(0),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// `Complete(messages, maxTokens) -> text` (spec.md §4.3). The breaker is
    /// consulted once before the whole call (including its retries), not
    /// before each individual retry attempt.
    pub async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String, LlmError> {
        if !self.breaker.allow_call() {
            return Err(LlmError::CircuitOpen);
        }

        let start = Instant::now();
        let mut last_err = LlmError::ConnectionRefused;

        for attempt in 0..self.retry_policy.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt - 1)).await;
                *self.retry_count.lock().expect("retry counter poisoned") += 1;
            }

            match self.backend.send(messages, max_tokens).await {
                Ok(text) => {
                    self.record_timing(start.elapsed());
                    self.breaker.record_success();
                    return Ok(text);
                }
                Err(e) => {
                    last_err = e.clone();
                    self.breaker.record_failure(e.counts_as_failure());
                    if !e.is_retryable() {
                        self.record_timing(start.elapsed());
                        return Err(e);
                    }
                }
            }
        }

        self.record_timing(start.elapsed());
        Err(last_err)
    }

    fn record_timing(&self, elapsed: Duration) {
        let mut timings = self.timings_ms.lock().expect("timing window poisoned");
        if timings.len() == TIMING_WINDOW {
            timings.pop_front();
        }
        timings.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let timings = self.timings_ms.lock().expect("timing window poisoned");
        if timings.is_empty() {
            0.0
        } else {
            timings.iter().sum::<f64>() / timings.len() as f64
        }
    }

    pub fn retry_count(&self) -> u64 {
        *self.retry_count.lock().expect("retry counter poisoned")
    }
}
