//! Error sentinels and runtime error types.
//!
//! spec.md §4.3/§7 specify the LLM client surfaces failures as bracketed
//! sentinel strings (e.g. `[LLM_TIMEOUT]`) rather than propagating a Rust
//! error across agent boundaries. We keep a typed enum internally and only
//! stringify it at the edge, so callers/tests can match on the stable text
//! while the rest of the crate still gets `Result`-based error handling.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// Request exceeded its deadline.
    #[error("[LLM_TIMEOUT]")]
    Timeout,
    /// Non-2xx HTTP status. 5xx is retryable, 4xx is not.
    #[error("[LLM_HTTP_ERROR]")]
    HttpError(u16),
    /// The connection was reset mid-flight (transient, retryable).
    #[error("[LLM_CONNECTION_ERROR]")]
    ConnectionReset,
    /// Nothing is listening at the endpoint (not retryable).
    #[error("[LLM_CONNECTION_ERROR]")]
    ConnectionRefused,
    /// The circuit breaker short-circuited the call.
    #[error("[LLM_CIRCUIT_OPEN]")]
    CircuitOpen,
}

impl LlmError {
    /// Whether the retry policy of spec.md §4.3 permits retrying this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout => true,
            LlmError::HttpError(code) => *code >= 500,
            LlmError::ConnectionReset => true,
            LlmError::ConnectionRefused => false,
            LlmError::CircuitOpen => false,
        }
    }

    /// Whether this error should count as a failure against the circuit
    /// breaker's `failureCount` (spec.md §4.3). A circuit-open short-circuit
    /// is itself a consequence of prior failures, not a new one.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, LlmError::CircuitOpen)
    }

    /// The stable sentinel tag, independent of Display formatting.
    pub fn sentinel(&self) -> &'static str {
        match self {
            LlmError::Timeout => "[LLM_TIMEOUT]",
            LlmError::HttpError(_) => "[LLM_HTTP_ERROR]",
            LlmError::ConnectionReset | LlmError::ConnectionRefused => "[LLM_CONNECTION_ERROR]",
            LlmError::CircuitOpen => "[LLM_CIRCUIT_OPEN]",
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("health check failed: {0}")]
    HealthCheck(String),
    #[error("knowledge base I/O error: {0}")]
    Kb(#[from] std::io::Error),
    #[error("director adapter error: {0}")]
    Director(String),
    #[error("task log error: {0}")]
    Log(String),
}
