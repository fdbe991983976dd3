//! Process-wide LLM circuit breaker — spec.md §4.3.
//!
//! A single `CircuitBreaker` instance is shared (via `Arc`) across every
//! `LlmClient` in the process, matching "Single per-process circuit breaker
//! shared across all agents".

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    blocked_count: u64,
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                blocked_count: 0,
                half_open_probe_in_flight: false,
            }),
        }
    }

    /// Consulted before each LLM call attempt (not each retry within one
    /// call). Returns `false` when the call should be short-circuited.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.last_failure_time.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    true
                } else {
                    inner.blocked_count += 1;
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    inner.blocked_count += 1;
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
        inner.half_open_probe_in_flight = false;
    }

    /// `counts` is false for errors that are themselves a consequence of the
    /// breaker being open (e.g. `[LLM_CIRCUIT_OPEN]`), which must not
    /// re-trip an already-open breaker.
    pub fn record_failure(&self, counts: bool) {
        if !counts {
            return;
        }
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(Instant::now());
                inner.half_open_probe_in_flight = false;
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure_time = Some(Instant::now());
                }
            }
            CircuitState::Open => {
                inner.last_failure_time = Some(Instant::now());
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker poisoned").state
    }

    pub fn blocked_count(&self) -> u64 {
        self.inner.lock().expect("breaker poisoned").blocked_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) });
        for _ in 0..4 {
            assert!(breaker.allow_call());
            breaker.record_failure(true);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_call());
        breaker.record_failure(true);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn short_circuits_while_open() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_millis(50) });
        breaker.allow_call();
        breaker.record_failure(true);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_call());
    }

    #[test]
    fn half_open_probe_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_millis(10) });
        breaker.allow_call();
        breaker.record_failure(true);
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
