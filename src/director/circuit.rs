//! Director Circuit Breaker — rolling-metrics auto-rollback, spec.md §4.8.
//!
//! Grounded in `director_circuit_breaker.py::DirectorCircuitBreaker`: same
//! rolling window of 20 calls, same base limits, same ×1.2 softened limits
//! for security+HIGH, same rollback/recovery hysteresis.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const ROLLING_WINDOW: usize = 20;
const METRICS_HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DirectorMode {
    Off,
    Shadow,
    Active,
}

impl DirectorMode {
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "active" => DirectorMode::Active,
            "shadow" => DirectorMode::Shadow,
            _ => DirectorMode::Off,
        }
    }
}

impl std::fmt::Display for DirectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DirectorMode::Off => "off",
            DirectorMode::Shadow => "shadow",
            DirectorMode::Active => "active",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitLimits {
    pub override_rate_max: f64,
    pub daily_cost_max: f64,
    pub error_rate_max: f64,
    pub latency_max: f64,
}

const BASE_LIMITS: CircuitLimits =
    CircuitLimits { override_rate_max: 0.75, daily_cost_max: 0.01, error_rate_max: 0.10, latency_max: 6.0 };

fn softened(limits: CircuitLimits) -> CircuitLimits {
    CircuitLimits {
        override_rate_max: limits.override_rate_max * 1.2,
        daily_cost_max: limits.daily_cost_max * 1.2,
        error_rate_max: limits.error_rate_max * 1.2,
        latency_max: limits.latency_max * 1.2,
    }
}

#[derive(Debug, Clone)]
struct DirectorCallMetrics {
    recorded_at: Instant,
    override_applied: bool,
    cost: f64,
    latency_secs: f64,
    error: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RollingMetrics {
    pub calls_count_20: usize,
    pub override_rate_20: f64,
    pub error_rate_20: f64,
    pub avg_latency_20: f64,
    pub daily_cost: f64,
}

/// A circuit-mode transition, suitable for the `director_circuit_breaker.jsonl` log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitTransition {
    pub old_mode: String,
    pub new_mode: String,
    pub reason: String,
}

pub struct DirectorContext<'a> {
    pub risk_level_high: bool,
    pub domains: &'a [String],
}

impl<'a> DirectorContext<'a> {
    pub fn is_security_high(&self) -> bool {
        self.risk_level_high && self.domains.iter().any(|d| d == "security")
    }
}

struct Inner {
    mode: DirectorMode,
    history: VecDeque<DirectorCallMetrics>,
}

pub struct DirectorCircuitBreaker {
    inner: Mutex<Inner>,
}

impl DirectorCircuitBreaker {
    pub fn new(initial_mode: DirectorMode) -> Self {
        Self { inner: Mutex::new(Inner { mode: initial_mode, history: VecDeque::with_capacity(METRICS_HISTORY_CAP) }) }
    }

    pub fn mode(&self) -> DirectorMode {
        self.inner.lock().expect("circuit breaker poisoned").mode
    }

    /// `should_use_director` (spec.md §4.8 Step C).
    pub fn should_use_director(&self, ctx: &DirectorContext) -> (bool, &'static str) {
        match self.mode() {
            DirectorMode::Off => (false, "director_disabled"),
            DirectorMode::Shadow => {
                if ctx.is_security_high() {
                    (true, "active_mode")
                } else {
                    (true, "shadow_mode")
                }
            }
            DirectorMode::Active => (true, "active_mode"),
        }
    }

    /// Records one Director call's outcome and re-evaluates rollback/recovery,
    /// returning a transition record when the mode changed.
    pub fn record_call(
        &self,
        override_applied: bool,
        cost: f64,
        latency: Duration,
        error: bool,
        security_high: bool,
    ) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock().expect("circuit breaker poisoned");
        if inner.history.len() == METRICS_HISTORY_CAP {
            inner.history.pop_front();
        }
        inner.history.push_back(DirectorCallMetrics {
            recorded_at: Instant::now(),
            override_applied,
            cost,
            latency_secs: latency.as_secs_f64(),
            error,
        });

        if inner.history.len() < 5 {
            return None;
        }

        let limits = if security_high { softened(BASE_LIMITS) } else { BASE_LIMITS };
        let rolling = rolling_metrics(&inner.history);

        let violated = rolling.override_rate_20 > limits.override_rate_max
            || rolling.daily_cost > limits.daily_cost_max
            || rolling.error_rate_20 > limits.error_rate_max
            || rolling.avg_latency_20 > limits.latency_max;

        if violated && inner.mode == DirectorMode::Active {
            let old = inner.mode;
            inner.mode = DirectorMode::Shadow;
            return Some(CircuitTransition {
                old_mode: old.to_string(),
                new_mode: inner.mode.to_string(),
                reason: "circuit breaker triggered: metrics exceeded limits".to_string(),
            });
        }

        if !violated && inner.mode == DirectorMode::Shadow {
            let last_20: Vec<&DirectorCallMetrics> =
                inner.history.iter().rev().take(ROLLING_WINDOW).collect();
            let calls_count_20 = last_20.len();
            let error_count_20 = last_20.iter().filter(|m| m.error).count();
            if calls_count_20 >= 10 && rolling.override_rate_20 < 0.65 && error_count_20 == 0 {
                let old = inner.mode;
                inner.mode = DirectorMode::Active;
                return Some(CircuitTransition {
                    old_mode: old.to_string(),
                    new_mode: inner.mode.to_string(),
                    reason: "metrics stabilized (override<0.65, errors=0, 10+ calls)".to_string(),
                });
            }
        }

        None
    }

    pub fn status(&self) -> (DirectorMode, Option<RollingMetrics>) {
        let inner = self.inner.lock().expect("circuit breaker poisoned");
        if inner.history.is_empty() {
            (inner.mode, None)
        } else {
            (inner.mode, Some(rolling_metrics(&inner.history)))
        }
    }
}

fn rolling_metrics(history: &VecDeque<DirectorCallMetrics>) -> RollingMetrics {
    let last_20: Vec<&DirectorCallMetrics> = history.iter().rev().take(ROLLING_WINDOW).collect();
    let n = last_20.len().max(1) as f64;
    let override_count = last_20.iter().filter(|m| m.override_applied).count() as f64;
    let error_count = last_20.iter().filter(|m| m.error).count() as f64;
    let total_latency: f64 = last_20.iter().map(|m| m.latency_secs).sum();

    let one_day_ago = Instant::now().checked_sub(Duration::from_secs(86_400));
    let daily_cost: f64 = history
        .iter()
        .filter(|m| one_day_ago.map(|cutoff| m.recorded_at >= cutoff).unwrap_or(true))
        .map(|m| m.cost)
        .sum();

    RollingMetrics {
        calls_count_20: last_20.len(),
        override_rate_20: override_count / n,
        error_rate_20: error_count / n,
        avg_latency_20: total_latency / n,
        daily_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_mode_used_directly() {
        let breaker = DirectorCircuitBreaker::new(DirectorMode::Active);
        let ctx = DirectorContext { risk_level_high: false, domains: &[] };
        assert_eq!(breaker.should_use_director(&ctx), (true, "active_mode"));
    }

    #[test]
    fn shadow_bypasses_for_security_high() {
        let breaker = DirectorCircuitBreaker::new(DirectorMode::Shadow);
        let domains = vec!["security".to_string()];
        let ctx = DirectorContext { risk_level_high: true, domains: &domains };
        assert_eq!(breaker.should_use_director(&ctx), (true, "active_mode"));
    }

    #[test]
    fn shadow_plain_stays_shadow() {
        let breaker = DirectorCircuitBreaker::new(DirectorMode::Shadow);
        let ctx = DirectorContext { risk_level_high: false, domains: &[] };
        assert_eq!(breaker.should_use_director(&ctx), (true, "shadow_mode"));
    }

    #[test]
    fn rollback_on_high_override_rate() {
        let breaker = DirectorCircuitBreaker::new(DirectorMode::Active);
        let mut transition = None;
        for _ in 0..20 {
            transition = breaker.record_call(true, 0.0001, Duration::from_millis(100), false, false);
        }
        assert_eq!(breaker.mode(), DirectorMode::Shadow);
        assert!(transition.is_some());
    }

    #[test]
    fn recovery_requires_hysteresis() {
        let breaker = DirectorCircuitBreaker::new(DirectorMode::Active);
        for _ in 0..20 {
            breaker.record_call(true, 0.0001, Duration::from_millis(100), false, false);
        }
        assert_eq!(breaker.mode(), DirectorMode::Shadow);

        // Not enough clean calls yet to recover.
        for _ in 0..5 {
            breaker.record_call(false, 0.0001, Duration::from_millis(100), false, false);
        }
        assert_eq!(breaker.mode(), DirectorMode::Shadow);

        for _ in 0..10 {
            breaker.record_call(false, 0.0001, Duration::from_millis(100), false, false);
        }
        assert_eq!(breaker.mode(), DirectorMode::Active);
    }
}
