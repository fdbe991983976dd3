//! Append-only JSON-lines logging — spec.md §6, §4.8 Step F.
//!
//! Grounded in `director_circuit_breaker.py::_log_event` (open-append-write
//! one JSON line per event) and the teacher's preference for `tracing` over
//! ad hoc `println!` for operational diagnostics; this module owns only the
//! durable task/circuit records the spec requires on disk.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::director::circuit::CircuitTransition;
use crate::director::RiskLevel;
use crate::error::RuntimeError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PreFilterLog {
    pub passed: bool,
    pub reason_tokens: Vec<String>,
    pub thresholds: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectorLog {
    pub called: bool,
    pub override_applied: bool,
    pub soft_override_candidate: bool,
    pub shadow_soft_allow_candidate: bool,
    pub override_reason: Option<String>,
    pub director_confidence: Option<f64>,
    pub confidence_diff: Option<f64>,
    pub tokens: Option<u64>,
    pub cost: Option<f64>,
    pub latency_seconds: Option<f64>,
}

impl DirectorLog {
    /// Per invariant (4): when the Director was never called, every numeric
    /// field is null.
    pub fn not_called() -> Self {
        Self {
            called: false,
            override_applied: false,
            soft_override_candidate: false,
            shadow_soft_allow_candidate: false,
            override_reason: None,
            director_confidence: None,
            confidence_diff: None,
            tokens: None,
            cost: None,
            latency_seconds: None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskRunRecord {
    pub task_id: String,
    pub timestamp: String,
    pub task_summary: String,
    pub domains: Vec<String>,
    pub risk_level: RiskLevel,
    pub consilium_confidence: f64,
    pub pre_filter: PreFilterLog,
    pub director: DirectorLog,
}

impl TaskRunRecord {
    pub fn task_summary_from(task: &str) -> String {
        crate::agent::truncate(task, 100)
    }
}

/// A single append-only JSONL file, writes serialized by a mutex, reused for
/// both `task_run.jsonl` and `director_circuit_breaker.jsonl`.
pub struct JsonlLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: serde::Serialize>(&self, record: &T) -> Result<(), RuntimeError> {
        let _guard = self.write_lock.lock().expect("log write lock poisoned");
        let line = serde_json::to_string(record).map_err(|e| RuntimeError::Log(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RuntimeError::Log(e.to_string()))?;

        writeln!(file, "{line}").map_err(|e| RuntimeError::Log(e.to_string()))
    }
}

pub fn append_circuit_transition(log: &JsonlLog, transition: &CircuitTransition) -> Result<(), RuntimeError> {
    log.append(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonlLog::new(dir.path().join("task_run.jsonl"));

        let record = TaskRunRecord {
            task_id: "t1".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            task_summary: TaskRunRecord::task_summary_from("hello world"),
            domains: vec!["security".to_string()],
            risk_level: RiskLevel::Low,
            consilium_confidence: 0.9,
            pre_filter: PreFilterLog { passed: true, reason_tokens: vec![], thresholds: serde_json::json!({}) },
            director: DirectorLog::not_called(),
        };

        log.append(&record).expect("append");
        log.append(&record).expect("append");

        let file = std::fs::File::open(log.path()).expect("open");
        let lines: Vec<_> = std::io::BufReader::new(file).lines().collect::<Result<_, _>>().expect("read lines");
        assert_eq!(lines.len(), 2);
        assert!(serde_json::from_str::<serde_json::Value>(&lines[0]).is_ok());
    }

    #[test]
    fn not_called_record_has_null_numeric_fields() {
        let record = DirectorLog::not_called();
        let value = serde_json::to_value(&record).expect("serialize");
        assert!(value["director_confidence"].is_null());
    }
}
