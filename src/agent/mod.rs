//! Agent — a stateful role instance holding timing metrics and exposing
//! `Think`/`Triage` (spec.md §4.4).
//!
//! Grounded in `agent.py::think_triage` for the exact triage format/regexes
//! and in the teacher's `agent::truncate` helper for the 500-char opinion
//! cap reused by the Consilium.

pub mod tools;

use regex::Regex;
use std::sync::Arc;

use crate::llm::{ChatMessage, LlmClient};
use crate::router::AgentRole;
use tools::ToolClient;

const MAX_READ_FILES: usize = 6;
const FILE_READ_CAP: usize = 15_000;

#[derive(Debug, Clone)]
pub struct TriageResult {
    pub answer: String,
    pub needs_consilium: bool,
    pub reason: String,
    pub suggested_agents: Vec<String>,
}

const SECURITY_KEYWORDS_EN: &[&str] = &[
    "security", "vulnerability", "auth", "token", "jwt", "injection", "xss", "csrf", "incident",
    "outage", "breach", "attack", "production down", "migration",
];
const SECURITY_KEYWORDS_RU: &[&str] =
    &["безопасность", "уязвимость", "авторизация", "миграция", "инцидент", "авария"];

fn keyword_fallback_escalates(raw_response: &str) -> bool {
    let lower = raw_response.to_lowercase();
    SECURITY_KEYWORDS_EN.iter().chain(SECURITY_KEYWORDS_RU.iter()).any(|kw| lower.contains(kw))
}

pub struct Agent {
    pub role: AgentRole,
    pub name: String,
    llm: Arc<LlmClient>,
    tools: Option<Arc<dyn ToolClient>>,
}

impl Agent {
    pub fn new(role: AgentRole, name: impl Into<String>, llm: Arc<LlmClient>) -> Self {
        Self { role, name: name.into(), llm, tools: None }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolClient>) -> Self {
        self.tools = Some(tools);
        self
    }

    fn system_prompt(&self) -> String {
        format!("You are the {} agent in a multi-agent engineering consilium.", self.role)
    }

    /// `Think(task) -> text`: two-pass optimization with an optional
    /// READ_FILE round-trip (spec.md §4.4).
    pub async fn think(&self, task: &str) -> String {
        let snapshot = self.snapshot().await;

        let pass1_messages = vec![
            ChatMessage::system(format!(
                "{}\nYou may request files with lines of the form 'READ_FILE: <relative-path>'. \
                 If you already have enough information, answer directly.",
                self.system_prompt()
            )),
            ChatMessage::user(format!("Repository snapshot:\n{snapshot}\n\nTask: {task}")),
        ];

        let pass1 = match self.llm.complete(&pass1_messages, 800).await {
            Ok(text) => text,
            Err(e) => return e.sentinel().to_string(),
        };

        let requested = parse_read_file_requests(&pass1);
        if requested.is_empty() {
            return pass1;
        }

        let files = self.read_requested_files(&requested).await;

        let pass2_messages = vec![
            ChatMessage::system(format!("{}\nProvide the FINAL answer; do not request more files.", self.system_prompt())),
            ChatMessage::user(format!(
                "Repository snapshot:\n{snapshot}\n\nTask: {task}\n\nYour earlier draft:\n{pass1}\n\nRequested files:\n{files}"
            )),
        ];

        match self.llm.complete(&pass2_messages, 800).await {
            Ok(text) => text,
            Err(e) => e.sentinel().to_string(),
        }
    }

    async fn snapshot(&self) -> String {
        match &self.tools {
            Some(tools) => match tools.list_dir(".").await {
                Ok(entries) => entries.iter().map(|e| format!("{} ({})", e.name, e.kind)).collect::<Vec<_>>().join("\n"),
                Err(_) => String::new(),
            },
            None => String::new(),
        }
    }

    async fn read_requested_files(&self, paths: &[String]) -> String {
        let Some(tools) = &self.tools else { return String::new() };

        let mut deduped = Vec::new();
        for p in paths {
            if !deduped.contains(p) {
                deduped.push(p.clone());
            }
        }
        deduped.truncate(MAX_READ_FILES);

        let mut out = String::new();
        for path in deduped {
            match tools.read_file(&path).await {
                Ok(content) => {
                    let truncated = if content.chars().count() > FILE_READ_CAP {
                        let head: String = content.chars().take(FILE_READ_CAP).collect();
                        format!("{head}\n...[truncated]")
                    } else {
                        content
                    };
                    out.push_str(&format!("--- {path} ---\n{truncated}\n\n"));
                }
                Err(e) => out.push_str(&format!("--- {path} ---\n[error reading file: {e}]\n\n")),
            }
        }
        out
    }

    /// 1-token "ping" used by the Consilium's pre-consult health check
    /// (spec.md §4.6 step 1).
    pub async fn ping(&self) -> crate::consilium::HealthCheckResult {
        let messages = vec![ChatMessage::user("ping")];
        match self.llm.complete(&messages, 1).await {
            Ok(_) => crate::consilium::HealthCheckResult { success: true, detail: "ok".to_string() },
            Err(e) => crate::consilium::HealthCheckResult { success: false, detail: e.sentinel().to_string() },
        }
    }

    /// `Triage(task) -> TriageResult` (spec.md §4.4).
    pub async fn triage(&self, task: &str) -> TriageResult {
        let system = "You are a triage agent. Analyze tasks and decide if consilium (multiple experts) is needed.\n\n\
            ALWAYS use this EXACT format:\n\
            ANSWER: <brief answer OR 'ESCALATE'>\n\
            NEEDS_CONSILIUM: <yes OR no>\n\
            REASON: <one sentence>\n\
            SUGGESTED_AGENTS: <comma list or 'none'>";

        let messages = vec![ChatMessage::system(system), ChatMessage::user(format!("Task: {task}"))];

        let response = match self.llm.complete(&messages, 350).await {
            Ok(text) => text,
            Err(e) => e.sentinel().to_string(),
        };

        parse_triage(&response)
    }
}

fn parse_read_file_requests(text: &str) -> Vec<String> {
    let re = Regex::new(r"(?m)^READ_FILE:\s*(.+)$").expect("valid regex");
    re.captures_iter(text).map(|c| c[1].trim().to_string()).collect()
}

fn parse_triage(response: &str) -> TriageResult {
    let needs_re = Regex::new(r"(?i)NEEDS_CONSILIUM:\s*(yes|no)").unwrap();
    let reason_re = Regex::new(r"(?i)REASON:\s*(.+)").unwrap();
    let agents_re = Regex::new(r"(?i)SUGGESTED_AGENTS:\s*(.+)").unwrap();
    let answer_re = Regex::new(r"(?is)ANSWER:\s*(.+?)(?:\nNEEDS_CONSILIUM|$)").unwrap();

    let mut needs_consilium = false;
    let mut explicit_needs_consilium = false;
    if let Some(c) = needs_re.captures(response) {
        needs_consilium = c[1].eq_ignore_ascii_case("yes");
        explicit_needs_consilium = true;
    }

    let mut reason = "No reason provided".to_string();
    if let Some(c) = reason_re.captures(response) {
        reason = c[1].trim().to_string();
    }

    let mut suggested_agents = Vec::new();
    if let Some(c) = agents_re.captures(response) {
        let raw = c[1].trim();
        if !raw.is_empty() && !["none", "empty", "-", "n/a"].contains(&raw.to_lowercase().as_str()) {
            suggested_agents = raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }

    let answer = answer_re
        .captures(response)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| response.trim().to_string());

    if !explicit_needs_consilium && keyword_fallback_escalates(response) {
        needs_consilium = true;
        reason = "Detected security/architecture/incident keywords (fallback)".to_string();
    }

    TriageResult { answer, needs_consilium, reason, suggested_agents }
}

/// Truncate to `max_len` chars, flattening newlines, matching the teacher's
/// `agent::truncate` helper.
pub fn truncate(s: &str, max_len: usize) -> String {
    let flattened = s.replace('\n', " ");
    if flattened.chars().count() <= max_len {
        flattened
    } else {
        let truncated: String = flattened.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triage_parses_exact_format() {
        let response = "ANSWER: ESCALATE\nNEEDS_CONSILIUM: yes\nREASON: Security review requires security expert.\nSUGGESTED_AGENTS: security,dev";
        let result = parse_triage(response);
        assert!(result.needs_consilium);
        assert_eq!(result.suggested_agents, vec!["security", "dev"]);
        assert_eq!(result.answer, "ESCALATE");
    }

    #[test]
    fn triage_fallback_on_missing_needs_consilium() {
        let response = "This looks like it needs a security review for JWT auth.";
        let result = parse_triage(response);
        assert!(result.needs_consilium);
    }

    #[test]
    fn triage_fallback_russian_keywords() {
        let response = "Похоже, требуется миграция базы данных.";
        let result = parse_triage(response);
        assert!(result.needs_consilium);
    }

    #[test]
    fn truncate_caps_length() {
        let long = "a".repeat(600);
        let t = truncate(&long, 500);
        assert_eq!(t.chars().count(), 500);
        assert!(t.ends_with("..."));
    }
}
