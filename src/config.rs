//! Runtime configuration loaded from the environment.
//!
//! Mirrors the options table in spec.md §6. Every value has a default so the
//! runtime starts without any configuration present.

use crate::router::Mode;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Static fallback mode used when smart routing is disabled.
    pub consilium_mode: Mode,
    /// Max chunks per KB retrieval.
    pub kb_top_k: usize,
    /// Max characters per KB retrieval.
    pub kb_max_chars: usize,
    /// LRU capacity for the retrieval cache.
    pub kb_cache_size: usize,
    /// Initial Director circuit-breaker mode.
    pub director_mode: crate::director::circuit::DirectorMode,
    pub openai_api_key: Option<String>,
    pub director_llm_url: Option<String>,
    pub director_model: String,
    pub llm_url: String,
    pub tool_url: String,
    pub tool_bearer_token: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            consilium_mode: Mode::Standard,
            kb_top_k: 5,
            kb_max_chars: 4000,
            kb_cache_size: 100,
            director_mode: crate::director::circuit::DirectorMode::Off,
            openai_api_key: None,
            director_llm_url: None,
            director_model: "gpt-5.2".to_string(),
            llm_url: "http://localhost:8000/v1".to_string(),
            tool_url: "http://localhost:8001".to_string(),
            tool_bearer_token: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for any option that is unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let consilium_mode = std::env::var("CONSILIUM_MODE")
            .ok()
            .and_then(|v| Mode::from_str_loose(&v))
            .unwrap_or(defaults.consilium_mode);

        let kb_top_k = std::env::var("KB_TOP_K")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.kb_top_k);

        let kb_max_chars = std::env::var("KB_MAX_CHARS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.kb_max_chars);

        let kb_cache_size = std::env::var("KB_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.kb_cache_size);

        let director_mode = std::env::var("DIRECTOR_MODE")
            .ok()
            .map(|v| crate::director::circuit::DirectorMode::from_str_loose(&v))
            .unwrap_or(defaults.director_mode);

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let director_llm_url = std::env::var("DIRECTOR_LLM_URL").ok();
        let director_model =
            std::env::var("DIRECTOR_MODEL").unwrap_or(defaults.director_model);
        let llm_url = std::env::var("LLM_URL").unwrap_or(defaults.llm_url);
        let tool_url = std::env::var("TOOL_URL").unwrap_or(defaults.tool_url);
        let tool_bearer_token = std::env::var("TOOL_BEARER_TOKEN").ok();

        Self {
            consilium_mode,
            kb_top_k,
            kb_max_chars,
            kb_cache_size,
            director_mode,
            openai_api_key,
            director_llm_url,
            director_model,
            llm_url,
            tool_url,
            tool_bearer_token,
        }
    }
}
