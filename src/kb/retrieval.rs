//! Retrieval with anti-ballast ordering and an LRU cache — spec.md §4.2.
//!
//! Grounded in `kb_manager.py::retrieve_kb` (partition into ballast/useful,
//! cap at one ballast chunk, truncate the overflowing chunk) and in the
//! teacher's own `agent/cache.rs` (async `RwLock`-guarded map as the shape
//! of a process-wide cache).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::kb::KBStore;
use crate::router::AgentRole;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Source {
    pub doc: String,
    pub section: String,
    pub ballast: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    pub chunks_used: usize,
    pub chars_used: usize,
    pub total_chunks: usize,
    pub ballast_used: usize,
    pub sources: Vec<Source>,
    pub cache: CacheOutcome,
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct CacheKey {
    role: AgentRole,
    normalized_query: String,
    kb_version: String,
    top_k: usize,
    max_chars: usize,
}

struct CachedEntry {
    result: RetrievalResult,
}

/// LRU cache over retrieval results, process-wide per Consilium instance.
/// `Mutex`-guarded per spec.md §5 ("guarded by a mutex; eviction is LRU on
/// insert").
pub struct Retriever {
    capacity: usize,
    cache: Mutex<LruMap>,
}

struct LruMap {
    map: HashMap<CacheKey, CachedEntry>,
    order: Vec<CacheKey>,
}

impl LruMap {
    fn new() -> Self {
        Self { map: HashMap::new(), order: Vec::new() }
    }

    fn get(&mut self, key: &CacheKey) -> Option<RetrievalResult> {
        if let Some(entry) = self.map.get(key) {
            let result = entry.result.clone();
            self.order.retain(|k| k != key);
            self.order.push(key.clone());
            Some(result)
        } else {
            None
        }
    }

    fn put(&mut self, key: CacheKey, result: RetrievalResult, capacity: usize) {
        if self.map.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.map.len() >= capacity && !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.map.remove(&oldest);
        }
        self.map.insert(key.clone(), CachedEntry { result });
        self.order.push(key);
    }
}

impl Retriever {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, cache: Mutex::new(LruMap::new()) }
    }

    /// `Retrieve(role, query) -> RetrievalResult` (spec.md §4.2).
    pub fn retrieve(&self, store: &KBStore, role: AgentRole, query: &str, top_k: usize, max_chars: usize) -> RetrievalResult {
        let key = CacheKey {
            role,
            normalized_query: normalize(query),
            kb_version: store.version_hash().to_string(),
            top_k,
            max_chars,
        };

        {
            let mut cache = self.cache.lock().expect("retrieval cache poisoned");
            if let Some(mut hit) = cache.get(&key) {
                hit.cache = CacheOutcome::Hit;
                return hit;
            }
        }

        let mut result = self.compute(store, role, top_k, max_chars);
        result.cache = CacheOutcome::Miss;

        let mut cache = self.cache.lock().expect("retrieval cache poisoned");
        cache.put(key, result.clone(), self.capacity);
        result
    }

    fn compute(&self, store: &KBStore, role: AgentRole, top_k: usize, max_chars: usize) -> RetrievalResult {
        let doc = match store.document(role) {
            Some(d) => d,
            None => {
                return RetrievalResult {
                    text: String::new(),
                    chunks_used: 0,
                    chars_used: 0,
                    total_chunks: 0,
                    ballast_used: 0,
                    sources: Vec::new(),
                    cache: CacheOutcome::Miss,
                }
            }
        };

        let total_chunks = doc.chunks.len();
        let (ballast, useful): (Vec<_>, Vec<_>) = doc.chunks.iter().partition(|c| c.is_ballast);

        let mut prioritized: Vec<&crate::kb::KBChunk> = useful.into_iter().take(top_k).collect();
        if prioritized.len() < top_k {
            if let Some(first_ballast) = ballast.first() {
                prioritized.push(first_ballast);
            }
        }
        prioritized.truncate(top_k);

        let mut selected_content = Vec::new();
        let mut sources = Vec::new();
        let mut chars_used = 0usize;
        let mut ballast_used = 0usize;

        for chunk in prioritized {
            if chars_used + chunk.content.len() <= max_chars {
                selected_content.push(chunk.content.clone());
                sources.push(Source { doc: chunk.doc.clone(), section: chunk.section.clone(), ballast: chunk.is_ballast });
                chars_used += chunk.content.len();
                if chunk.is_ballast {
                    ballast_used += 1;
                }
            } else {
                let remaining = max_chars.saturating_sub(chars_used);
                if remaining > 200 {
                    let truncated: String = chunk.content.chars().take(remaining).collect();
                    selected_content.push(format!("{truncated}..."));
                    sources.push(Source {
                        doc: chunk.doc.clone(),
                        section: format!("{} (truncated)", chunk.section),
                        ballast: chunk.is_ballast,
                    });
                    chars_used += remaining;
                    if chunk.is_ballast {
                        ballast_used += 1;
                    }
                }
                break;
            }
        }

        let chunks_used = selected_content.len();
        let text = selected_content.join("\n\n---\n\n");

        RetrievalResult {
            text,
            chunks_used,
            chars_used,
            total_chunks,
            ballast_used,
            sources,
            cache: CacheOutcome::Miss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::KBStore;

    fn sample_kb(role: AgentRole) -> KBStore {
        let md = "## Overview\n\nIntro text here.\n\n## Guidance\n\nDo the thing carefully.\n\n## Checklist\n\nCheck one. Check two.";
        KBStore::from_memory(vec![(role, "guide.md", md.to_string())])
    }

    #[test]
    fn anti_ballast_limit() {
        let store = sample_kb(AgentRole::Security);
        let retriever = Retriever::new(10);
        let result = retriever.retrieve(&store, AgentRole::Security, "checklist", 5, 4000);
        assert!(result.ballast_used <= 1);
    }

    #[test]
    fn retrieval_respects_limits() {
        let store = sample_kb(AgentRole::Security);
        let retriever = Retriever::new(10);
        let result = retriever.retrieve(&store, AgentRole::Security, "checklist", 2, 50);
        assert!(result.chunks_used <= 2);
        assert!(result.chars_used <= 50);
    }

    #[test]
    fn cache_idempotence() {
        let store = sample_kb(AgentRole::Security);
        let retriever = Retriever::new(10);
        let first = retriever.retrieve(&store, AgentRole::Security, "JWT auth", 5, 4000);
        let second = retriever.retrieve(&store, AgentRole::Security, "jwt   AUTH", 5, 4000);
        assert_eq!(first.text, second.text);
        assert_eq!(second.cache, CacheOutcome::Hit);
    }

    #[test]
    fn lru_eviction() {
        let store = sample_kb(AgentRole::Security);
        let retriever = Retriever::new(2);
        retriever.retrieve(&store, AgentRole::Security, "q1", 5, 4000);
        retriever.retrieve(&store, AgentRole::Security, "q2", 5, 4000);
        retriever.retrieve(&store, AgentRole::Security, "q3", 5, 4000);

        // q1 was the oldest insert and should now be evicted: re-querying it
        // must be a MISS, while q3 (most recent) remains a HIT.
        let q1_again = retriever.retrieve(&store, AgentRole::Security, "q1", 5, 4000);
        assert_eq!(q1_again.cache, CacheOutcome::Miss);

        let q3_again = retriever.retrieve(&store, AgentRole::Security, "q3", 5, 4000);
        assert_eq!(q3_again.cache, CacheOutcome::Hit);
    }
}
