//! Knowledge Base Store and Chunker — spec.md §4.1.
//!
//! Grounded in `kb_manager.py::_load_kb`/`_chunk_kb` from the original
//! implementation: markdown split on `## ` headings, oversized sections
//! re-split on paragraph boundaries into ~1500 char pieces.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::router::AgentRole;

const BALLAST_SECTIONS: &[&str] = &["introduction", "scope", "overview", "about", "preface"];
const SECTION_SPLIT_THRESHOLD: usize = 2000;
const SUBCHUNK_TARGET: usize = 1500;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KBChunk {
    pub content: String,
    pub doc: String,
    pub section: String,
    pub is_ballast: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KBDocument {
    pub doc_name: String,
    pub chunks: Vec<KBChunk>,
}

fn normalize_section_title(title: &str) -> String {
    let trimmed = title
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == ')' || c == '.' || c == '-' || c.is_whitespace());
    let lower = trimmed.to_lowercase();
    lower.split('(').next().unwrap_or("").trim().to_string()
}

fn is_ballast(section_title: &str) -> bool {
    BALLAST_SECTIONS.contains(&normalize_section_title(section_title).as_str())
}

fn chunk_markdown(content: &str, doc_name: &str) -> Vec<KBChunk> {
    let mut chunks = Vec::new();

    // Split on a `## ` heading at the start of a line, keeping delimiters.
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line.starts_with("## ") && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }

    for section in &sections {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }

        let section_title = section
            .lines()
            .next()
            .map(|l| l.trim_start_matches("## ").trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Introduction".to_string());

        if section.len() > SECTION_SPLIT_THRESHOLD {
            let mut current_chunk = String::new();
            let mut idx = 0usize;
            for para in section.split("\n\n") {
                if current_chunk.len() + para.len() < SUBCHUNK_TARGET {
                    current_chunk.push_str(para);
                    current_chunk.push_str("\n\n");
                } else {
                    if !current_chunk.trim().is_empty() {
                        idx += 1;
                        let title = format!("{section_title} (part {idx})");
                        chunks.push(KBChunk {
                            content: current_chunk.trim().to_string(),
                            doc: doc_name.to_string(),
                            is_ballast: is_ballast(&section_title),
                            section: title,
                        });
                    }
                    current_chunk = format!("{para}\n\n");
                }
            }
            if !current_chunk.trim().is_empty() {
                idx += 1;
                let title = if idx > 1 {
                    format!("{section_title} (part {idx})")
                } else {
                    section_title.clone()
                };
                chunks.push(KBChunk {
                    content: current_chunk.trim().to_string(),
                    doc: doc_name.to_string(),
                    is_ballast: is_ballast(&section_title),
                    section: title,
                });
            }
        } else {
            chunks.push(KBChunk {
                content: section.to_string(),
                doc: doc_name.to_string(),
                is_ballast: is_ballast(&section_title),
                section: section_title,
            });
        }
    }

    if chunks.is_empty() && !content.is_empty() {
        chunks.push(KBChunk {
            content: content.chars().take(SECTION_SPLIT_THRESHOLD).collect(),
            doc: doc_name.to_string(),
            section: "Full document".to_string(),
            is_ballast: false,
        });
    }

    chunks
}

/// 8-hex digest over the sorted `(path, content)` pairs of every loaded KB.
fn version_hash(entries: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = entries.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for (path, content) in sorted {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(content.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let full: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    full[..8].to_string()
}

pub struct KBStore {
    docs: BTreeMap<AgentRole, KBDocument>,
    version_hash: String,
}

impl KBStore {
    /// Load `(role, path)` pairs from disk. A missing file yields an empty
    /// chunk list rather than an error (spec.md §4.1, §7).
    pub fn load(mapping: &[(AgentRole, &Path)]) -> Self {
        let mut docs = BTreeMap::new();
        let mut hash_inputs = Vec::new();

        for (role, path) in mapping {
            let doc_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown.md".to_string());

            match std::fs::read_to_string(path) {
                Ok(content) => {
                    hash_inputs.push((path.to_string_lossy().to_string(), content.clone()));
                    let chunks = chunk_markdown(&content, &doc_name);
                    docs.insert(*role, KBDocument { doc_name, chunks });
                }
                Err(_) => {
                    docs.insert(*role, KBDocument { doc_name, chunks: Vec::new() });
                }
            }
        }

        let version_hash = version_hash(&hash_inputs);
        Self { docs, version_hash }
    }

    /// Build a store directly from in-memory markdown, for tests and for
    /// embedding default KBs without touching the filesystem.
    pub fn from_memory(entries: Vec<(AgentRole, &str, String)>) -> Self {
        let mut docs = BTreeMap::new();
        let mut hash_inputs = Vec::new();
        for (role, doc_name, content) in entries {
            hash_inputs.push((format!("{role}:{doc_name}"), content.clone()));
            let chunks = chunk_markdown(&content, doc_name);
            docs.insert(role, KBDocument { doc_name: doc_name.to_string(), chunks });
        }
        let version_hash = version_hash(&hash_inputs);
        Self { docs, version_hash }
    }

    pub fn version_hash(&self) -> &str {
        &self.version_hash
    }

    pub fn document(&self, role: AgentRole) -> Option<&KBDocument> {
        self.docs.get(&role)
    }

    pub fn stats(&self) -> BTreeMap<AgentRole, usize> {
        self.docs.iter().map(|(role, doc)| (*role, doc.chunks.len())).collect()
    }
}

pub mod retrieval;
pub use retrieval::{RetrievalResult, Retriever, Source};
