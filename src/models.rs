//! Core data models used throughout the assistant.
//!
//! These types represent the vault files, chunks, intents and responses
//! that flow through the sync and question-answering pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed answer when retrieval or grounding produced no evidence.
pub const NO_INFORMATION: &str = "I don't have that information in my vault yet.";

/// Fixed answer when the pipeline failed upstream.
pub const APOLOGY: &str = "My brain just lagged. Say that again?";

/// Session id used when the caller does not supply one.
pub const DEFAULT_SESSION: &str = "default";

/// A note file read from the vault, already split into chunks.
#[derive(Debug, Clone, Serialize)]
pub struct VaultFile {
    pub name: String,
    pub path: String,
    pub extension: String,
    pub chunks: Vec<Chunk>,
}

/// A fixed-size word slice of a vault file.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub source_file: String,
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, used to reuse embeddings across resyncs.
    #[serde(skip)]
    pub hash: String,
}

/// A chunk returned from retrieval, with its backend score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub file: String,
    pub chunk: String,
    pub score: f64,
}

/// What kind of question the user asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// A self-contained question about the vault.
    Factual,
    /// A follow-up that only makes sense given the previous question.
    Continuation,
    /// Small talk.
    Casual,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Factual => "factual",
            Intent::Continuation => "continuation",
            Intent::Casual => "casual",
        }
    }

    /// Parse a category name, ignoring case and surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "factual" => Some(Intent::Factual),
            "continuation" => Some(Intent::Continuation),
            "casual" => Some(Intent::Casual),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One question/answer exchange in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: Option<String>,
}

/// Result of a vault sync, surfaced to callers as metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncInfo {
    pub vault_path: String,
    pub file_count: usize,
    pub empty_files: usize,
    pub indexed_files: usize,
    /// Unix timestamp (fractional seconds) of when the sync finished.
    pub last_indexed: f64,
}

/// Per-answer diagnostics returned alongside a grounded answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerMetadata {
    pub chunks_retrieved: usize,
    pub sentences_grounded: usize,
    pub intent: Intent,
}

/// The `/ask` response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnswerMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_performed: Option<SyncInfo>,
}

impl AskResponse {
    pub fn plain(answer: impl Into<String>, sync: Option<SyncInfo>) -> Self {
        Self {
            answer: answer.into(),
            metadata: None,
            sync_performed: sync,
        }
    }
}

/// Facts extracted from grounded evidence, keyed by subject.
pub type Facts = BTreeMap<String, String>;
