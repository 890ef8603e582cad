//! Core data models used throughout the assistant.
//!
//! These types represent the sensitive-data items, document chunks, and
//! query results that flow through the anonymization and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One detected piece of personally identifiable information.
///
/// The wire keys (`categoria`/`valor`) match the JSON format the
/// anonymization model is instructed to emit. `category` is an open-ended
/// tag (`nome`, `cpf`, `telefone`, `nome_parente`, ...); `value` is the
/// exact substring as it appears in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveItem {
    #[serde(rename = "categoria")]
    pub category: String,
    #[serde(rename = "valor")]
    pub value: String,
}

/// The parsed outcome of a sensitive-data extraction.
///
/// An empty item list is the valid "nothing found" result and is distinct
/// from an extraction failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    pub items: Vec<SensitiveItem>,
}

/// Placeholder token (`[CATEGORY]`) → original value.
///
/// Built fresh for each query; its lifetime is one anonymize→deanonymize
/// round trip. Later items of the same category overwrite earlier map
/// entries (last-wins), but substitutions already applied to the text are
/// not undone.
pub type ReplacementMap = BTreeMap<String, String>;

/// A page of text extracted from a source document.
#[derive(Debug, Clone)]
pub struct PageBlock {
    /// Source document file name.
    pub source: String,
    /// Zero-based page number within the document.
    pub page: i64,
    pub text: String,
}

/// A retrieval unit: one bounded, overlapping slice of a document page.
///
/// `id` is derived deterministically as `{source}:{page}:{chunk_index}`,
/// which keeps re-ingestion idempotent (dedup by id). `hash` is the SHA-256
/// of the content and detects in-place document edits that keep the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub page: i64,
    pub chunk_index: i64,
    pub content: String,
    pub hash: String,
}

/// A similarity-search hit with its relevance score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of in-session conversation history. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Terminal state of one query through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// The pipeline ran to completion.
    Answered,
    /// Sensitive-data extraction failed after all retries; retrieval and
    /// generation were never reached.
    ExtractionFailed,
    /// Retrieval or generation failed after a successful anonymization.
    PipelineFailed,
}

/// Reference to a retrieved chunk, kept in the report for audit.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub score: f32,
}

/// Everything the pipeline produced for one query.
///
/// The anonymized query, the raw (still-anonymized) model response, and the
/// replacement map are surfaced alongside the final answer so callers can
/// show exactly what left the trust boundary. An empty `replacements` map
/// means no sensitive data was found.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub status: QueryStatus,
    pub final_response: String,
    pub anonymized_query: String,
    pub raw_response: String,
    pub replacements: ReplacementMap,
    pub sources: Vec<SourceRef>,
}
