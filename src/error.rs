//! Error taxonomy for the query pipeline.
//!
//! Extraction failure is fatal to a query: the orchestrator must abort
//! before retrieval or generation so that unanonymized text never leaves
//! the trust boundary. Retrieval and generation failures end the query
//! with a generic message but never crash the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssistantError {
    /// No parsable structured payload could be obtained from the
    /// anonymization model within the retry limit.
    #[error("could not extract structured sensitive data after {attempts} attempts")]
    Extraction { attempts: usize },

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] anyhow::Error),

    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
