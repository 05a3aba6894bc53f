//! Typed error kinds for the indexing core, per the error handling design.
//!
//! Recovery policy lives with the orchestrator, not here: this enum only names what went
//! wrong and carries enough context to log and report it. `ParseError`/`EmbedError` are
//! recorded and the run continues; `StoreError`/`InvariantViolation` are surfaced to the
//! caller; `StateError` triggers a fall back to an empty state snapshot.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("config error: {message}")]
    Config { message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to embed chunk {chunk_id}: {message}")]
    Embed { chunk_id: String, message: String },

    #[error("vector store operation '{operation}' failed on collection '{collection}': {message}")]
    Store {
        collection: String,
        operation: String,
        message: String,
    },

    #[error("state file unreadable or malformed at {path}: {message}")]
    State { path: PathBuf, message: String },

    #[error("orphan cleanup completed but invariant I1 does not hold: {message}")]
    InvariantViolation { message: String },
}

impl IndexError {
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, IndexError::Store { .. } | IndexError::Config { .. })
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
