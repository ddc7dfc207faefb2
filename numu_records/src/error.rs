//! Error types for event record retrieval.

use thiserror::Error;

/// Errors that can occur while reading event records.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Underlying reader failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record line could not be decoded
    #[error("Malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl RecordError {
    /// Creates a malformed-record error.
    pub fn malformed(line: usize, source: serde_json::Error) -> Self {
        Self::Malformed { line, source }
    }
}
