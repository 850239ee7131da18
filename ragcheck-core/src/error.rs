//! Error types for the ragcheck core library.
//!
//! Uses `thiserror` for public API error types with structured variants for
//! record validation, scorer calls, checkpoint durability and configuration.
//! Only [`CheckpointError`] is ever surfaced by the batch manager; everything
//! below it is absorbed and turned into data (missing scores, error counters).

use std::path::PathBuf;

/// Top-level error type for the ragcheck core library.
#[derive(Debug, thiserror::Error)]
pub enum RagCheckError {
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Scorer error: {0}")]
    Scorer(#[from] ScorerError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from validating an evaluation record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("Record {index}: field '{field}' is empty")]
    EmptyField { index: usize, field: &'static str },

    #[error("Record {index}: no non-empty contexts")]
    NoContexts { index: usize },
}

/// Errors raised by a scorer implementation.
///
/// These never escape the timeout-bounded executor; they are captured into
/// an [`ExecutionOutcome::Failed`](crate::executor::ExecutionOutcome::Failed).
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("Scoring request failed: {message}")]
    Request { message: String },

    #[error("Scorer returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Scorer response could not be decoded: {message}")]
    BadResponse { message: String },

    #[error("Scorer rejected the batch: {reason}")]
    Rejected { reason: String },

    #[error("Scoring was cancelled")]
    Cancelled,

    #[error("Scoring task panicked: {message}")]
    Panicked { message: String },
}

/// Errors from the durable checkpoint store.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode checkpoint: {message}")]
    Encode { message: String },

    #[error("Failed to decode checkpoint {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Checksum mismatch in {path}")]
    ChecksumMismatch { path: PathBuf },

    #[error("Checkpoint store unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// A type alias for results using the top-level `RagCheckError`.
pub type Result<T, E = RagCheckError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_record() {
        let err = RagCheckError::Record(RecordError::EmptyField {
            index: 3,
            field: "answer",
        });
        assert_eq!(
            err.to_string(),
            "Record error: Record 3: field 'answer' is empty"
        );
    }

    #[test]
    fn test_error_display_checkpoint() {
        let err = RagCheckError::Checkpoint(CheckpointError::NotFound {
            session_id: "abc".into(),
        });
        assert_eq!(err.to_string(), "Checkpoint error: Session not found: abc");
    }

    #[test]
    fn test_scorer_error_variants() {
        let err = ScorerError::Status {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "Scorer returned status 503: overloaded");
        assert_eq!(ScorerError::Cancelled.to_string(), "Scoring was cancelled");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RagCheckError = io_err.into();
        assert!(matches!(err, RagCheckError::Io(_)));
    }

    #[test]
    fn test_config_error_helper() {
        let err = ConfigError::invalid("chunk_size must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: chunk_size must be > 0"
        );
    }
}
