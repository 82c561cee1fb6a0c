// Error taxonomy for the ingestion pipeline
//
// Submission-fatal:  ParseError, StructuralError  → zero writes
// Record-level:      PersistenceError             → record Failed, siblings continue
// (FieldViolation and ResolutionAmbiguity are data, not errors - see rules.rs / resolver.rs)

use crate::structural::Discrepancy;
use thiserror::Error;

// ============================================================================
// PARSE ERRORS (fatal to the submission)
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("submission is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("submission has no header line")]
    MissingHeader,

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("missing root element <{0}>")]
    MissingRoot(&'static str),

    #[error("element <{0}> is never closed")]
    Unclosed(String),

    #[error("xml error at byte {position}: {message}")]
    Xml { position: u64, message: String },
}

// ============================================================================
// STRUCTURAL ERRORS (fatal, carries every discrepancy)
// ============================================================================

#[derive(Debug, Error)]
#[error("submission rejected with {} structural discrepancies: {}", .discrepancies.len(), join_discrepancies(.discrepancies))]
pub struct StructuralError {
    pub discrepancies: Vec<Discrepancy>,
}

fn join_discrepancies(discrepancies: &[Discrepancy]) -> String {
    discrepancies
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// PERSISTENCE ERRORS (record-level)
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// Lock contention or a busy database - worth retrying
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Permanent(String),
}

impl PersistenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Transient(_))
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref inner, _)
                if matches!(
                    inner.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                PersistenceError::Transient(err.to_string())
            }
            other => PersistenceError::Permanent(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Permanent(format!("event payload: {}", err))
    }
}

// ============================================================================
// CONFIG ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Invalid(String),
}

// ============================================================================
// UMBRELLA
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IngestError {
    /// True for errors that reject the whole submission before any write
    pub fn is_submission_fatal(&self) -> bool {
        matches!(self, IngestError::Parse(_) | IngestError::Structural(_))
    }
}
