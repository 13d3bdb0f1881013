use std::path::PathBuf;
use thiserror::Error;

/// Fatal error kinds for the derivation engine.
///
/// Per-chunk classification failures are deliberately absent: they are
/// absorbed fail-safe into the merge and surfaced as [`crate::Warning`]
/// values, never as an `Err`.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The file cannot be treated as a session at all: empty, first line
    /// unparseable, or missing a session identity.
    #[error("malformed session {path}: {reason}")]
    MalformedSession { path: PathBuf, reason: String },

    /// Structural cues match neither supported wire schema.
    #[error("unknown agent family for {path}")]
    UnknownAgentFamily { path: PathBuf },

    /// A derivation could not be persisted. The final path is guaranteed
    /// untouched; the temporary file has been discarded.
    #[error("derivation write failed: {reason}")]
    DerivationWriteFailure { reason: String },

    /// A lineage chain references the session it belongs to, or repeats an
    /// ancestor. Unreachable under the write discipline (every derivation
    /// is a brand-new file), kept as a defensive check.
    #[error("lineage cycle detected involving {path}")]
    LineageCycleDetected { path: PathBuf },

    /// The classification phase could not start at all (e.g. collaborator
    /// binary unavailable). Individual chunk failures never raise this.
    #[error("classification unavailable: {reason}")]
    ClassificationUnavailable { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SagaError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedSession {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn write_failure(reason: impl Into<String>) -> Self {
        Self::DerivationWriteFailure {
            reason: reason.into(),
        }
    }
}
