//! Result and error types for Vistar.

use crate::report::BatchReport;
use thiserror::Error;

/// Result type for Vistar operations
pub type VistarResult<T> = Result<T, VistarError>;

/// Errors that can occur in Vistar
#[derive(Debug, Error)]
pub enum VistarError {
    /// The page could not be captured (not ready, stale handle, bad render).
    /// Callers may retry once the page is stable; the harness never retries.
    #[error("Capture failed: {message}")]
    Capture {
        /// Error message
        message: String,
    },

    /// Reading or writing a reference image failed
    #[error("Baseline store error for {key}: {message}")]
    BaselineStore {
        /// Baseline key the operation targeted
        key: String,
        /// Error message
        message: String,
    },

    /// A checkpoint was added to a session that is no longer open
    #[error("Session '{test_name}' is closed; cannot add checkpoint '{checkpoint}'")]
    SessionClosed {
        /// Test name of the session
        test_name: String,
        /// Checkpoint that was rejected
        checkpoint: String,
    },

    /// A session or batch was closed twice
    #[error("{subject} was already closed")]
    AlreadyClosed {
        /// What was closed (e.g. `session 'Login'`)
        subject: String,
    },

    /// `finish` timed out while sessions were still open
    #[error("Batch '{batch_name}' incomplete: {pending} session(s) still open after {waited_ms}ms")]
    IncompleteBatch {
        /// Batch display name
        batch_name: String,
        /// Sessions that never reported
        pending: usize,
        /// How long `finish` waited
        waited_ms: u64,
        /// Report built from the sessions that did report
        report: Box<BatchReport>,
    },

    /// Operation called in the wrong state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// Image decoding, encoding or cropping failed
    #[error("Image processing failed: {message}")]
    ImageProcessing {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl VistarError {
    /// Create a capture error
    #[must_use]
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    /// Create a baseline store error
    #[must_use]
    pub fn baseline_store(key: impl ToString, message: impl Into<String>) -> Self {
        Self::BaselineStore {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an image processing error
    #[must_use]
    pub fn image_processing(message: impl Into<String>) -> Self {
        Self::ImageProcessing {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation after the page settles
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Capture { .. })
    }

    /// Whether this error signals API misuse (wrong call order)
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed { .. } | Self::AlreadyClosed { .. } | Self::InvalidState { .. }
        )
    }

    /// Partial report carried by an [`VistarError::IncompleteBatch`]
    #[must_use]
    pub fn partial_report(&self) -> Option<&BatchReport> {
        match self {
            Self::IncompleteBatch { report, .. } => Some(report),
            _ => None,
        }
    }
}
