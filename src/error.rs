//! Error types for canvas-backup
//!
//! This module provides the error handling for the library:
//! - A top-level [`Error`] covering transport, HTTP, filesystem and configuration failures
//! - [`ExportError`] for content-export contract violations reported by the server
//! - Context information (course ID, export ID, endpoint, status code)

use thiserror::Error;

/// Result type alias for canvas-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for canvas-backup
///
/// Per-course failures are caught at the backup boundary and only surface to
/// the user as a `Failed` status; the variant and its context go to the log.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "canvas.base_url")
        key: Option<String>,
    },

    /// The API token was rejected by the server
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server answered with a non-success status (429 is retried, never reported here)
    #[error("HTTP {status} from {endpoint}")]
    Http {
        /// HTTP status code returned by the server
        status: u16,
        /// Endpoint or URL that was requested
        endpoint: String,
    },

    /// Network or transport error (connection refused, timeout, TLS, body decode)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The course list could not be read
    #[error("invalid course list: {0}")]
    Csv(String),

    /// Content export error
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// The operation was stopped by the cancellation signal
    #[error("operation cancelled")]
    Cancelled,

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Content export errors
#[derive(Debug, Error)]
pub enum ExportError {
    /// The server created an export but did not return its ID
    #[error("export for course {course_id} was created without an id")]
    MissingId {
        /// Course the export was requested for
        course_id: String,
    },

    /// The export resource has no progress URL to poll
    #[error("no progress URL available for export {export_id} of course {course_id}")]
    MissingProgressUrl {
        /// Course the export belongs to
        course_id: String,
        /// The export that could not be polled
        export_id: String,
    },

    /// The server reported the export job as failed
    #[error("export {export_id} of course {course_id} failed on the server")]
    Failed {
        /// Course the export belongs to
        course_id: String,
        /// The failed export
        export_id: String,
    },

    /// The export did not complete within the polling budget
    #[error("export {export_id} of course {course_id} did not complete after {attempts} checks")]
    TimedOut {
        /// Course the export belongs to
        course_id: String,
        /// The export that was polled
        export_id: String,
        /// Number of progress checks made
        attempts: u32,
    },
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// HTTP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
