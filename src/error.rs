//! Error types for retrieval, reconciliation and conversion.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during a retrieval session or a conversion request.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// Malformed descriptor document.
    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),

    /// JSON serialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// The destination directory is missing or cannot be written.
    #[error("Folder to write downloaded files doesn't exist or is not writeable: {}", .0.display())]
    DestinationNotWritable(PathBuf),

    /// No remote day directory at or before the requested day.
    #[error("No data available for requested days (nothing at or before {0})")]
    NoDataAvailable(String),

    /// The retrieval window parameters are unusable.
    #[error("Invalid retrieval window: {0}")]
    InvalidWindow(String),

    /// A remote or local name does not follow the tile naming convention.
    #[error("Malformed file name '{name}': {reason}")]
    MalformedFileName { name: String, reason: String },

    /// A configuration value is outside its allowed set.
    #[error("Invalid value '{value}' for {option}, expected one of: {allowed}")]
    InvalidOption {
        option: &'static str,
        value: String,
        allowed: String,
    },

    /// The remote repository refused an operation permanently.
    #[error("Remote operation failed: {0}")]
    Remote(#[from] RemoteError),

    /// A retried step ran out of attempts.
    #[error("Giving up on {operation} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        last_error: RemoteError,
    },

    /// The session was interrupted while waiting to repeat a step.
    #[error("Interrupted while {operation}")]
    Cancelled { operation: String },

    /// A required input file for a conversion does not exist.
    #[error("{} not exist", .0.display())]
    MissingInput(PathBuf),

    /// The external tool installation is incomplete.
    #[error("External tool not found: {}", .0.display())]
    ToolNotFound(PathBuf),

    /// The external tool exited unsuccessfully.
    #[error("{tool} failed with {status}")]
    ToolFailed { tool: String, status: String },

    /// A descriptor document lacks a required element.
    #[error("Descriptor {document} has no {element} element")]
    Descriptor { document: String, element: String },
}

/// Failures reported by the remote repository capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The control connection is unusable (reset, timeout, refused).
    #[error("connection error: {0}")]
    Connection(String),

    /// A protocol reply signalling a temporary condition.
    #[error("transient reply: {0}")]
    Transient(String),

    /// A protocol reply that will not succeed on retry (bad credentials, missing file).
    #[error("permanent reply: {0}")]
    Permanent(String),
}

impl RemoteError {
    /// Whether repeating the step may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RemoteError::Permanent(_))
    }

    /// Whether the session must be re-established before the next attempt.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, RemoteError::Connection(_))
    }
}
