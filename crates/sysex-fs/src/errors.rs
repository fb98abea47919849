//! Error type shared by every layer: transport, sysex exchanges, dialects and
//! the filesystem helpers.

use serde::Serialize;

/// Error types for backend operations.
///
/// `NotFound` doubles as the "dialect does not match" signal during detection:
/// the dispatcher swallows it and tries the next connector. Every other variant
/// is propagated unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum BackendError {
    /// Device absent or not recognized by the dialect.
    #[error("Not found: {message}")]
    NotFound { message: String },
    /// No response before the deadline.
    #[error("Timed out after {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },
    /// Cooperative abort through the job's cancel token.
    #[error("Operation cancelled")]
    Cancelled,
    /// Transport-level fault.
    #[error("I/O error: {message}")]
    Io { message: String },
    /// Malformed or out-of-range payload.
    #[error("Bad message: {message}")]
    BadMessage { message: String },
    /// The connected dialect does not implement the operation.
    #[error("Operation not supported: {operation}")]
    NotSupported { operation: String },
    /// The path is not a listable directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: String },
    /// The path could not be resolved to a filesystem or item.
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

impl BackendError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn bad_message(message: impl Into<String>) -> Self {
        Self::BadMessage {
            message: message.into(),
        }
    }

    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// True for the dialect mismatch outcome of a handshake.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the operation may succeed if retried by the user.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { .. } => "No supported device found. Check the cable and the MIDI port.".to_string(),
            Self::TimedOut { .. } => {
                "The device did not answer in time. It may be busy or switched off. Try again.".to_string()
            }
            Self::Cancelled => "The operation was cancelled.".to_string(),
            Self::Io { message } => format!("Communication with the device failed: {}", message),
            Self::BadMessage { message } => format!("The data is not valid for this device: {}", message),
            Self::NotSupported { operation } => format!("This device does not support '{}'.", operation),
            Self::NotADirectory { path } => format!("{} is not a folder.", path),
            Self::InvalidPath { path } => format!("{} is not a valid location on this device.", path),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::TimedOut => Self::TimedOut { timeout_ms: 0 },
            _ => Self::io(err.to_string()),
        }
    }
}
