use serde::{Deserialize, Serialize};
use std::{backtrace::Backtrace, backtrace::BacktraceStatus, error::Error, fmt};

/// Name carried by [ErrorInfo] for a cancelled lock request.
pub const CANCELLATION_ERROR: &str = "CancellationError";

/// Name carried by [ErrorInfo] when the authority lost its connection.
pub const DISCONNECTED_ERROR: &str = "DisconnectedError";

/// An error occurred while acquiring a read or write lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockError {
    /// The request was cancelled before the lock was granted.
    Cancelled,
    /// The authority rejected the request.
    Relay(ErrorInfo),
    /// The message channel to the authority has been closed.
    Disconnected,
}

impl LockError {
    /// True, if the request was cancelled before being granted.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "lock request cancelled"),
            Self::Relay(info) => write!(f, "lock authority error: {}", info),
            Self::Disconnected => write!(f, "lock authority disconnected"),
        }
    }
}

impl Error for LockError {}

/// Serializable description of an error, exchanged between authority and subordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error kind.
    pub name: String,
    /// Human readable message.
    pub message: String,
    /// Backtrace captured where the error was reported, if enabled.
    #[serde(default)]
    pub stack: String,
}

impl ErrorInfo {
    /// Creates an error description, capturing a backtrace if `RUST_BACKTRACE` is set.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => backtrace.to_string(),
            _ => String::new(),
        };
        Self { name: name.into(), message: message.into(), stack }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", &self.name, &self.message)
    }
}

impl Error for ErrorInfo {}

impl From<&LockError> for ErrorInfo {
    fn from(err: &LockError) -> Self {
        match err {
            LockError::Cancelled => Self::new(CANCELLATION_ERROR, err.to_string()),
            LockError::Relay(info) => info.clone(),
            LockError::Disconnected => Self::new(DISCONNECTED_ERROR, err.to_string()),
        }
    }
}

impl From<ErrorInfo> for LockError {
    fn from(info: ErrorInfo) -> Self {
        match info.name.as_str() {
            CANCELLATION_ERROR => Self::Cancelled,
            _ => Self::Relay(info),
        }
    }
}
