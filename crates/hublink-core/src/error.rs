/*!
 * Error types and status codes for hublink.
 *
 * Every failure carries both a typed [`Error`] and a numeric [`StatusCode`].
 * Which one reaches the caller depends on the [`ErrorMode`] of the context.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for hublink operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The identifier did not resolve to any known function
    #[error("Not found: {0}")]
    NotFound(String),

    /// The function resolved but its module is not reachable
    #[error("Offline: {0}")]
    Offline(String),

    /// Transport or hub failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The value or argument is not accepted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The hub did not answer in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The context has no hub or has been torn down
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed payload from the hub
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for hublink operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new not found error
    pub fn not_found<S: AsRef<str>>(msg: S) -> Self {
        Error::NotFound(msg.as_ref().to_string())
    }

    /// Create a new offline error
    pub fn offline<S: AsRef<str>>(msg: S) -> Self {
        Error::Offline(msg.as_ref().to_string())
    }

    /// Create a new I/O error
    pub fn io<S: AsRef<str>>(msg: S) -> Self {
        Error::Io(msg.as_ref().to_string())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidArgument(msg.as_ref().to_string())
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::Timeout(msg.as_ref().to_string())
    }

    /// Create a new not initialized error
    pub fn not_initialized<S: AsRef<str>>(msg: S) -> Self {
        Error::NotInitialized(msg.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new serialization error
    pub fn serialization<S: AsRef<str>>(msg: S) -> Self {
        Error::Serialization(msg.as_ref().to_string())
    }

    /// The status code reported for this error in status-code mode
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NotFound,
            Error::Offline(_) => StatusCode::Offline,
            Error::InvalidArgument(_) => StatusCode::InvalidArgument,
            Error::Timeout(_) => StatusCode::Timeout,
            Error::NotInitialized(_) => StatusCode::NotInitialized,
            Error::Io(_) | Error::Config(_) | Error::Serialization(_) => StatusCode::IoError,
        }
    }

    /// Whether the failure means the module cannot currently be reached
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Offline(_) | Error::Io(_) | Error::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Numeric outcome of an operation, as returned in status-code mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// The operation succeeded
    Success = 0,
    /// No hub registered or the context was torn down
    NotInitialized = -1,
    /// Value or argument rejected before any I/O
    InvalidArgument = -2,
    /// Identifier did not resolve
    NotFound = -4,
    /// Resolved but unreachable
    Offline = -6,
    /// Hub did not answer in time
    Timeout = -7,
    /// Transport or hub failure
    IoError = -8,
}

impl StatusCode {
    /// The numeric value of the code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether this code reports success
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Success
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// How attribute failures reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Failures are returned as `Err`
    Propagate,
    /// Reads yield the attribute's invalid sentinel and writes yield a negative
    /// [`StatusCode`]; the failure is recorded as the context's last status
    StatusCodes,
}

impl Default for ErrorMode {
    fn default() -> Self {
        ErrorMode::Propagate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::not_found("x").status(), StatusCode::NotFound);
        assert_eq!(Error::offline("x").status(), StatusCode::Offline);
        assert_eq!(Error::io("x").status(), StatusCode::IoError);
        assert_eq!(Error::serialization("x").status(), StatusCode::IoError);
        assert_eq!(Error::invalid_argument("x").status(), StatusCode::InvalidArgument);
        assert_eq!(Error::timeout("x").status(), StatusCode::Timeout);
        assert_eq!(Error::not_initialized("x").status(), StatusCode::NotInitialized);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StatusCode::Success.code(), 0);
        assert_eq!(StatusCode::IoError.code(), -8);
        assert!(StatusCode::Success.is_success());
        assert!(!StatusCode::Timeout.is_success());
        assert_eq!(StatusCode::NotFound.to_string(), "NotFound (-4)");
    }

    #[test]
    fn test_unreachable() {
        assert!(Error::timeout("x").is_unreachable());
        assert!(!Error::invalid_argument("x").is_unreachable());
    }

    #[test]
    fn test_error_mode_serde() {
        let mode: ErrorMode = serde_json::from_str("\"status_codes\"").unwrap();
        assert_eq!(mode, ErrorMode::StatusCodes);
        assert_eq!(ErrorMode::default(), ErrorMode::Propagate);
    }
}
