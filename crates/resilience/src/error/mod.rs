//! Error types and failure classification
//!
//! Retry decisions never look at concrete error types. Every failure is
//! classified once into a small [`FailureReason`] tag through the
//! [`ErrorClassification`] trait, and retry conditions are predicates over
//! that tag. This keeps retry policy independent of the error hierarchies of
//! whatever client library produced the failure.
//!
//! | Reason | Typical source | Retried by presets |
//! |--------|----------------|--------------------|
//! | `Connection` | refused/reset sockets, DNS, broken pipes | network, service, datastore |
//! | `Timeout` | deadlines, read timeouts | network, service, datastore |
//! | `RateLimited` | HTTP 429, quota errors | service |
//! | `ServerError` | HTTP 5xx, gateway errors | service |
//! | `Deadlock` | lock contention, serialization failures | datastore |
//! | `CircuitOpen` / `CircuitBusy` | breaker rejections | never (opt-in) |
//! | `Fatal` | everything else | never |
//!
//! ## Implementing classification for your own error
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark_resilience::{ErrorClassification, FailureReason};
//!
//! #[derive(Debug)]
//! enum ApiError {
//!     Throttled { retry_after: Duration },
//!     BadRequest,
//! }
//!
//! impl ErrorClassification for ApiError {
//!     fn failure_reason(&self) -> FailureReason {
//!         match self {
//!             Self::Throttled { .. } => FailureReason::RateLimited,
//!             Self::BadRequest => FailureReason::Fatal,
//!         }
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         match self {
//!             Self::Throttled { retry_after } => Some(*retry_after),
//!             Self::BadRequest => None,
//!         }
//!     }
//! }
//!
//! let err = ApiError::Throttled { retry_after: Duration::from_secs(3) };
//! assert_eq!(err.failure_reason(), FailureReason::RateLimited);
//! assert!(ApiError::BadRequest.failure_reason().is_fatal());
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error type for callbacks and opaque sources
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building or loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of its accepted range
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// The settings document could not be parsed
    #[error("Failed to parse settings")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    /// The settings file could not be read
    #[error("Failed to read settings file '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    /// Create an invalid-value error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(source: toml::de::Error) -> Self {
        Self::Parse { source }
    }
}

/// Tagged classification of why an operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Could not reach the dependency
    Connection,
    /// The dependency did not answer in time
    Timeout,
    /// The dependency asked us to slow down
    RateLimited,
    /// The dependency reported an internal failure
    ServerError,
    /// Datastore lock contention or serialization conflict
    Deadlock,
    /// A circuit breaker rejected the call without attempting it
    CircuitOpen,
    /// A half-open circuit breaker was already running its probe
    CircuitBusy,
    /// Anything that will not improve by trying again
    Fatal,
}

impl FailureReason {
    /// Stable snake_case name, matching the settings file spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Deadlock => "deadlock",
            Self::CircuitOpen => "circuit_open",
            Self::CircuitBusy => "circuit_busy",
            Self::Fatal => "fatal",
        }
    }

    /// True for the two synthetic breaker rejections
    pub fn is_circuit_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::CircuitBusy)
    }

    /// True when no retry condition should ever treat this reason as transient
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Classify an opaque error message by keyword.
    ///
    /// Checks run from most to least specific, so "lock wait timeout" is a
    /// deadlock and "connection timed out" is a timeout.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| msg.contains(needle));

        if has(&["rate limit", "too many requests", "429", "throttl", "quota exceeded"]) {
            Self::RateLimited
        } else if has(&["deadlock", "database is locked", "lock wait", "serialization failure"]) {
            Self::Deadlock
        } else if has(&["timeout", "timed out", "deadline exceeded"]) {
            Self::Timeout
        } else if has(&[
            "connection",
            "refused",
            "reset by peer",
            "broken pipe",
            "unreachable",
            "dns",
            "network",
        ]) {
            Self::Connection
        } else if has(&[
            "500",
            "502",
            "503",
            "504",
            "bad gateway",
            "service unavailable",
            "internal server error",
        ]) {
            Self::ServerError
        } else {
            Self::Fatal
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies an error for retry decisions
///
/// Implementations should be cheap and pure: the retry engine calls both
/// methods exactly once per failed attempt.
pub trait ErrorClassification {
    /// The tagged reason this error represents
    fn failure_reason(&self) -> FailureReason;

    /// A server-supplied "retry after" hint, if the error carries one
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl<T: ErrorClassification + ?Sized> ErrorClassification for Box<T> {
    fn failure_reason(&self) -> FailureReason {
        (**self).failure_reason()
    }

    fn retry_after(&self) -> Option<Duration> {
        (**self).retry_after()
    }
}

impl ErrorClassification for io::Error {
    fn failure_reason(&self) -> FailureReason {
        match self.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => FailureReason::Connection,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                FailureReason::Timeout
            }
            io::ErrorKind::Other => FailureReason::from_message(&self.to_string()),
            _ => FailureReason::Fatal,
        }
    }
}

/// Ready-made classified error for callers wrapping dependencies that have
/// no error type of their own
#[derive(Debug, Clone, Error)]
pub enum DependencyError {
    /// The dependency could not be reached
    #[error("Connection to '{service}' failed: {message}")]
    Connection { service: String, message: String },

    /// The dependency did not respond in time
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    /// The dependency throttled the caller
    #[error("Rate limited by '{service}'")]
    RateLimited { service: String, retry_after: Option<Duration> },

    /// The dependency answered with a server-side failure
    #[error("Server error from '{service}' (status {status}): {message}")]
    Server { service: String, status: u16, message: String },

    /// The dependency rejected the request itself
    #[error("Request rejected by '{service}' (status {status}): {message}")]
    Rejected { service: String, status: u16, message: String },

    /// Datastore lock contention
    #[error("Deadlock detected: {message}")]
    Deadlock { message: String },

    /// Anything else
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DependencyError {
    /// Create a connection error
    pub fn connection<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Connection { service: service.into(), message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a rate limit error, optionally carrying the server hint
    pub fn rate_limited<S: Into<String>>(service: S, retry_after: Option<Duration>) -> Self {
        Self::RateLimited { service: service.into(), retry_after }
    }

    /// Create an error from an HTTP status code.
    ///
    /// 429 becomes [`DependencyError::RateLimited`], 5xx becomes
    /// [`DependencyError::Server`], anything else is a rejection.
    pub fn from_status<S: Into<String>, M: Into<String>>(
        service: S,
        status: u16,
        message: M,
    ) -> Self {
        let service = service.into();
        match status {
            429 => Self::RateLimited { service, retry_after: None },
            500..=599 => Self::Server { service, status, message: message.into() },
            _ => Self::Rejected { service, status, message: message.into() },
        }
    }

    /// Create a deadlock error
    pub fn deadlock<S: Into<String>>(message: S) -> Self {
        Self::Deadlock { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl ErrorClassification for DependencyError {
    fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Connection { .. } => FailureReason::Connection,
            Self::Timeout { .. } => FailureReason::Timeout,
            Self::RateLimited { .. } => FailureReason::RateLimited,
            Self::Server { .. } => FailureReason::ServerError,
            Self::Deadlock { .. } => FailureReason::Deadlock,
            Self::Rejected { .. } | Self::Internal { .. } => FailureReason::Fatal,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
