//! Error types for observers and commands.

use std::fmt;
use std::time::Duration;

use tether_connection::ConnectionError;
use thiserror::Error;

/// Where a timeout was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The caller gave up while awaiting the observer.
    AwaitDone,
    /// The background feed loop hit the observer's own deadline.
    Feed,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::AwaitDone => write!(f, "await_done"),
            TimeoutKind::Feed => write!(f, "feed"),
        }
    }
}

/// Errors stored in, or reported about, a connection observer.
///
/// Cloneable because a failed observer hands out its stored error on every
/// `result()` call.
#[derive(Error, Debug, Clone)]
pub enum ObserverError {
    /// The observer has not reached a terminal state yet.
    #[error("result not available yet: {0}")]
    ResultNotAvailableYet(String),

    /// The observer was cancelled before it produced a result.
    #[error("{0} was cancelled")]
    Cancelled(String),

    /// A command did not finish in time.
    #[error("{observer} timed out after {passed:.2?} (timeout {timeout:.2?}, detected in {kind})")]
    CommandTimeout {
        /// Display name of the command.
        observer: String,
        /// The deadline that was in force.
        timeout: Duration,
        /// Time actually spent.
        passed: Duration,
        /// Where the timeout was detected.
        kind: TimeoutKind,
    },

    /// A non-command observation did not finish in time.
    #[error("{observer} timed out after {passed:.2?} (timeout {timeout:.2?}, detected in {kind})")]
    ObservationTimeout {
        /// Display name of the observer.
        observer: String,
        /// The deadline that was in force.
        timeout: Duration,
        /// Time actually spent.
        passed: Duration,
        /// Where the timeout was detected.
        kind: TimeoutKind,
    },

    /// The command output reported a failure.
    #[error("{command} failed: {reason}")]
    CommandFailure {
        /// Display name of the command.
        command: String,
        /// What went wrong.
        reason: String,
    },

    /// The observer is already attached to its connection.
    #[error("{0} is already subscribed to its connection")]
    AlreadySubscribed(String),

    /// A size token such as `4.5M` could not be converted.
    #[error("invalid size value '{0}'")]
    InvalidSize(String),

    /// A detection pattern did not compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// An event was created without any pattern to wait for.
    #[error("at least one detect pattern is required")]
    NoPatterns,

    /// Sending over the connection failed.
    #[error("connection error: {0}")]
    Connection(String),
}

impl From<ConnectionError> for ObserverError {
    fn from(err: ConnectionError) -> Self {
        ObserverError::Connection(err.to_string())
    }
}

impl ObserverError {
    /// Builds the timeout variant matching the observer flavour.
    pub fn timeout(
        is_command: bool,
        observer: impl Into<String>,
        timeout: Duration,
        passed: Duration,
        kind: TimeoutKind,
    ) -> Self {
        let observer = observer.into();
        if is_command {
            ObserverError::CommandTimeout {
                observer,
                timeout,
                passed,
                kind,
            }
        } else {
            ObserverError::ObservationTimeout {
                observer,
                timeout,
                passed,
                kind,
            }
        }
    }

    /// Returns true for either timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ObserverError::CommandTimeout { .. } | ObserverError::ObservationTimeout { .. }
        )
    }

    /// Returns true if the observer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ObserverError::Cancelled(_))
    }
}

/// Result type alias for observer operations.
pub type Result<T> = std::result::Result<T, ObserverError>;
