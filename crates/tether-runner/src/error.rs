//! Error types for the runner crate.

use std::time::Duration;

use tether_core::ObserverError;
use thiserror::Error;

/// Errors raised by runners to the caller of `submit` / `wait_for`.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The feed loop did not confirm it started within the grace period.
    #[error("failed to start feeding {observer} within {grace:?}")]
    BackendStartup {
        /// Display name of the observer.
        observer: String,
        /// The grace period that expired.
        grace: Duration,
    },

    /// The runner no longer accepts submissions.
    #[error("runner is shut down")]
    ShutDown,

    /// The concurrency backend could not be created or used.
    #[error("backend error: {0}")]
    Backend(#[from] std::io::Error),

    /// The observer finished with an error (including timeouts and cancellation).
    #[error(transparent)]
    Observer(#[from] ObserverError),
}

impl RunnerError {
    /// Returns true for command and observation timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Observer(err) if err.is_timeout())
    }

    /// Returns true if the observer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Observer(err) if err.is_cancelled())
    }
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
