//! Error kinds returned by the supervisor's public operations.

use std::sync::Arc;

/// Errors surfaced by [`crate::Supervisor`] operations.
///
/// Mirrors the error-kind table in the supervisor specification: each
/// variant names a distinct failure policy rather than a single catch-all
/// `anyhow::Error`, since callers need to branch on *which* invariant was
/// violated (e.g. retry on `Timeout`, but never retry `InvalidState`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    /// The operation requires a specific [`crate::ServerState`] that the
    /// supervisor was not in (e.g. `attach_observer` off `Stopped`, or
    /// `start` while already `Starting`).
    #[error("invalid operation for current server state: {reason}")]
    InvalidState {
        /// Human-readable description of the violated precondition.
        reason: &'static str,
    },

    /// One or more observers' `on_start` failed during startup. The
    /// supervisor has already run the full shutdown sequence by the time
    /// this is returned.
    #[error("startup failed: {source}")]
    Startup {
        #[source]
        source: Arc<anyhow::Error>,
    },

    /// One or more observers' `on_stop` failed during shutdown. All
    /// clients were still closed and the state machine still reached
    /// `Stopped`.
    #[error("shutdown completed with observer errors: {source}")]
    Shutdown {
        #[source]
        source: Arc<anyhow::Error>,
    },

    /// Shutdown did not complete within `Options::shutdown_timeout`. The
    /// shutdown sequence continues in the background; this error only
    /// reports that the caller's deadline tripped.
    #[error("shutdown did not complete within the configured deadline")]
    Timeout,
}

impl SupervisorError {
    pub(crate) fn invalid_state(reason: &'static str) -> Self {
        SupervisorError::InvalidState { reason }
    }

    pub(crate) fn startup(source: anyhow::Error) -> Self {
        SupervisorError::Startup {
            source: Arc::new(source),
        }
    }

    pub(crate) fn shutdown(source: anyhow::Error) -> Self {
        SupervisorError::Shutdown {
            source: Arc::new(source),
        }
    }
}
