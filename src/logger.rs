//! Leveled, structured logger facade handed to observers and collaborators.
//!
//! The supervisor logs through `tracing` directly (as the teacher crate
//! does in `network/shutdown.rs` and `network/module.rs`); this facade
//! just gives external collaborators a small, concrete, cloneable handle
//! to log through instead of requiring them to depend on `tracing`
//! themselves.

/// A cheap, cloneable logging handle scoped to the supervisor.
///
/// Only `debug`, `info`, and `alert` are exposed, matching the set of
/// levels the specification's collaborators actually use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

impl Logger {
    /// Logs a debug-level message (e.g. "too many existing connections").
    pub fn debug(&self, message: &str) {
        tracing::debug!(target: "httpd_supervisor", "{message}");
    }

    /// Logs an info-level message (e.g. "listener bound").
    pub fn info(&self, message: &str) {
        tracing::info!(target: "httpd_supervisor", "{message}");
    }

    /// Logs an alert-level message — something an operator should notice,
    /// short of a hard failure (e.g. "ALPN unsupported, continuing
    /// without protocol negotiation").
    pub fn alert(&self, message: &str) {
        tracing::warn!(target: "httpd_supervisor", "{message}");
    }
}
