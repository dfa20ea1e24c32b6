//! Immutable configuration for a [`crate::Supervisor`].

use std::time::Duration;

/// Immutable configuration bundle, fixed for the supervisor's entire
/// lifetime after construction.
///
/// Built via [`Options::builder`] or [`Options::default`]; there is no
/// setter once a `Supervisor` has been constructed from an `Options`
/// value, matching the specification's "immutable for the server's
/// lifetime after construction" invariant.
#[derive(Debug, Clone)]
pub struct Options {
    /// How long a connection may stay idle (no timeout-cache renewal)
    /// before the sweeper closes it.
    pub connection_timeout: Duration,
    /// Upper bound on how long `stop()` waits for the shutdown sequence
    /// before returning `SupervisorError::Timeout`.
    pub shutdown_timeout: Duration,
    /// Global cap on simultaneously admitted connections.
    pub max_connections: u32,
    /// Per-peer cap on simultaneously admitted connections. Exempted for
    /// loopback and Unix-domain peers.
    pub max_connections_per_peer: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            max_connections: 10_000,
            max_connections_per_peer: 64,
        }
    }
}

impl Options {
    /// Starts building an `Options` value from defaults.
    #[must_use]
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

/// Builder for [`Options`], following the teacher crate's pattern of a
/// `Default`-derived config struct assembled via `..Default::default()`
/// field updates, but exposed as named setters for external callers that
/// do not have direct field access.
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    inner: Options,
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        OptionsBuilder {
            inner: Options::default(),
        }
    }
}

impl OptionsBuilder {
    /// Sets the idle-connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connection_timeout = timeout;
        self
    }

    /// Sets the bounded shutdown deadline.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.inner.shutdown_timeout = timeout;
        self
    }

    /// Sets the global connection cap.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.inner.max_connections = max;
        self
    }

    /// Sets the per-peer connection cap.
    #[must_use]
    pub fn max_connections_per_peer(mut self, max: u32) -> Self {
        self.inner.max_connections_per_peer = max;
        self
    }

    /// Finishes the builder, producing an immutable `Options`.
    #[must_use]
    pub fn build(self) -> Options {
        self.inner
    }
}
