//! Pre-bound listener wrapper handed to the supervisor at construction.
//!
//! Binding sockets is the caller's responsibility (privileged port binding,
//! socket activation, `SO_REUSEPORT` fan-out — all of that happens before
//! the supervisor exists). The supervisor only accepts on already-bound
//! listeners and, for TLS listeners, wires the driver factory's ALPN
//! protocol list into the `rustls` server config before the first accept.

use std::sync::Arc;

use tokio::net::{TcpListener, UnixListener};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// A pre-bound socket the supervisor accepts connections on.
pub enum BoundListener {
    /// A plain TCP listener.
    Tcp(TcpListener),
    /// A TCP listener wrapped with a TLS acceptor.
    Tls(TcpListener, Arc<ServerConfig>),
    /// A Unix-domain socket listener.
    Unix(UnixListener),
}

impl BoundListener {
    /// Whether this listener accepts `AF_UNIX` connections, used to
    /// derive the per-peer admission grouping key.
    #[must_use]
    pub fn is_unix(&self) -> bool {
        matches!(self, BoundListener::Unix(_))
    }

    /// Returns the configured TLS server config, if any, so the
    /// supervisor can push the driver factory's ALPN protocol list into
    /// it before the first accept.
    #[must_use]
    pub fn tls_config(&self) -> Option<&Arc<ServerConfig>> {
        match self {
            BoundListener::Tls(_, config) => Some(config),
            BoundListener::Tcp(_) | BoundListener::Unix(_) => None,
        }
    }

    /// Builds a [`TlsAcceptor`] from this listener's server config, if
    /// any.
    #[must_use]
    pub fn tls_acceptor(&self) -> Option<TlsAcceptor> {
        self.tls_config().map(|config| TlsAcceptor::from(Arc::clone(config)))
    }

    /// Human-readable local address, used in log lines and error
    /// messages.
    #[must_use]
    pub fn local_addr_string(&self) -> String {
        match self {
            BoundListener::Tcp(listener) | BoundListener::Tls(listener, _) => listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string()),
            BoundListener::Unix(listener) => listener
                .local_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "<unix>".to_string()),
        }
    }
}

/// Installs `protocols` as the ALPN protocol list on every TLS listener
/// in `listeners`, highest preference first. Called once at startup,
/// before any accept loop is spawned, with the active driver factory's
/// [`application_layer_protocols`](crate::driver::HttpDriverFactory::application_layer_protocols).
pub fn configure_alpn(listeners: &mut [BoundListener], protocols: &[String]) {
    if protocols.is_empty() {
        return;
    }
    let wire_protocols: Vec<Vec<u8>> = protocols.iter().map(|p| p.clone().into_bytes()).collect();
    for listener in listeners {
        if let BoundListener::Tls(_, config) = listener {
            if let Some(config) = Arc::get_mut(config) {
                config.alpn_protocols = wire_protocols.clone();
            }
        }
    }
}
