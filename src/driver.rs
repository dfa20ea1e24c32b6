//! External collaborator interfaces: the request-handling and HTTP-driver
//! boundary the supervisor consumes but never implements.
//!
//! Wire parsing (HTTP/1.x, HTTP/2) and application request handling are
//! explicitly out of scope for the supervisor — it only needs to know
//! *that* a driver can be produced for an accepted connection, and *that*
//! a responder/error handler exist to hand to it. Request and response
//! bodies are modeled with the `http`/`bytes` crates rather than anything
//! bespoke, since that is the boundary type the surrounding ecosystem
//! (and the teacher crate's own `http = "1"` dependency) already agrees on.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::server::TlsStream;

use crate::client::ClientHandle;
use crate::observer::Observer;

/// An HTTP request with an in-memory body, the boundary type passed to
/// [`Responder::respond`].
pub type HttpRequest = http::Request<bytes::Bytes>;

/// An HTTP response with an in-memory body, returned by [`Responder`] and
/// [`ErrorHandler`].
pub type HttpResponse = http::Response<bytes::Bytes>;

/// Shared handle to the configured responder.
pub type SharedResponder = Arc<dyn Responder>;
/// Shared handle to the configured error handler.
pub type SharedErrorHandler = Arc<dyn ErrorHandler>;
/// Shared handle to the configured driver factory.
pub type SharedDriverFactory = Arc<dyn HttpDriverFactory>;

/// Application request handler. The driver calls this; the supervisor
/// only holds the reference and passes it through at driver-creation time.
#[async_trait::async_trait]
pub trait Responder: Send + Sync {
    /// Produces a response for a fully-parsed request.
    async fn respond(&self, request: HttpRequest) -> anyhow::Result<HttpResponse>;

    /// Returns `Some(self)` as an [`Observer`] when this responder also
    /// needs lifecycle hooks. Defaults to `None`; override when the
    /// responder owns resources (caches, connection pools) that need
    /// start/stop orchestration alongside the rest of the server.
    fn as_observer(&self) -> Option<&dyn Observer> {
        None
    }
}

/// Error-page renderer, consulted when the driver cannot produce a
/// response through the normal responder path (malformed request,
/// responder panic, admission-adjacent failures surfaced to the wire).
#[async_trait::async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Renders an error response for `status`, with optional human-
    /// readable `reason` and the offending `request` if one was parsed
    /// far enough to exist.
    async fn handle_error(
        &self,
        status: http::StatusCode,
        reason: Option<String>,
        request: Option<HttpRequest>,
    ) -> HttpResponse;
}

/// A raw accepted socket, already past the admission checks, ready to be
/// handed to a driver.
#[derive(Debug)]
pub enum Connection {
    /// A plain TCP connection with its remote address.
    Tcp(TcpStream, SocketAddr),
    /// A TCP connection that has already completed its TLS handshake.
    Tls(Box<TlsStream<TcpStream>>, SocketAddr),
    /// A Unix-domain connection (no meaningful remote address).
    Unix(UnixStream),
}

/// Per-connection protocol state machine. Produced by [`HttpDriverFactory`]
/// for each admitted client; owns the socket's read/write pumps from the
/// moment it is created.
#[async_trait::async_trait]
pub trait Driver: Send {
    /// Runs the connection to completion (request/response loop, or
    /// until the peer disconnects / the client handle is closed).
    async fn run(self: Box<Self>);
}

/// Produces per-connection [`Driver`]s and advertises the ALPN protocol
/// list the supervisor should configure on TLS listeners.
#[async_trait::async_trait]
pub trait HttpDriverFactory: Send + Sync {
    /// Application-layer protocols to advertise via ALPN (e.g. `["h2",
    /// "http/1.1"]`), highest preference first. Empty means "do not
    /// negotiate a protocol".
    fn application_layer_protocols(&self) -> Vec<String> {
        Vec::new()
    }

    /// Creates a driver for a freshly admitted connection.
    fn create_driver(
        &self,
        client: Arc<ClientHandle>,
        connection: Connection,
        responder: SharedResponder,
        error_handler: SharedErrorHandler,
    ) -> Box<dyn Driver>;

    /// Returns `Some(self)` as an [`Observer`] when this factory also
    /// needs lifecycle hooks (e.g. warming an HTTP/2 settings cache
    /// before the first accept). Defaults to `None`.
    fn as_observer(&self) -> Option<&dyn Observer> {
        None
    }
}

/// Error handler used until [`crate::Supervisor::set_error_handler`] is
/// called. Renders a bare status line with no body; good enough to keep
/// the server speaking valid HTTP before an application wires in its own
/// error pages.
#[derive(Debug, Default)]
pub struct DefaultErrorHandler;

#[async_trait::async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle_error(
        &self,
        status: http::StatusCode,
        _reason: Option<String>,
        _request: Option<HttpRequest>,
    ) -> HttpResponse {
        http::Response::builder()
            .status(status)
            .body(bytes::Bytes::new())
            .unwrap_or_else(|_| http::Response::new(bytes::Bytes::new()))
    }
}

/// Driver factory used until [`crate::Supervisor::set_driver_factory`] is
/// called. Advertises no ALPN protocols and its driver closes the
/// connection immediately without reading or writing anything — a
/// harmless placeholder, not a usable HTTP implementation.
#[derive(Debug, Default)]
pub struct DefaultDriverFactory;

struct ImmediatelyClosingDriver(Arc<ClientHandle>);

#[async_trait::async_trait]
impl Driver for ImmediatelyClosingDriver {
    async fn run(self: Box<Self>) {
        self.0.close();
    }
}

#[async_trait::async_trait]
impl HttpDriverFactory for DefaultDriverFactory {
    fn create_driver(
        &self,
        client: Arc<ClientHandle>,
        _connection: Connection,
        _responder: SharedResponder,
        _error_handler: SharedErrorHandler,
    ) -> Box<dyn Driver> {
        Box::new(ImmediatelyClosingDriver(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriverFactory;

    struct NullDriver;

    #[async_trait::async_trait]
    impl Driver for NullDriver {
        async fn run(self: Box<Self>) {}
    }

    #[async_trait::async_trait]
    impl HttpDriverFactory for NullDriverFactory {
        fn create_driver(
            &self,
            _client: Arc<ClientHandle>,
            _connection: Connection,
            _responder: SharedResponder,
            _error_handler: SharedErrorHandler,
        ) -> Box<dyn Driver> {
            Box::new(NullDriver)
        }
    }

    #[test]
    fn default_alpn_list_is_empty() {
        let factory = NullDriverFactory;
        assert!(factory.application_layer_protocols().is_empty());
    }

    #[test]
    fn default_as_observer_is_none() {
        let factory = NullDriverFactory;
        assert!(factory.as_observer().is_none());
    }

    #[tokio::test]
    async fn default_error_handler_echoes_status_with_empty_body() {
        let handler = DefaultErrorHandler;
        let response = handler.handle_error(http::StatusCode::NOT_FOUND, None, None).await;
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
        assert!(response.body().is_empty());
    }

    struct StubResponder;

    #[async_trait::async_trait]
    impl Responder for StubResponder {
        async fn respond(&self, _request: HttpRequest) -> anyhow::Result<HttpResponse> {
            unreachable!("not exercised by this test")
        }
    }

    #[tokio::test]
    async fn default_driver_factory_closes_the_client_immediately() {
        use crate::client::{ClientId, ClientMeta};
        use crate::supervisor::SupervisorHandle;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = SupervisorHandle::new_for_test(tx);
        let meta = ClientMeta {
            id: ClientId(1),
            remote_addr: None,
            network_id: "unix".to_string(),
            is_unix: true,
        };
        let client = Arc::new(ClientHandle::new(meta, handle, Arc::new(tokio::sync::Notify::new())));

        let factory = DefaultDriverFactory;
        let (unix_a, _unix_b) = tokio::net::UnixStream::pair().expect("unix socket pair");
        let driver = factory.create_driver(
            client,
            Connection::Unix(unix_a),
            Arc::new(StubResponder) as SharedResponder,
            Arc::new(DefaultErrorHandler) as SharedErrorHandler,
        );
        driver.run().await;

        let command = rx.recv().await.expect("close notification sent");
        assert!(matches!(command, crate::supervisor::ActorCommand::ClientClosed { .. }));
    }
}
