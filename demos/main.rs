//! Minimal CLI harness for exercising the supervisor against a real TCP
//! listener, outside the `examples/` retrieval pack (this file is a
//! workspace binary, not a reference crate).
//!
//! Binds one TCP listener, starts a [`Supervisor`] over it with a
//! driver factory that echoes a fixed response for every accepted
//! connection, and wires `Ctrl-C` to a graceful `stop()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use httpd_supervisor::driver::{Connection, Driver, ErrorHandler, HttpDriverFactory, Responder, SharedErrorHandler, SharedResponder};
use httpd_supervisor::{BoundListener, ClientHandle, Options, Supervisor};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Runs the supervisor demo server.
#[derive(Debug, Parser)]
#[command(name = "supervisor-demo", about = "Exercise the httpd-supervisor lifecycle core")]
struct Args {
    /// Address to bind the TCP listener on.
    #[arg(long, env = "SUPERVISOR_DEMO_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Idle-connection timeout, in seconds.
    #[arg(long, env = "SUPERVISOR_DEMO_CONNECTION_TIMEOUT", default_value_t = 60)]
    connection_timeout_secs: u64,

    /// Bounded deadline for graceful shutdown, in seconds.
    #[arg(long, env = "SUPERVISOR_DEMO_SHUTDOWN_TIMEOUT", default_value_t = 30)]
    shutdown_timeout_secs: u64,

    /// Global cap on simultaneously admitted connections.
    #[arg(long, env = "SUPERVISOR_DEMO_MAX_CONNECTIONS", default_value_t = 10_000)]
    max_connections: u32,

    /// Per-peer cap on simultaneously admitted connections.
    #[arg(long, env = "SUPERVISOR_DEMO_MAX_CONNECTIONS_PER_PEER", default_value_t = 64)]
    max_connections_per_peer: u32,
}

struct EchoResponder;

#[async_trait::async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, _request: httpd_supervisor::HttpRequest) -> anyhow::Result<httpd_supervisor::HttpResponse> {
        Ok(http::Response::builder()
            .status(http::StatusCode::OK)
            .body(bytes::Bytes::from_static(b"demo\n"))
            .unwrap_or_else(|_| http::Response::new(bytes::Bytes::new())))
    }
}

struct PlainTextErrorHandler;

#[async_trait::async_trait]
impl ErrorHandler for PlainTextErrorHandler {
    async fn handle_error(
        &self,
        status: http::StatusCode,
        reason: Option<String>,
        _request: Option<httpd_supervisor::HttpRequest>,
    ) -> httpd_supervisor::HttpResponse {
        let body = reason.unwrap_or_else(|| status.to_string());
        http::Response::builder()
            .status(status)
            .body(bytes::Bytes::from(body))
            .unwrap_or_else(|_| http::Response::new(bytes::Bytes::new()))
    }
}

/// Toy driver: writes a fixed HTTP/1.0 response on a TCP connection and
/// closes it. Real wire parsing lives outside this crate's scope; this
/// exists only to give the demo binary something observable to drive.
struct EchoDriver {
    client: Arc<ClientHandle>,
    connection: Connection,
    responder: SharedResponder,
}

#[async_trait::async_trait]
impl Driver for EchoDriver {
    async fn run(self: Box<Self>) {
        let body = match self.responder.respond(dummy_request()).await {
            Ok(response) => response.into_body(),
            Err(error) => {
                tracing::warn!("responder failed: {error}");
                self.client.close();
                return;
            }
        };

        if let Connection::Tcp(mut stream, _addr) = self.connection {
            let header = format!("HTTP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        }

        self.client.close();
    }
}

fn dummy_request() -> httpd_supervisor::HttpRequest {
    http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .body(bytes::Bytes::new())
        .expect("well-formed placeholder request")
}

struct EchoDriverFactory;

#[async_trait::async_trait]
impl HttpDriverFactory for EchoDriverFactory {
    fn create_driver(
        &self,
        client: Arc<ClientHandle>,
        connection: Connection,
        responder: SharedResponder,
        _error_handler: SharedErrorHandler,
    ) -> Box<dyn Driver> {
        Box::new(EchoDriver {
            client,
            connection,
            responder,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let listener = TcpListener::bind(args.addr).await?;
    tracing::info!(addr = %args.addr, "bound listener");

    let options = Options::builder()
        .connection_timeout(Duration::from_secs(args.connection_timeout_secs))
        .shutdown_timeout(Duration::from_secs(args.shutdown_timeout_secs))
        .max_connections(args.max_connections)
        .max_connections_per_peer(args.max_connections_per_peer)
        .build();

    let supervisor = Arc::new(Supervisor::new(vec![BoundListener::Tcp(listener)], options));
    supervisor.set_driver_factory(Arc::new(EchoDriverFactory))?;
    supervisor.set_responder(Arc::new(EchoResponder))?;
    supervisor.set_error_handler(Arc::new(PlainTextErrorHandler))?;

    supervisor.start().await?;
    tracing::info!("supervisor started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");

    match supervisor.stop().await {
        Ok(()) => tracing::info!("supervisor stopped cleanly"),
        Err(error) => tracing::warn!("supervisor stop reported: {error}"),
    }

    Ok(())
}
