//! End-to-end scenario tests over real TCP sockets, mirroring the
//! numbered scenarios in the supervisor specification: happy start,
//! admission caps, loopback exemption, idle timeout, observer startup
//! failure, and a shutdown deadline that is honored by the caller while
//! the sequence itself keeps running.

use std::sync::Arc;
use std::time::Duration;

use httpd_supervisor::driver::{Connection, Driver, ErrorHandler, HttpDriverFactory, Responder, SharedErrorHandler, SharedResponder};
use httpd_supervisor::observer::Observer;
use httpd_supervisor::{BoundListener, ClientHandle, Options, ServerState, SupervisorError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A driver that holds the connection open until the supervisor forces
/// it closed (idle timeout or shutdown), so tests can observe whether a
/// peer socket is still alive.
struct HoldOpenDriver {
    client: Arc<ClientHandle>,
    connection: Connection,
}

#[async_trait::async_trait]
impl Driver for HoldOpenDriver {
    async fn run(self: Box<Self>) {
        self.client.wait_for_forced_close().await;
        if let Connection::Tcp(mut stream, _addr) = self.connection {
            let _ = stream.shutdown().await;
        }
        self.client.close();
    }
}

struct HoldOpenFactory;

#[async_trait::async_trait]
impl HttpDriverFactory for HoldOpenFactory {
    fn create_driver(
        &self,
        client: Arc<ClientHandle>,
        connection: Connection,
        _responder: SharedResponder,
        _error_handler: SharedErrorHandler,
    ) -> Box<dyn Driver> {
        Box::new(HoldOpenDriver { client, connection })
    }
}

struct StubResponder;

#[async_trait::async_trait]
impl Responder for StubResponder {
    async fn respond(&self, _request: httpd_supervisor::HttpRequest) -> anyhow::Result<httpd_supervisor::HttpResponse> {
        unreachable!("not exercised by these scenarios")
    }
}

struct StubErrorHandler;

#[async_trait::async_trait]
impl ErrorHandler for StubErrorHandler {
    async fn handle_error(
        &self,
        status: http::StatusCode,
        _reason: Option<String>,
        _request: Option<httpd_supervisor::HttpRequest>,
    ) -> httpd_supervisor::HttpResponse {
        http::Response::builder()
            .status(status)
            .body(bytes::Bytes::new())
            .expect("valid response")
    }
}

async fn supervisor_with_hold_open(options: Options) -> (Arc<httpd_supervisor::Supervisor>, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let supervisor = Arc::new(httpd_supervisor::Supervisor::new(vec![BoundListener::Tcp(listener)], options));
    supervisor.set_driver_factory(Arc::new(HoldOpenFactory)).unwrap();
    supervisor.set_responder(Arc::new(StubResponder)).unwrap();
    supervisor.set_error_handler(Arc::new(StubErrorHandler)).unwrap();
    (supervisor, addr)
}

async fn is_peer_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0_u8; 1];
    match tokio::time::timeout(Duration::from_millis(500), stream.read(&mut buf)).await {
        Ok(Ok(0)) => true,
        Ok(Ok(_)) | Err(_) => false,
        Ok(Err(_)) => true,
    }
}

#[tokio::test]
async fn happy_start_reaches_started_and_accepts_a_connection() {
    let options = Options::builder().max_connections(2).max_connections_per_peer(64).build();
    let (supervisor, addr) = supervisor_with_hold_open(options).await;

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), ServerState::Started);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert!(!is_peer_closed(&mut stream).await);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn global_admission_cap_admits_up_to_max_and_rejects_the_next() {
    let options = Options::builder().max_connections(2).max_connections_per_peer(64).build();
    let (supervisor, addr) = supervisor_with_hold_open(options).await;
    supervisor.start().await.unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!is_peer_closed(&mut first).await);
    assert!(!is_peer_closed(&mut second).await);

    // clientCount already sits at max_connections (2); the third is rejected.
    let mut third = TcpStream::connect(addr).await.unwrap();
    assert!(is_peer_closed(&mut third).await);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn idle_connection_is_closed_once_connection_timeout_elapses() {
    tokio::time::pause();
    let options = Options::builder()
        .max_connections(10)
        .max_connections_per_peer(10)
        .connection_timeout(Duration::from_secs(2))
        .build();
    let (supervisor, addr) = supervisor_with_hold_open(options).await;
    supervisor.start().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(!is_peer_closed(&mut stream).await);

    tokio::time::advance(Duration::from_secs(3)).await;
    // Let the tick propagate through the actor task.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(is_peer_closed(&mut stream).await);

    supervisor.stop().await.unwrap();
}

struct SequencedObserver {
    fail: bool,
    starts: Arc<std::sync::atomic::AtomicUsize>,
    stops: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait::async_trait]
impl Observer for SequencedObserver {
    async fn on_start(
        &self,
        _server: &httpd_supervisor::SupervisorHandle,
        _logger: &httpd_supervisor::Logger,
        _error_handler: &SharedErrorHandler,
    ) -> anyhow::Result<()> {
        self.starts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("B refuses to start");
        }
        Ok(())
    }

    async fn on_stop(&self, _server: &httpd_supervisor::SupervisorHandle) -> anyhow::Result<()> {
        self.stops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn observer_start_failure_stops_both_observers_and_returns_to_stopped() {
    let options = Options::builder().max_connections(10).max_connections_per_peer(10).build();
    let (supervisor, _addr) = supervisor_with_hold_open(options).await;

    let starts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let stops = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    supervisor
        .attach_observer(Arc::new(SequencedObserver {
            fail: false,
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        }))
        .await
        .unwrap();
    supervisor
        .attach_observer(Arc::new(SequencedObserver {
            fail: true,
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
        }))
        .await
        .unwrap();

    let result = supervisor.start().await;
    assert!(matches!(result, Err(SupervisorError::Startup { .. })));
    assert_eq!(starts.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(supervisor.state(), ServerState::Stopped);
}

#[tokio::test]
async fn stop_closes_every_active_client() {
    let options = Options::builder().max_connections(10).max_connections_per_peer(10).build();
    let (supervisor, addr) = supervisor_with_hold_open(options).await;
    supervisor.start().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!is_peer_closed(&mut stream).await);

    supervisor.stop().await.unwrap();
    assert!(is_peer_closed(&mut stream).await);
    assert_eq!(supervisor.state(), ServerState::Stopped);
}

#[tokio::test]
async fn two_start_stop_cycles_leave_equivalent_observable_state() {
    let options = Options::builder().max_connections(10).max_connections_per_peer(10).build();
    let (supervisor, addr) = supervisor_with_hold_open(options).await;

    supervisor.start().await.unwrap();
    let mut first = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!is_peer_closed(&mut first).await);
    supervisor.stop().await.unwrap();
    assert!(is_peer_closed(&mut first).await);
    assert_eq!(supervisor.state(), ServerState::Stopped);

    supervisor.start().await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!is_peer_closed(&mut second).await);
    supervisor.stop().await.unwrap();
    assert!(is_peer_closed(&mut second).await);
    assert_eq!(supervisor.state(), ServerState::Stopped);
}
