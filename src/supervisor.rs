//! The server lifecycle core: a strict four-state machine driving an
//! actor that owns every piece of mutable per-cycle state on a single
//! task.
//!
//! `Supervisor` is the caller-owned handle, retained across start/stop
//! cycles. Each `start()` spawns a fresh actor task owning that cycle's
//! [`ClientRegistry`], [`TimeoutCache`], and [`AdmissionController`];
//! acceptor tasks and [`ClientHandle`]s talk to it over an `mpsc`
//! channel rather than touching shared data structures directly, per
//! the single-task confinement the specification mandates (see
//! `SPEC_FULL.md` §1.x).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionController, AdmissionRejection};
use crate::client::{is_loopback, network_id_for, ClientHandle, ClientId, ClientMeta};
use crate::driver::{
    Connection, DefaultDriverFactory, DefaultErrorHandler, ErrorHandler, HttpDriverFactory, Responder,
    SharedDriverFactory, SharedErrorHandler, SharedResponder,
};
use crate::error::SupervisorError;
use crate::listener::{configure_alpn, BoundListener};
use crate::logger::Logger;
use crate::observer::{Observer, ObserverRegistry};
use crate::options::Options;
use crate::registry::ClientRegistry;
use crate::time_reference::TimeReference;
use crate::timeout_cache::TimeoutCache;

/// The server's lifecycle state, transitioned only by the supervisor.
///
/// Forms the strict sequence `Stopped -> Starting -> Started -> Stopping
/// -> Stopped`, with no back-edges, repeatable across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No accept watchers are installed; no observers are running.
    Stopped = 0,
    /// Observers are running `on_start`; not yet accepting connections.
    Starting = 1,
    /// Accept watchers are installed; serving traffic.
    Started = 2,
    /// Accept watchers have been cancelled; observers are running
    /// `on_stop` and active clients are being closed.
    Stopping = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Stopped,
            1 => ServerState::Starting,
            2 => ServerState::Started,
            3 => ServerState::Stopping,
            other => unreachable!("invalid ServerState discriminant {other}"),
        }
    }
}

/// Lock-free holder for [`ServerState`], the single point through which the
/// `Stopped <-> Starting <-> Started <-> Stopping` transitions are made.
///
/// The specification's concurrency model (§5) confines all supervisor
/// state to a single task/actor precisely so that a "check current state,
/// then mutate it" sequence can never race. `start()`/`stop()` are called
/// on a `Supervisor` shared behind an `Arc` by design (see the doc comment
/// on [`Supervisor`]), so the check-then-mutate step itself has to be
/// atomic rather than a separate `load()` followed by a later `store()` —
/// otherwise two concurrent `start()` calls could both observe `Stopped`
/// before either transitions away from it. `compare_exchange` gives that
/// atomicity without needing an actor round-trip just to guard the state
/// variable.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ServerState) -> Self {
        StateCell(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Atomically transitions from `from` to `to`. Fails without mutating
    /// anything if the current state is not exactly `from`, returning the
    /// state actually observed.
    fn transition(&self, from: ServerState, to: ServerState) -> Result<(), ServerState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ServerState::from_u8)
    }
}

/// Messages sent to the per-cycle actor task. Constructed by acceptor
/// tasks and [`ClientHandle`]s; consumed exclusively by [`run_actor`].
#[derive(Debug)]
pub enum ActorCommand {
    /// A listener accepted a raw connection; the actor must run
    /// admission control and reply with the verdict.
    Accept {
        connection: RawAccept,
        reply: oneshot::Sender<AcceptVerdict>,
    },
    /// An admitted connection's [`ClientHandle`] has been constructed;
    /// track it for force-close and idle-timeout sweeping.
    Registered {
        id: ClientId,
        handle: std::sync::Weak<ClientHandle>,
        expires_at: u64,
    },
    /// A coarse-clock tick; the actor sweeps the timeout cache.
    Tick(u64),
    /// A driver renewed a client's timeout entry.
    Renew { id: ClientId, expires_at: u64 },
    /// A client closed (driver-initiated, sweep-initiated, or shutdown).
    ClientClosed { id: ClientId, network_id: String },
    /// Force-closes every tracked client and replies once the registry
    /// is empty. Sent once per shutdown cycle.
    CloseAll { reply: oneshot::Sender<()> },
}

/// Peer metadata needed to run admission control for a freshly accepted
/// socket, computed by the acceptor task before any [`ClientId`] exists.
#[derive(Debug)]
pub struct RawAccept {
    /// Admission grouping key (`"unix"`, an IPv4 address, or an IPv6
    /// /56 prefix).
    pub network_id: String,
    /// Whether this peer is exempt from the per-peer cap (loopback or
    /// Unix-domain).
    pub exempt: bool,
}

/// The actor's reply to an [`ActorCommand::Accept`].
#[derive(Debug)]
pub enum AcceptVerdict {
    /// Admitted; the caller builds a [`ClientMeta`] from `id` and
    /// `network_id` and proceeds to hand the connection to a driver.
    Admitted { id: ClientId, network_id: String },
    /// Rejected; the caller closes the raw socket without constructing
    /// a client or invoking the driver factory.
    Rejected(AdmissionRejection),
}

/// Cheap, cloneable handle to a running actor, held by acceptor tasks
/// and [`ClientHandle`]s to talk back to the single owning task.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    sender: mpsc::UnboundedSender<ActorCommand>,
    now: Arc<AtomicU64>,
}

impl SupervisorHandle {
    fn new(sender: mpsc::UnboundedSender<ActorCommand>, now: Arc<AtomicU64>) -> Self {
        SupervisorHandle { sender, now }
    }

    /// Builds a handle over a bare channel sender for unit tests that
    /// exercise [`ClientHandle`] or [`Observer`] behavior without a
    /// running actor.
    #[doc(hidden)]
    #[must_use]
    pub fn new_for_test(sender: mpsc::UnboundedSender<ActorCommand>) -> Self {
        SupervisorHandle::new(sender, Arc::new(AtomicU64::new(0)))
    }

    pub(crate) fn command_sender(&self) -> &mpsc::UnboundedSender<ActorCommand> {
        &self.sender
    }

    /// The coarse "now" as last observed by the actor's [`Tick`](ActorCommand::Tick)
    /// handler.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// The server lifecycle supervisor.
///
/// Owns `Options`, the observer registry, the driver factory, the
/// responder, the error handler, and the set of bound listeners across
/// start/stop cycles. Not `Clone` — share behind an `Arc` if multiple
/// tasks need to call `stop()` concurrently (the second caller observes
/// `InvalidState` while a cycle is mid-transition, per spec).
pub struct Supervisor {
    options: Options,
    state: Arc<StateCell>,
    observers: Arc<Mutex<ObserverRegistry>>,
    driver_factory: Arc<ArcSwap<dyn HttpDriverFactory>>,
    responder: Arc<ArcSwap<dyn Responder>>,
    error_handler: Arc<ArcSwap<dyn ErrorHandler>>,
    listeners: Arc<Mutex<Vec<Arc<BoundListener>>>>,
    time_reference: TimeReference,
    logger: Logger,
    cycle: Mutex<Option<RunningCycle>>,
}

struct RunningCycle {
    handle: SupervisorHandle,
    shutdown: CancellationToken,
    acceptor_tasks: Vec<JoinHandle<()>>,
}

struct NullResponder;

#[async_trait::async_trait]
impl crate::driver::Responder for NullResponder {
    async fn respond(&self, _request: crate::driver::HttpRequest) -> anyhow::Result<crate::driver::HttpResponse> {
        anyhow::bail!("no responder configured")
    }
}

impl Supervisor {
    /// Creates a new supervisor over `listeners`, in state `Stopped`,
    /// with default collaborators: a driver factory that closes every
    /// connection immediately, a responder that errors on every call,
    /// and a bare-status-line error handler. Callers replace any of
    /// these via the setters before calling `start()`.
    #[must_use]
    pub fn new(listeners: Vec<BoundListener>, options: Options) -> Self {
        Supervisor {
            options,
            state: Arc::new(StateCell::new(ServerState::Stopped)),
            observers: Arc::new(Mutex::new(ObserverRegistry::new())),
            driver_factory: Arc::new(ArcSwap::new(Arc::new(DefaultDriverFactory) as SharedDriverFactory)),
            responder: Arc::new(ArcSwap::new(Arc::new(NullResponder) as SharedResponder)),
            error_handler: Arc::new(ArcSwap::new(Arc::new(DefaultErrorHandler) as SharedErrorHandler)),
            listeners: Arc::new(Mutex::new(listeners.into_iter().map(Arc::new).collect())),
            time_reference: TimeReference::new(),
            logger: Logger,
            cycle: Mutex::new(None),
        }
    }

    /// Current lifecycle state. Safe to call in any state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state.load()
    }

    /// The immutable configuration this supervisor was constructed with.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The active error handler.
    #[must_use]
    pub fn error_handler(&self) -> SharedErrorHandler {
        Arc::clone(&self.error_handler.load())
    }

    /// The coarse monotonic clock this supervisor publishes while
    /// started.
    #[must_use]
    pub fn time_reference(&self) -> &TimeReference {
        &self.time_reference
    }

    /// The structured logger this supervisor and its observers log
    /// through.
    #[must_use]
    pub fn logger(&self) -> Logger {
        self.logger
    }

    /// Attaches an observer. Fails with [`SupervisorError::InvalidState`]
    /// unless the server is `Stopped`. Attached observers persist across
    /// start/stop cycles — there is no detach operation, matching the
    /// specification's observer contract.
    pub async fn attach_observer(&self, observer: Arc<dyn Observer>) -> Result<(), SupervisorError> {
        if self.state() != ServerState::Stopped {
            return Err(SupervisorError::invalid_state("attach_observer requires Stopped"));
        }
        self.observers.lock().await.attach(observer);
        Ok(())
    }

    /// Replaces the driver factory. Fails with
    /// [`SupervisorError::InvalidState`] unless the server is `Stopped`.
    pub fn set_driver_factory(&self, factory: SharedDriverFactory) -> Result<(), SupervisorError> {
        if self.state() != ServerState::Stopped {
            return Err(SupervisorError::invalid_state("set_driver_factory requires Stopped"));
        }
        self.driver_factory.store(factory);
        Ok(())
    }

    /// Replaces the responder. Fails with
    /// [`SupervisorError::InvalidState`] unless the server is `Stopped`.
    pub fn set_responder(&self, responder: SharedResponder) -> Result<(), SupervisorError> {
        if self.state() != ServerState::Stopped {
            return Err(SupervisorError::invalid_state("set_responder requires Stopped"));
        }
        self.responder.store(responder);
        Ok(())
    }

    /// Replaces the error handler. Fails with
    /// [`SupervisorError::InvalidState`] unless the server is `Stopped`.
    pub fn set_error_handler(&self, handler: SharedErrorHandler) -> Result<(), SupervisorError> {
        if self.state() != ServerState::Stopped {
            return Err(SupervisorError::invalid_state("set_error_handler requires Stopped"));
        }
        self.error_handler.store(handler);
        Ok(())
    }

    /// Begins startup. Resolves with [`SupervisorError::InvalidState`]
    /// without mutating state unless the server is `Stopped`. Resolves
    /// successfully only after every observer's `on_start` has resolved
    /// and every listener has an accept watcher installed.
    ///
    /// The `Stopped -> Starting` transition below is a single
    /// `compare_exchange`, not a separate `load()` followed by a later
    /// `store()`: two concurrent callers racing `start()` on the same
    /// `Arc<Supervisor>` must never both observe `Stopped` and both
    /// proceed — exactly one wins the transition, the other gets
    /// `InvalidState` without having mutated anything.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.state.transition(ServerState::Stopped, ServerState::Starting).is_err() {
            return Err(SupervisorError::invalid_state("start requires Stopped"));
        }

        let driver_factory = Arc::clone(&self.driver_factory.load());
        let responder = Arc::clone(&self.responder.load());
        let error_handler = Arc::clone(&self.error_handler.load());

        let (tx, rx) = mpsc::unbounded_channel();
        let now = Arc::new(AtomicU64::new(0));
        let handle = SupervisorHandle::new(tx, Arc::clone(&now));

        let start_result = {
            let factory_observer = driver_factory.as_observer();
            let responder_observer = responder.as_observer();
            let mut extra: Vec<&dyn Observer> = vec![&self.time_reference];
            if let Some(o) = factory_observer {
                extra.push(o);
            }
            if let Some(o) = responder_observer {
                extra.push(o);
            }
            let observers = self.observers.lock().await;
            observers.start_all(&handle, &self.logger, &error_handler, &extra).await
        };

        if let Err(source) = start_result {
            self.state.store(ServerState::Stopping);
            tokio::spawn(run_actor(rx, self.options.clone(), now));
            let cycle = RunningCycle {
                handle,
                shutdown: CancellationToken::new(),
                acceptor_tasks: Vec::new(),
            };
            let _ = run_shutdown_sequence(
                cycle,
                driver_factory,
                responder,
                Arc::clone(&self.observers),
                self.time_reference.clone(),
                Arc::clone(&self.state),
            )
            .await;
            return Err(SupervisorError::startup(source));
        }

        let protocols = driver_factory.application_layer_protocols();
        if !protocols.is_empty() {
            let mut listeners = self.listeners.lock().await;
            let any_tls_capable = listeners.iter().any(|l| l.tls_config().is_some());
            if any_tls_capable {
                for listener in listeners.iter_mut() {
                    if let Some(inner) = Arc::get_mut(listener) {
                        configure_alpn(std::slice::from_mut(inner), &protocols);
                    }
                }
            } else {
                self.logger.alert("ALPN protocols configured but no listener supports ALPN");
            }
        }

        let shutdown = CancellationToken::new();
        let acceptor_tasks = {
            let listeners = self.listeners.lock().await;
            let timeout = self.options.connection_timeout;
            listeners
                .iter()
                .map(|listener| {
                    spawn_acceptor_for(
                        Arc::clone(listener),
                        handle.clone(),
                        shutdown.clone(),
                        Arc::clone(&driver_factory),
                        Arc::clone(&responder),
                        Arc::clone(&error_handler),
                        timeout,
                        self.logger,
                    )
                })
                .collect()
        };

        tokio::spawn(run_actor(rx, self.options.clone(), now));

        // Populate the running cycle *before* publishing `Started`: a
        // `stop()` call that observes `Started` must always find a cycle
        // to take, never race a window where the state says `Started` but
        // `self.cycle` is still `None`.
        *self.cycle.lock().await = Some(RunningCycle {
            handle,
            shutdown,
            acceptor_tasks,
        });

        self.state.store(ServerState::Started);

        Ok(())
    }

    /// Begins shutdown. Resolves immediately if already `Stopped`.
    /// Resolves with [`SupervisorError::InvalidState`] if currently
    /// `Starting` or `Stopping`. Otherwise runs the shutdown sequence
    /// under a deadline of `Options::shutdown_timeout`; if the deadline
    /// trips, resolves with [`SupervisorError::Timeout`] while the
    /// sequence keeps running in the background until it reaches
    /// `Stopped`.
    ///
    /// Like `start()`, the `Started -> Stopping` transition is a single
    /// `compare_exchange` rather than a separate `load()`/`store()` pair:
    /// if two tasks race `stop()` on the same `Arc<Supervisor>`, exactly
    /// one observes `Started` and wins the transition (and is guaranteed
    /// `self.cycle` is populated, since `start()` publishes the cycle
    /// before publishing `Started`); the other retries the match against
    /// whatever state the winner left behind, landing on `Stopping` and
    /// returning `InvalidState`.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        loop {
            match self.state.load() {
                ServerState::Stopped => return Ok(()),
                ServerState::Starting | ServerState::Stopping => {
                    return Err(SupervisorError::invalid_state("stop requires Started or Stopped"));
                }
                ServerState::Started => {
                    if self.state.transition(ServerState::Started, ServerState::Stopping).is_ok() {
                        break;
                    }
                }
            }
        }

        let cycle = self.cycle.lock().await.take().expect("Started implies a running cycle");
        let driver_factory = Arc::clone(&self.driver_factory.load());
        let responder = Arc::clone(&self.responder.load());
        let deadline = self.options.shutdown_timeout;
        let observers = Arc::clone(&self.observers);
        let time_reference = self.time_reference.clone();
        let state = Arc::clone(&self.state);

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = run_shutdown_sequence(cycle, driver_factory, responder, observers, time_reference, state).await;
            let _ = done_tx.send(result);
        });

        match tokio::time::timeout(deadline, done_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(source))) => Err(SupervisorError::shutdown(source)),
            Ok(Err(_recv_dropped)) => Ok(()),
            Err(_elapsed) => Err(SupervisorError::Timeout),
        }
    }
}

/// Runs the full shutdown sequence: cancels accept watchers, awaits
/// their tasks, fans `on_stop` out to every observer, force-closes every
/// tracked client, and transitions to `Stopped`. Free function (rather
/// than a `Supervisor` method) so it can run detached on its own
/// `tokio::spawn`ed task — the only way to honor "shutdown continues in
/// the background past the caller's deadline" without the deadline race
/// aborting the sequence itself.
async fn run_shutdown_sequence(
    cycle: RunningCycle,
    driver_factory: SharedDriverFactory,
    responder: SharedResponder,
    observers: Arc<Mutex<ObserverRegistry>>,
    time_reference: TimeReference,
    state: Arc<StateCell>,
) -> anyhow::Result<()> {
    cycle.shutdown.cancel();
    for task in cycle.acceptor_tasks {
        let _ = task.await;
    }

    let factory_observer = driver_factory.as_observer();
    let responder_observer = responder.as_observer();
    let mut extra: Vec<&dyn Observer> = vec![&time_reference];
    if let Some(o) = factory_observer {
        extra.push(o);
    }
    if let Some(o) = responder_observer {
        extra.push(o);
    }

    let stop_result = {
        let observers = observers.lock().await;
        observers.stop_all(&cycle.handle, &extra).await
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let _ = cycle.handle.command_sender().send(ActorCommand::CloseAll { reply: reply_tx });
    let _ = reply_rx.await;

    state.store(ServerState::Stopped);
    stop_result
}

/// The per-cycle actor loop: the single task that owns the admission
/// counters, the client registry, and the timeout cache for one
/// start/stop cycle. Every other task communicates with it exclusively
/// through `ActorCommand` messages.
async fn run_actor(mut rx: mpsc::UnboundedReceiver<ActorCommand>, options: Options, now: Arc<AtomicU64>) {
    let mut admission = AdmissionController::new();
    let mut registry = ClientRegistry::new();
    let mut timeout_cache = TimeoutCache::new();
    let logger = Logger;
    let mut next_id: u64 = 1;

    while let Some(command) = rx.recv().await {
        match command {
            ActorCommand::Accept { connection, reply } => {
                let id = ClientId(next_id);
                next_id += 1;
                match admission.admit(&connection.network_id, connection.exempt, &options) {
                    Ok(()) => {
                        let _ = reply.send(AcceptVerdict::Admitted {
                            id,
                            network_id: connection.network_id,
                        });
                    }
                    Err(rejection @ AdmissionRejection::GlobalCapReached) => {
                        logger.debug("too many existing connections");
                        let _ = reply.send(AcceptVerdict::Rejected(rejection));
                    }
                    Err(rejection @ AdmissionRejection::PeerCapReached) => {
                        logger.debug(&format!("too many connections from peer {}", connection.network_id));
                        let _ = reply.send(AcceptVerdict::Rejected(rejection));
                    }
                }
            }
            ActorCommand::Registered { id, handle, expires_at } => {
                registry.insert(id, handle);
                timeout_cache.renew(id, expires_at);
            }
            ActorCommand::Tick(now_value) => {
                now.store(now_value, Ordering::Relaxed);
                for id in timeout_cache.drain_expired(now_value) {
                    if let Some(client) = registry.get(id) {
                        client.close();
                    }
                }
            }
            ActorCommand::Renew { id, expires_at } => {
                if registry.get(id).is_some() {
                    timeout_cache.renew(id, expires_at);
                }
            }
            ActorCommand::ClientClosed { id, network_id } => {
                registry.remove(id);
                timeout_cache.clear(id);
                admission.release(&network_id);
            }
            ActorCommand::CloseAll { reply } => {
                for client in registry.drain() {
                    client.close();
                }
                timeout_cache = TimeoutCache::new();
                let _ = reply.send(());
            }
        }
    }
}

/// A freshly accepted socket, admission-pending: TLS handshakes on
/// `Tls` listeners are deferred until after the admission verdict, so a
/// connection rejected for capacity reasons never pays handshake cost.
enum PendingAccept {
    Tcp(TcpStream, SocketAddr),
    Tls(TcpStream, SocketAddr, Arc<ServerConfig>),
    Unix(UnixStream),
}

impl PendingAccept {
    fn remote_addr(&self) -> Option<SocketAddr> {
        match self {
            PendingAccept::Tcp(_, addr) | PendingAccept::Tls(_, addr, _) => Some(*addr),
            PendingAccept::Unix(_) => None,
        }
    }

    fn is_unix(&self) -> bool {
        matches!(self, PendingAccept::Unix(_))
    }
}

async fn accept_once(listener: &BoundListener) -> std::io::Result<PendingAccept> {
    match listener {
        BoundListener::Tcp(listener) => {
            let (stream, addr) = listener.accept().await?;
            Ok(PendingAccept::Tcp(stream, addr))
        }
        BoundListener::Tls(listener, config) => {
            let (stream, addr) = listener.accept().await?;
            Ok(PendingAccept::Tls(stream, addr, Arc::clone(config)))
        }
        BoundListener::Unix(listener) => {
            let (stream, _addr) = listener.accept().await?;
            Ok(PendingAccept::Unix(stream))
        }
    }
}

/// Spawns the accept-loop task for a single bound listener. Cancelled
/// via `shutdown`; each accepted socket is run through admission control
/// on the actor task before being handed to the driver factory.
#[allow(clippy::too_many_arguments)]
fn spawn_acceptor_for(
    listener: Arc<BoundListener>,
    handle: SupervisorHandle,
    shutdown: CancellationToken,
    driver_factory: SharedDriverFactory,
    responder: SharedResponder,
    error_handler: SharedErrorHandler,
    connection_timeout: Duration,
    logger: Logger,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = accept_once(&listener) => {
                    match accepted {
                        Ok(pending) => {
                            handle_accept(
                                pending,
                                &handle,
                                &driver_factory,
                                &responder,
                                &error_handler,
                                connection_timeout,
                                &logger,
                            )
                            .await;
                        }
                        Err(error) => {
                            logger.alert(&format!("accept on {} failed: {error}", listener.local_addr_string()));
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    }
                }
            }
        }
    })
}

async fn handle_accept(
    pending: PendingAccept,
    handle: &SupervisorHandle,
    driver_factory: &SharedDriverFactory,
    responder: &SharedResponder,
    error_handler: &SharedErrorHandler,
    connection_timeout: Duration,
    logger: &Logger,
) {
    let remote_addr = pending.remote_addr();
    let is_unix = pending.is_unix();
    let network_id = network_id_for(remote_addr, is_unix);
    let exempt = is_unix || remote_addr.is_some_and(is_loopback);

    let (reply_tx, reply_rx) = oneshot::channel();
    let sent = handle.command_sender().send(ActorCommand::Accept {
        connection: RawAccept {
            network_id: network_id.clone(),
            exempt,
        },
        reply: reply_tx,
    });
    if sent.is_err() {
        return;
    }
    let Ok(verdict) = reply_rx.await else {
        return;
    };

    let (id, network_id) = match verdict {
        AcceptVerdict::Admitted { id, network_id } => (id, network_id),
        AcceptVerdict::Rejected(rejection) => {
            logger.debug(&format!("rejected connection from {network_id}: {rejection:?}"));
            return;
        }
    };

    let connection = match pending {
        PendingAccept::Tcp(stream, addr) => Connection::Tcp(stream, addr),
        PendingAccept::Unix(stream) => Connection::Unix(stream),
        PendingAccept::Tls(stream, addr, config) => {
            let acceptor = TlsAcceptor::from(config);
            match acceptor.accept(stream).await {
                Ok(tls) => Connection::Tls(Box::new(tls), addr),
                Err(error) => {
                    logger.alert(&format!("TLS handshake failed for {addr}: {error}"));
                    let _ = handle
                        .command_sender()
                        .send(ActorCommand::ClientClosed { id, network_id });
                    return;
                }
            }
        }
    };

    let meta = ClientMeta {
        id,
        remote_addr,
        network_id,
        is_unix,
    };
    let forced_close = Arc::new(Notify::new());
    let client = Arc::new(ClientHandle::new(meta, handle.clone(), forced_close));

    let expires_at = handle.now() + connection_timeout.as_secs();
    let _ = handle.command_sender().send(ActorCommand::Registered {
        id,
        handle: Arc::downgrade(&client),
        expires_at,
    });

    let driver = driver_factory.create_driver(Arc::clone(&client), connection, Arc::clone(responder), Arc::clone(error_handler));
    tokio::spawn(async move {
        driver.run().await;
    });
}
