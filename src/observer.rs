//! Lifecycle hook trait and the registry that fans `start`/`stop` out to
//! every attached observer.

use crate::driver::SharedErrorHandler;
use crate::logger::Logger;
use crate::supervisor::SupervisorHandle;

/// A component with lifecycle hooks tied to the supervisor's start/stop
/// cycle: [`TimeReference`](crate::time_reference::TimeReference),
/// responders, and driver factories that own background resources all
/// implement this.
#[async_trait::async_trait]
pub trait Observer: Send + Sync {
    /// Called once per start cycle, after the listeners are bound and
    /// before the first connection is accepted.
    async fn on_start(
        &self,
        server: &SupervisorHandle,
        logger: &Logger,
        error_handler: &SharedErrorHandler,
    ) -> anyhow::Result<()>;

    /// Called once per stop cycle, after accept loops have been told to
    /// stop and before listeners are dropped.
    async fn on_stop(&self, server: &SupervisorHandle) -> anyhow::Result<()>;
}

/// Ordered collection of observers, fanned out concurrently on both
/// start and stop.
///
/// Registration order is preserved for inspection, but `start_all`/
/// `stop_all` run every observer concurrently rather than sequentially:
/// an observer's startup delay (a cache warm, a TLS context load) should
/// not gate the others. Both calls capture the first error encountered
/// and keep running the rest, returning that first error to the caller
/// once every observer has finished.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<std::sync::Arc<dyn Observer>>,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        ObserverRegistry {
            observers: Vec::new(),
        }
    }

    /// Attaches an observer. Order of attachment is preserved but does
    /// not affect start/stop ordering, since both fan out concurrently.
    pub fn attach(&mut self, observer: std::sync::Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Number of attached observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns `true` if no observers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Runs every observer's `on_start` concurrently, plus `extra`
    /// borrowed observers that are not individually owned by this
    /// registry — namely the driver factory and responder when either
    /// also implements [`Observer`]. Returns the first error encountered,
    /// if any, after every observer (owned and extra) has run.
    pub async fn start_all(
        &self,
        server: &SupervisorHandle,
        logger: &Logger,
        error_handler: &SharedErrorHandler,
        extra: &[&dyn Observer],
    ) -> anyhow::Result<()> {
        let owned = self.observers.iter().map(|observer| observer.on_start(server, logger, error_handler));
        let borrowed = extra.iter().map(|observer| observer.on_start(server, logger, error_handler));
        let results = futures_util::future::join_all(owned.chain(borrowed)).await;
        first_error(results)
    }

    /// Runs every observer's `on_stop` concurrently, plus `extra` — see
    /// [`start_all`](Self::start_all). Returns the first error
    /// encountered, if any, after all observers have run.
    pub async fn stop_all(&self, server: &SupervisorHandle, extra: &[&dyn Observer]) -> anyhow::Result<()> {
        let owned = self.observers.iter().map(|observer| observer.on_stop(server));
        let borrowed = extra.iter().map(|observer| observer.on_stop(server));
        let results = futures_util::future::join_all(owned.chain(borrowed)).await;
        first_error(results)
    }
}

fn first_error(results: Vec<anyhow::Result<()>>) -> anyhow::Result<()> {
    for result in results {
        if result.is_err() {
            return result;
        }
    }
    Ok(())
}
