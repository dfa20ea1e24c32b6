//! Coarse monotonic clock publisher.
//!
//! Services tens of thousands of idle connections whose only bookkeeping
//! need is "have I been silent too long?". Querying `Instant::now()` per
//! connection does not scale; instead a single background tick updates a
//! shared counter roughly once per second and the supervisor actor scans
//! the timeout cache off the back of that tick, not off a per-connection
//! timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::observer::Observer;
use crate::supervisor::{ActorCommand, SupervisorHandle};

/// Shared, cheap-to-read coarse clock.
///
/// `now()` reads an `AtomicU64` updated about once per second while the
/// owning supervisor is `Started`; it is not updated at all while
/// stopped, so callers should not rely on it advancing outside a start
/// cycle.
#[derive(Debug, Clone)]
pub struct TimeReference {
    now: Arc<AtomicU64>,
    cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
}

impl TimeReference {
    pub(crate) fn new() -> Self {
        TimeReference {
            now: Arc::new(AtomicU64::new(0)),
            cancel: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Returns the current coarse "now", in seconds since the reference
    /// started ticking in the current cycle. Reset to zero at the start
    /// of every cycle, not just the first.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Observer for TimeReference {
    async fn on_start(
        &self,
        server: &SupervisorHandle,
        _logger: &crate::logger::Logger,
        _error_handler: &crate::driver::SharedErrorHandler,
    ) -> anyhow::Result<()> {
        let token = CancellationToken::new();
        *self.cancel.lock().expect("time reference lock poisoned") = Some(token.clone());

        // Each start/stop cycle hands the actor a fresh `SupervisorHandle`
        // whose own coarse-clock atomic begins at zero (see
        // `Supervisor::start`). Reset this counter to match — otherwise a
        // restart after the server has been up long enough to have ticked
        // would keep counting from the previous cycle's accumulated total,
        // and the first `Tick` of the new cycle would jump straight to
        // that stale value, expiring every connection accepted in the
        // brief window before it arrives.
        self.now.store(0, Ordering::Relaxed);

        let now = Arc::clone(&self.now);
        let tx = server.command_sender().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let value = now.fetch_add(1, Ordering::Relaxed) + 1;
                        let _ = tx.send(ActorCommand::Tick(value));
                    }
                }
            }
        });

        Ok(())
    }

    async fn on_stop(&self, _server: &SupervisorHandle) -> anyhow::Result<()> {
        if let Some(token) = self.cancel.lock().expect("time reference lock poisoned").take() {
            token.cancel();
        }
        Ok(())
    }
}

impl Default for TimeReference {
    fn default() -> Self {
        Self::new()
    }
}
