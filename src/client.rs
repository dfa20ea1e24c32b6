//! Accepted-connection handle and network-id derivation.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::supervisor::{ActorCommand, SupervisorHandle};

/// Process-local, monotonically assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// Per-peer admission grouping key: `"unix"` for AF_UNIX, the IPv4 address
/// for AF_INET, or the first 56 bits of an IPv6 address for AF_INET6.
pub fn network_id_for(addr: Option<SocketAddr>, is_unix: bool) -> String {
    if is_unix {
        return "unix".to_string();
    }
    match addr {
        Some(SocketAddr::V4(v4)) => v4.ip().to_string(),
        Some(SocketAddr::V6(v6)) => ipv6_56_prefix(*v6.ip()),
        None => "unix".to_string(),
    }
}

fn ipv6_56_prefix(addr: Ipv6Addr) -> String {
    let octets = addr.octets();
    let mut prefix = [0u8; 16];
    // 56 bits is exactly 7 bytes; the remaining 9 stay zeroed.
    prefix[..7].copy_from_slice(&octets[..7]);
    Ipv6Addr::from(prefix).to_string()
}

/// Returns `true` for peers exempt from per-peer admission caps:
/// `::1`, `127.0.0.0/8`, and IPv4-mapped `::ffff:127.0.0.0/104`.
#[must_use]
pub fn is_loopback(addr: SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            match v6.to_ipv4_mapped() {
                Some(mapped) => mapped.is_loopback(),
                None => false,
            }
        }
    }
}

/// Immutable metadata describing an accepted connection.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    /// Unique connection identifier assigned by the admission controller.
    pub id: ClientId,
    /// Remote socket address, `None` for Unix-domain peers.
    pub remote_addr: Option<SocketAddr>,
    /// Admission grouping key derived from `remote_addr`/`is_unix`.
    pub network_id: String,
    /// Whether this connection arrived over an `AF_UNIX` listener.
    pub is_unix: bool,
}

/// Handle to an accepted connection held by the driver.
///
/// Renewing the timeout entry and eventually dropping (or explicitly
/// closing) this handle are the two ways a driver interacts with the
/// supervisor after handoff. Dropping the handle posts exactly one
/// close notification back to the supervisor actor, whether or not
/// `close()` was already called explicitly.
#[derive(Debug)]
pub struct ClientHandle {
    meta: ClientMeta,
    server: SupervisorHandle,
    closed: AtomicBool,
    forced_close: Arc<Notify>,
}

impl ClientHandle {
    pub(crate) fn new(meta: ClientMeta, server: SupervisorHandle, forced_close: Arc<Notify>) -> Self {
        ClientHandle {
            meta,
            server,
            closed: AtomicBool::new(false),
            forced_close,
        }
    }

    /// Resolves once the supervisor has decided this connection must
    /// close — an idle-timeout sweep or a shutdown deadline. Drivers
    /// `select!` their read/write loop against this to know when to
    /// stop reading and send a final response.
    pub async fn wait_for_forced_close(&self) {
        self.forced_close.notified().await;
    }

    /// Returns this connection's id.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.meta.id
    }

    /// Returns the connection's metadata.
    #[must_use]
    pub fn meta(&self) -> &ClientMeta {
        &self.meta
    }

    /// Renews this connection's timeout entry to `now + connection_timeout`.
    /// Drivers call this on every byte of read/write progress.
    pub fn renew_timeout(&self, expires_at: u64) {
        let _ = self
            .server
            .command_sender()
            .send(ActorCommand::Renew {
                id: self.meta.id,
                expires_at,
            });
    }

    /// Explicitly closes the connection. Idempotent; safe to call more
    /// than once, and safe to additionally let the handle drop.
    ///
    /// Wakes any task parked in
    /// [`wait_for_forced_close`](Self::wait_for_forced_close) and, the
    /// first time this is called, posts a close notification to the
    /// supervisor actor. Called both by a driver that has voluntarily
    /// finished with the connection and by the supervisor itself (idle
    /// timeout sweep, shutdown) to force an unresponsive one closed.
    pub fn close(&self) {
        self.forced_close.notify_waiters();
        self.notify_close_once();
    }

    fn notify_close_once(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.server.command_sender().send(ActorCommand::ClientClosed {
                id: self.meta.id,
                network_id: self.meta.network_id.clone(),
            });
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.notify_close_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_id_for_unix_is_literal_unix() {
        assert_eq!(network_id_for(None, true), "unix");
    }

    #[test]
    fn network_id_for_ipv4_is_the_address() {
        let addr: SocketAddr = "10.0.0.1:1234".parse().unwrap();
        assert_eq!(network_id_for(Some(addr), false), "10.0.0.1");
    }

    #[test]
    fn network_id_for_ipv6_truncates_to_56_bits() {
        let addr: SocketAddr = "[2001:db8:1234:5678::1]:443".parse().unwrap();
        let id = network_id_for(Some(addr), false);
        // First 7 bytes (56 bits) preserved, rest zeroed.
        assert_eq!(id, "2001:db8:1234:5600::");
    }

    #[test]
    fn loopback_detects_ipv4_range() {
        assert!(is_loopback("127.0.0.1:80".parse().unwrap()));
        assert!(is_loopback("127.255.255.255:80".parse().unwrap()));
        assert!(!is_loopback("10.0.0.1:80".parse().unwrap()));
    }

    #[test]
    fn loopback_detects_ipv6_unspecified_loopback() {
        assert!(is_loopback("[::1]:80".parse().unwrap()));
        assert!(!is_loopback("[::2]:80".parse().unwrap()));
    }

    #[test]
    fn loopback_detects_ipv4_mapped_ipv6() {
        assert!(is_loopback("[::ffff:127.0.0.1]:80".parse().unwrap()));
        assert!(!is_loopback("[::ffff:10.0.0.1]:80".parse().unwrap()));
    }
}
