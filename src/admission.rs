//! Two-tier admission control: a global connection cap and a per-peer cap
//! with loopback/Unix exemptions.
//!
//! Both caps use the same check-then-increment pattern: a connection is
//! rejected when the counter *already sits at* the configured max, and
//! only admitted (incrementing the counter) otherwise. The effective
//! ceiling is therefore exactly `max` simultaneously admitted connections
//! per counter — the `max`-plus-first attempt is the one rejected, not
//! the `max`-th. The specification calls this pre-increment-equality
//! check out explicitly as deliberate; checking the counter's value
//! before incrementing (rather than incrementing unconditionally and
//! comparing the new value) is the reading that reaches that ceiling
//! instead of stopping one connection short of it.

use std::collections::HashMap;

use crate::options::Options;

/// Why a connection was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejection {
    /// `clientCount` would exceed `Options::max_connections`.
    GlobalCapReached,
    /// `clientsPerPeer[network_id]` would exceed
    /// `Options::max_connections_per_peer`, and the peer is not exempt.
    PeerCapReached,
}

/// Tracks the counters the admission checks in [`AdmissionController::admit`]
/// read and mutate. Lives entirely on the supervisor's single owning task;
/// no synchronization is needed.
#[derive(Debug, Default)]
pub struct AdmissionController {
    client_count: u32,
    clients_per_peer: HashMap<String, u32>,
}

impl AdmissionController {
    /// Creates a controller with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current global connection count.
    #[must_use]
    pub fn client_count(&self) -> u32 {
        self.client_count
    }

    /// Current connection count for `network_id`, or zero if untracked.
    #[must_use]
    pub fn count_for_peer(&self, network_id: &str) -> u32 {
        self.clients_per_peer.get(network_id).copied().unwrap_or(0)
    }

    /// Attempts to admit a connection from `network_id`.
    ///
    /// `exempt` is `true` for loopback peers and Unix-domain peers, which
    /// still count toward the global cap but are never rejected by the
    /// per-peer cap. On success both counters have been incremented and
    /// the caller owns a matching [`AdmissionController::release`] call
    /// (performed automatically by the client's close callback). On
    /// rejection, no counter touched during this call is left changed —
    /// the net change is zero.
    pub fn admit(&mut self, network_id: &str, exempt: bool, options: &Options) -> Result<(), AdmissionRejection> {
        if self.client_count == options.max_connections {
            return Err(AdmissionRejection::GlobalCapReached);
        }

        let existing = self.clients_per_peer.get(network_id).copied().unwrap_or(0);
        if existing == options.max_connections_per_peer && !exempt {
            return Err(AdmissionRejection::PeerCapReached);
        }

        self.client_count += 1;
        *self.clients_per_peer.entry(network_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    /// Releases a previously admitted connection's counters. Called once
    /// per admitted client, from the close callback.
    pub fn release(&mut self, network_id: &str) {
        self.client_count = self.client_count.saturating_sub(1);
        if let Some(count) = self.clients_per_peer.get_mut(network_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.clients_per_peer.remove(network_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(max_connections: u32, max_per_peer: u32) -> Options {
        Options::builder()
            .max_connections(max_connections)
            .max_connections_per_peer(max_per_peer)
            .build()
    }

    #[test]
    fn global_cap_admits_up_to_max_and_rejects_the_next() {
        let opts = options(2, 100);
        let mut controller = AdmissionController::new();
        assert!(controller.admit("10.0.0.1", false, &opts).is_ok());
        assert!(controller.admit("10.0.0.2", false, &opts).is_ok());
        let result = controller.admit("10.0.0.3", false, &opts);
        assert_eq!(result, Err(AdmissionRejection::GlobalCapReached));
        assert_eq!(controller.client_count(), 2);
    }

    #[test]
    fn per_peer_cap_rejects_non_exempt_repeat_peer() {
        let opts = options(100, 1);
        let mut controller = AdmissionController::new();
        assert!(controller.admit("10.0.0.1", false, &opts).is_ok());
        let result = controller.admit("10.0.0.1", false, &opts);
        assert_eq!(result, Err(AdmissionRejection::PeerCapReached));
        assert_eq!(controller.client_count(), 1);
        assert_eq!(controller.count_for_peer("10.0.0.1"), 1);
    }

    #[test]
    fn rejected_admission_leaves_counters_unchanged() {
        let opts = options(1, 100);
        let mut controller = AdmissionController::new();
        assert!(controller.admit("10.0.0.1", false, &opts).is_ok());
        assert!(controller.admit("10.0.0.2", false, &opts).is_err());
        assert_eq!(controller.client_count(), 1);
        assert_eq!(controller.count_for_peer("10.0.0.2"), 0);
    }

    #[test]
    fn loopback_exemption_bypasses_per_peer_cap() {
        let opts = options(100, 1);
        let mut controller = AdmissionController::new();
        for _ in 0..5 {
            assert!(controller.admit("127.0.0.1", true, &opts).is_ok());
        }
        assert_eq!(controller.client_count(), 5);
        assert_eq!(controller.count_for_peer("127.0.0.1"), 5);
    }

    #[test]
    fn release_balances_a_successful_admit() {
        let opts = options(10, 10);
        let mut controller = AdmissionController::new();
        controller.admit("10.0.0.1", false, &opts).unwrap();
        controller.release("10.0.0.1");
        assert_eq!(controller.client_count(), 0);
        assert_eq!(controller.count_for_peer("10.0.0.1"), 0);
    }

    #[test]
    fn release_is_safe_on_an_untracked_peer() {
        let mut controller = AdmissionController::new();
        controller.release("never-admitted");
        assert_eq!(controller.client_count(), 0);
    }
}
