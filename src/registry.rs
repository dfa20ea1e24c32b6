//! Map from connection id to the active client handle.
//!
//! Holds only a [`Weak`] reference to each [`ClientHandle`]: the strong
//! reference lives with whichever task is running the client's driver.
//! Once that task drops its `Arc`, the handle's `Drop` impl posts a close
//! notification back to the supervisor actor, which is the only place
//! this registry is mutated (see [`crate::supervisor`]).

use std::collections::HashMap;
use std::sync::Weak;

use crate::client::{ClientHandle, ClientId};

/// Registry of currently admitted connections, keyed by connection id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Weak<ClientHandle>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a newly admitted client.
    pub fn insert(&mut self, id: ClientId, client: Weak<ClientHandle>) {
        self.clients.insert(id, client);
    }

    /// Removes `id` from the registry. No-op if absent.
    pub fn remove(&mut self, id: ClientId) {
        self.clients.remove(&id);
    }

    /// Looks up a still-live client by id, dropping the entry if its
    /// strong reference has already gone away.
    pub fn get(&self, id: ClientId) -> Option<std::sync::Arc<ClientHandle>> {
        self.clients.get(&id).and_then(Weak::upgrade)
    }

    /// Number of tracked connections. Matches `client_count` in a
    /// consistent supervisor (invariant I1).
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// All tracked connection ids, in arbitrary order. Used to drive the
    /// "close every active client" step of the shutdown sequence.
    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    /// Drops every tracked entry, returning the still-live handles so the
    /// caller can force-close and explicitly close each one.
    pub fn drain(&mut self) -> Vec<std::sync::Arc<ClientHandle>> {
        self.clients.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
    }
}
