//! Ordered connection-id -> expiry mapping backing the idle-timeout sweep.

use indexmap::IndexMap;

use crate::client::ClientId;

/// Ordered map from connection id to expiry timestamp (seconds).
///
/// Every renewal uses `now + connection_timeout` with a non-decreasing
/// `now` and a constant `connection_timeout`, so insertion order and
/// non-decreasing `expires_at` order coincide: [`TimeoutCache::drain_expired`]
/// can stop at the first entry that has not yet expired instead of
/// scanning the whole map.
#[derive(Debug, Default)]
pub struct TimeoutCache {
    entries: IndexMap<ClientId, u64>,
}

impl TimeoutCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        TimeoutCache {
            entries: IndexMap::new(),
        }
    }

    /// Inserts `id`, or moves it to the tail of the order if already
    /// present, recording `expires_at` as its new expiry.
    pub fn renew(&mut self, id: ClientId, expires_at: u64) {
        self.entries.shift_remove(&id);
        self.entries.insert(id, expires_at);
    }

    /// Removes `id`'s entry. No-op if absent.
    pub fn clear(&mut self, id: ClientId) {
        self.entries.shift_remove(&id);
    }

    /// Returns the number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every entry whose `expires_at` is `<= now`,
    /// stopping at the first entry that has not yet expired. `O(k)` in
    /// the number of expirations found this tick.
    pub fn drain_expired(&mut self, now: u64) -> Vec<ClientId> {
        let mut expired = Vec::new();
        while let Some((_, expires_at)) = self.entries.first() {
            if *expires_at > now {
                break;
            }
            let (id, _) = self.entries.shift_remove_index(0).expect("checked non-empty above");
            expired.push(id);
        }
        expired
    }

    /// Yields entries in current (renewal) order, oldest expiry first.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, u64)> + '_ {
        self.entries.iter().map(|(id, expires_at)| (*id, *expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ClientId {
        ClientId(n)
    }

    #[test]
    fn renew_inserts_new_entries_in_order() {
        let mut cache = TimeoutCache::new();
        cache.renew(id(1), 10);
        cache.renew(id(2), 20);
        let order: Vec<_> = cache.iter().collect();
        assert_eq!(order, vec![(id(1), 10), (id(2), 20)]);
    }

    #[test]
    fn renew_moves_existing_entry_to_tail() {
        let mut cache = TimeoutCache::new();
        cache.renew(id(1), 10);
        cache.renew(id(2), 20);
        cache.renew(id(1), 30);
        let order: Vec<_> = cache.iter().collect();
        assert_eq!(order, vec![(id(2), 20), (id(1), 30)]);
    }

    #[test]
    fn clear_removes_entry() {
        let mut cache = TimeoutCache::new();
        cache.renew(id(1), 10);
        cache.clear(id(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_is_noop_when_absent() {
        let mut cache = TimeoutCache::new();
        cache.clear(id(99));
        assert!(cache.is_empty());
    }

    #[test]
    fn drain_expired_stops_at_first_non_expired() {
        let mut cache = TimeoutCache::new();
        cache.renew(id(1), 10);
        cache.renew(id(2), 20);
        cache.renew(id(3), 30);

        let expired = cache.drain_expired(20);
        assert_eq!(expired, vec![id(1), id(2)]);
        assert_eq!(cache.len(), 1);

        let order: Vec<_> = cache.iter().collect();
        assert_eq!(order, vec![(id(3), 30)]);
    }

    #[test]
    fn drain_expired_handles_no_expirations() {
        let mut cache = TimeoutCache::new();
        cache.renew(id(1), 100);
        let expired = cache.drain_expired(5);
        assert!(expired.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn drain_expired_handles_empty_cache() {
        let mut cache = TimeoutCache::new();
        assert!(cache.drain_expired(1000).is_empty());
    }
}
