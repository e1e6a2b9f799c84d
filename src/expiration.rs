// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! NIP-40 expiration sweeper.
//!
//! Grounded on `expiration.go`: a min-heap keyed by `expires_at`, an initial
//! full scan on first tick, and a periodic sweep thereafter that deletes
//! everything due.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use nostr::{EventId, Timestamp};

#[derive(Debug, Clone, Eq, PartialEq)]
struct Expiring {
    expires_at: Timestamp,
    id: EventId,
}

impl Ord for Expiring {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expires_at.cmp(&other.expires_at).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Expiring {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Tracks every stored event with an `expiration` tag and evicts it once due.
#[derive(Debug, Default)]
pub struct ExpirationManager {
    heap: Mutex<BinaryHeap<Reverse<Expiring>>>,
}

impl ExpirationManager {
    /// An empty manager; [`ExpirationManager::sweep_interval`] governs how
    /// often [`ExpirationManager::due`] should be polled by the caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default sweep period, matching `expiration.go`'s hourly default.
    pub fn sweep_interval() -> Duration {
        Duration::from_secs(3600)
    }

    /// Track a newly-stored event that carries an `expiration` tag.
    pub fn track(&self, id: EventId, expires_at: Timestamp) {
        self.heap
            .lock()
            .unwrap()
            .push(Reverse(Expiring { expires_at, id }));
    }

    /// Stop tracking `id` (called when it is deleted through another path,
    /// e.g. NIP-09). Linear scan: the heap is expected to stay small enough
    /// in practice that this is cheap, matching `expiration.go`'s approach.
    pub fn untrack(&self, id: &EventId) {
        let mut heap = self.heap.lock().unwrap();
        let remaining: Vec<Reverse<Expiring>> = heap
            .drain()
            .filter(|Reverse(e)| &e.id != id)
            .collect();
        *heap = remaining.into_iter().collect();
    }

    /// Pop every id whose `expires_at` is at or before `now`.
    pub fn due(&self, now: Timestamp) -> Vec<EventId> {
        let mut heap = self.heap.lock().unwrap();
        let mut due = Vec::new();
        while let Some(Reverse(top)) = heap.peek() {
            if top.expires_at > now {
                break;
            }
            let Reverse(expiring) = heap.pop().unwrap();
            due.push(expiring.id);
        }
        due
    }

    /// Number of events currently tracked.
    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::EventId;

    fn id(byte: u8) -> EventId {
        EventId::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn due_pops_only_expired_entries_in_order() {
        let mgr = ExpirationManager::new();
        mgr.track(id(1), Timestamp::from(100));
        mgr.track(id(2), Timestamp::from(50));
        mgr.track(id(3), Timestamp::from(200));

        let due = mgr.due(Timestamp::from(150));
        assert_eq!(due, vec![id(2), id(1)]);
        assert_eq!(mgr.len(), 1);

        let due = mgr.due(Timestamp::from(200));
        assert_eq!(due, vec![id(3)]);
        assert!(mgr.is_empty());
    }

    #[test]
    fn untrack_removes_without_waiting_for_expiry() {
        let mgr = ExpirationManager::new();
        mgr.track(id(1), Timestamp::from(100));
        mgr.untrack(&id(1));
        assert!(mgr.is_empty());
    }
}
