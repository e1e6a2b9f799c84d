// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The live-subscription registry.
//!
//! One flat `Vec<Listener>` per (sub-)relay backs O(1) swap-delete removal;
//! a companion per-connection index lets teardown remove every listener a
//! socket owns in one pass. Grounded on spec §4.5.3 and, for the concurrent
//! registry shape, on `subscription_registry.rs`'s `ConnectionSubscriptions`
//! (used there as a `DashMap`-backed analogue of the same idea).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nostr::Filter;
use tokio::sync::mpsc;

use crate::protocol::RelayMessage;

/// Why a listener stopped receiving live events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// Client sent `CLOSE` for this subscription id.
    ClosedByClient,
    /// A filter in the opening `REQ` was rejected mid-request.
    FilterRejected,
    /// The owning connection was torn down.
    ConnectionClosed,
}

impl CancelCause {
    /// The human-readable reason sent back in a `CLOSED` frame.
    pub fn reason(self) -> &'static str {
        match self {
            Self::ClosedByClient => "subscription closed by client",
            Self::FilterRejected => "filter rejected",
            Self::ConnectionClosed => "connection closed",
        }
    }
}

/// Opaque identity for one connected websocket, used as the registry's
/// connection key. Cheap to clone and compare.
pub type ConnectionId = u64;

/// One live subscription: an id, its filter, and where to deliver matches.
#[derive(Debug)]
pub struct Listener {
    pub connection_id: ConnectionId,
    pub subscription_id: Arc<str>,
    pub filter: Filter,
    pub sender: mpsc::UnboundedSender<RelayMessage>,
}

struct ListenerSpec {
    subscription_id: Arc<str>,
    /// Index into `ListenerRegistry::listeners`.
    index: usize,
}

/// Registry of all live listeners for one (sub-)relay.
///
/// Mirrors khatru's `clients map[ws][]listenerSpec` + the relay's flat
/// `listeners` slice: registration appends to both; removal swap-deletes the
/// slice entry and patches whichever spec pointed at the element that moved.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    listeners: Vec<Listener>,
    by_connection: HashMap<ConnectionId, Vec<ListenerSpec>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &inner.listeners.len())
            .field("connections", &inner.by_connection.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new live listener, returning nothing: removal happens by
    /// `(connection_id, subscription_id)`, not by handle.
    pub fn add(&self, listener: Listener) {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.listeners.len();
        let connection_id = listener.connection_id;
        let subscription_id = listener.subscription_id.clone();
        inner.listeners.push(listener);
        inner
            .by_connection
            .entry(connection_id)
            .or_default()
            .push(ListenerSpec {
                subscription_id,
                index,
            });
    }

    /// Remove every listener for `(connection_id, subscription_id)`. Returns
    /// how many listeners were actually removed, so callers can tell a real
    /// `CLOSE` apart from one naming a subscription that was never opened.
    pub fn remove_subscription(&self, connection_id: ConnectionId, subscription_id: &str) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let Some(specs) = inner.by_connection.get_mut(&connection_id) else {
            return 0;
        };
        let mut removed_indices: Vec<usize> = Vec::new();
        specs.retain(|spec| {
            if spec.subscription_id.as_ref() == subscription_id {
                removed_indices.push(spec.index);
                false
            } else {
                true
            }
        });
        let removed = removed_indices.len();
        // Remove largest index first so earlier indices stay valid across
        // the loop.
        removed_indices.sort_unstable_by(|a, b| b.cmp(a));
        for index in removed_indices {
            Self::swap_delete(&mut inner, index);
        }
        removed
    }

    /// Remove every listener belonging to `connection_id` (connection teardown).
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().unwrap();
        let Some(specs) = inner.by_connection.remove(&connection_id) else {
            return;
        };
        let mut indices: Vec<usize> = specs.iter().map(|s| s.index).collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        for index in indices {
            Self::swap_delete(&mut inner, index);
        }
    }

    /// Swap-delete `index` out of `listeners`, patching the spec of whatever
    /// element moved into its place.
    fn swap_delete(inner: &mut Inner, index: usize) {
        if index >= inner.listeners.len() {
            return;
        }
        let moved_was_last = index == inner.listeners.len() - 1;
        inner.listeners.swap_remove(index);
        if moved_was_last {
            return;
        }
        // The element that used to be last is now at `index`; find its spec
        // (by connection + subscription id + old index) and patch it.
        let moved = &inner.listeners[index];
        let moved_connection = moved.connection_id;
        let moved_subscription = moved.subscription_id.clone();
        let old_index = inner.listeners.len(); // it used to be the last slot
        if let Some(specs) = inner.by_connection.get_mut(&moved_connection) {
            for spec in specs.iter_mut() {
                if spec.index == old_index && spec.subscription_id == moved_subscription {
                    spec.index = index;
                    break;
                }
            }
        }
    }

    /// Snapshot of listeners whose filter matches `event`, for live fan-out.
    pub fn matching(&self, event: &nostr::Event) -> Vec<(ConnectionId, Arc<str>, mpsc::UnboundedSender<RelayMessage>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .listeners
            .iter()
            .filter(|l| l.filter.match_event(event))
            .map(|l| (l.connection_id, l.subscription_id.clone(), l.sender.clone()))
            .collect()
    }

    /// Total number of live listeners (for diagnostics/tests).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }

    /// Whether the registry currently holds no listeners.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{EventBuilder, Keys};

    fn sample_event() -> nostr::Event {
        let keys = Keys::generate();
        EventBuilder::text_note("hello", []).to_event(&keys).unwrap()
    }

    #[test]
    fn swap_delete_keeps_indices_consistent() {
        let registry = ListenerRegistry::new();
        for i in 0..5u64 {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.add(Listener {
                connection_id: i % 2,
                subscription_id: Arc::from(format!("sub{i}")),
                filter: Filter::new(),
                sender: tx,
            });
        }
        assert_eq!(registry.len(), 5);
        registry.remove_subscription(0, "sub0");
        assert_eq!(registry.len(), 4);
        registry.remove_connection(1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn matching_events_route_to_live_listeners() {
        let registry = ListenerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add(Listener {
            connection_id: 1,
            subscription_id: Arc::from("sub"),
            filter: Filter::new(),
            sender: tx,
        });
        let event = sample_event();
        let matches = registry.matching(&event);
        assert_eq!(matches.len(), 1);
        matches[0]
            .2
            .send(RelayMessage::event(
                crate::protocol::SubscriptionId(matches[0].1.to_string()),
                event.clone(),
            ))
            .unwrap();
        let received = rx.try_recv().unwrap();
        match received {
            RelayMessage::Event { event: e, .. } => assert_eq!(e.id, event.id),
            _ => panic!("expected Event"),
        }
    }
}
