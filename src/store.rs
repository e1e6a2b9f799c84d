// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The storage capability contract.
//!
//! Concrete storage backends (LMDB, RocksDB, Postgres, ...) are out of scope
//! for this crate; what matters here is the interface the pipeline (§4.4)
//! and subscription engine (§4.5) program against, plus a reference
//! in-memory implementation, used the same way `builder.rs`'s `Default` impl
//! uses it: as the relay's out-of-the-box backend.

use std::collections::HashMap;
use std::sync::RwLock;

use async_utility::futures_util::stream::{self, BoxStream};
use nostr::{Event, EventId, Filter};
use thiserror::Error;

/// Error surfaced by an [`EventStoreBackend`] implementation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The event was already stored; the pipeline treats this as a
    /// non-error OK with `skip_broadcast = true`.
    #[error("duplicate event")]
    Duplicate,
    /// Backend-specific failure; surfaced to the client as `error: <msg>`.
    #[error("{0}")]
    Backend(String),
}

/// Minimal storage contract an `EventStore` (and the hooks in [`crate::hooks`]
/// that wrap it) must satisfy.
///
/// This is deliberately small: save, delete, query, count. Replaceable /
/// addressable resolution, expiration, and deletion authorization all live
/// in the pipeline, one layer up, so that a backend only needs to implement
/// "durable append-only event storage with id/filter lookup."
#[async_trait::async_trait]
pub trait EventStoreBackend: std::fmt::Debug + Send + Sync {
    /// Persist `event`. Returns [`StoreError::Duplicate`] if already present.
    async fn save(&self, event: &Event) -> Result<(), StoreError>;

    /// Remove the event with this id, if present. Deleting a missing id is
    /// not an error.
    async fn delete(&self, id: &EventId) -> Result<(), StoreError>;

    /// All currently-stored events matching `filter`, newest first.
    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, StoreError>;

    /// Count of stored events matching `filter`.
    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;
}

/// A simple thread-safe in-memory [`EventStoreBackend`], the default backend
/// a [`crate::builder::RelayBuilder`] wires up when none is supplied — the
/// same role `MemoryDatabase` plays as `builder.rs`'s `Default` backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<EventId, Event>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventStoreBackend for MemoryStore {
    async fn save(&self, event: &Event) -> Result<(), StoreError> {
        let mut events = self.events.write().unwrap();
        if events.contains_key(&event.id) {
            return Err(StoreError::Duplicate);
        }
        events.insert(event.id, event.clone());
        Ok(())
    }

    async fn delete(&self, id: &EventId) -> Result<(), StoreError> {
        self.events.write().unwrap().remove(id);
        Ok(())
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read().unwrap();
        let mut matched: Vec<Event> = events
            .values()
            .filter(|e| filter.match_event(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let events = self.events.read().unwrap();
        Ok(events.values().filter(|e| filter.match_event(e)).count() as u64)
    }
}

/// Adapt an [`EventStoreBackend`] into the `QueryEvents` hook's lazy-stream
/// shape used by the subscription engine.
pub fn query_stream(events: Vec<Event>) -> BoxStream<'static, Event> {
    Box::pin(stream::iter(events))
}
