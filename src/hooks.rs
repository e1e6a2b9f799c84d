// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Hook chains.
//!
//! A relay is built by attaching ordered chains of hooks at each pipeline
//! phase (connection accept, event write, filter open, storage, deletion,
//! info document). Any hook in a chain may short-circuit the rest. The
//! pattern mirrors [`WritePolicy`]/[`QueryPolicy`] from the upstream relay
//! builder: an async trait method returning a [`BoxedFuture`] instead of
//! `async_trait`, so hooks stay object-safe and allocation-free to register.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use async_utility::futures_util::stream::BoxStream;
use nostr::{Event, Filter};

use crate::context::RequestContext;
use crate::info::RelayInformationDocument;
use crate::store::StoreError;

/// A boxed, `Send` future, returned by every hook method.
pub type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of an admission check (event write or filter open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyResult {
    /// Allow the operation to proceed.
    Accept,
    /// Reject with a human-readable reason. The caller prefixes it with the
    /// appropriate machine-readable prefix (`blocked:`, `rate-limited:`, ...)
    /// unless the reason already carries one.
    Reject(String),
}

impl PolicyResult {
    /// `true` if this is a [`PolicyResult::Reject`].
    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }
}

/// Gate applied to the raw HTTP request before a WebSocket upgrade completes.
pub trait RejectConnection: std::fmt::Debug + Send + Sync {
    /// Return `true` to refuse the upgrade (the caller replies HTTP 429).
    fn reject<'a>(&'a self, addr: &'a SocketAddr) -> BoxedFuture<'a, bool>;
}

/// Fired once a connection has been accepted and registered.
pub trait OnConnect: std::fmt::Debug + Send + Sync {
    /// Runs after the connection is registered, before the reader loop starts.
    fn on_connect<'a>(&'a self, ctx: &'a RequestContext) -> BoxedFuture<'a, ()>;
}

/// Fired during connection teardown.
pub trait OnDisconnect: std::fmt::Debug + Send + Sync {
    /// Runs once, before listeners belonging to the connection are removed.
    fn on_disconnect<'a>(&'a self, ctx: &'a RequestContext) -> BoxedFuture<'a, ()>;
}

/// Write-path admission policy: may reject an inbound `EVENT`.
pub trait WritePolicy: std::fmt::Debug + Send + Sync {
    /// Decide whether `event` may be ingested.
    fn admit_event<'a>(
        &'a self,
        ctx: &'a RequestContext,
        event: &'a Event,
    ) -> BoxedFuture<'a, PolicyResult>;
}

/// Read-path admission policy: may reject a `REQ`/`COUNT` filter.
pub trait QueryPolicy: std::fmt::Debug + Send + Sync {
    /// Decide whether `filter` may be queried / subscribed to.
    fn admit_query<'a>(
        &'a self,
        ctx: &'a RequestContext,
        filter: &'a Filter,
    ) -> BoxedFuture<'a, PolicyResult>;
}

/// Mutates a filter before it is used to query storage or matched live.
///
/// Setting [`Filter::limit`] to `Some(0)` (the `limit_zero` convention) skips
/// the stored-events query while still installing the live listener.
pub trait OverwriteFilter: std::fmt::Debug + Send + Sync {
    /// Mutate `filter` in place.
    fn overwrite<'a>(&'a self, ctx: &'a RequestContext, filter: &'a mut Filter) -> BoxedFuture<'a, ()>;
}

/// Mutates an event copy immediately before it is written out to a client.
pub trait OverwriteResponseEvent: std::fmt::Debug + Send + Sync {
    /// Mutate `event` in place. Does not affect the stored copy.
    fn overwrite<'a>(&'a self, ctx: &'a RequestContext, event: &'a mut Event) -> BoxedFuture<'a, ()>;
}

/// Overrides the default "only the author may delete" outcome for NIP-09.
pub trait OverwriteDeletionOutcome: std::fmt::Debug + Send + Sync {
    /// Decide whether `deletion` may remove `target`.
    fn overwrite<'a>(
        &'a self,
        ctx: &'a RequestContext,
        target: &'a Event,
        deletion: &'a Event,
    ) -> BoxedFuture<'a, PolicyResult>;
}

/// Persists an accepted event. Implementations signal a duplicate with
/// [`StoreError::Duplicate`], which the pipeline treats as a non-error OK.
pub trait StoreEvent: std::fmt::Debug + Send + Sync {
    /// Persist `event`.
    fn store<'a>(&'a self, ctx: &'a RequestContext, event: &'a Event) -> BoxedFuture<'a, Result<(), StoreError>>;
}

/// Backend-native replace for replaceable/addressable events. When any
/// `ReplaceEvent` hook is registered it is used instead of the manual
/// query-then-delete-then-store fallback in the pipeline.
pub trait ReplaceEvent: std::fmt::Debug + Send + Sync {
    /// Atomically replace the prior event for `event`'s `(pubkey, kind[, d])` key.
    fn replace<'a>(&'a self, ctx: &'a RequestContext, event: &'a Event) -> BoxedFuture<'a, Result<(), StoreError>>;
}

/// Removes a stored event by identity.
pub trait DeleteEvent: std::fmt::Debug + Send + Sync {
    /// Delete `event` from storage.
    fn delete<'a>(&'a self, ctx: &'a RequestContext, event: &'a Event) -> BoxedFuture<'a, Result<(), StoreError>>;
}

/// Queries storage for events matching `filter`.
///
/// May be registered more than once (e.g. a hot cache plus a cold archive);
/// the subscription engine fans results from every registered querier in.
pub trait QueryEvents: std::fmt::Debug + Send + Sync {
    /// Stream matching events. The stream ends when exhausted.
    fn query<'a>(&'a self, ctx: &'a RequestContext, filter: &'a Filter) -> BoxedFuture<'a, Result<BoxStream<'static, Event>, StoreError>>;
}

/// Counts events matching `filter` (NIP-45).
pub trait CountEvents: std::fmt::Debug + Send + Sync {
    /// Exact count of matching events.
    fn count<'a>(&'a self, ctx: &'a RequestContext, filter: &'a Filter) -> BoxedFuture<'a, Result<u64, StoreError>>;
}

/// Counts events via a mergeable HyperLogLog sketch (NIP-45 `hll` field).
pub trait CountEventsHll: std::fmt::Debug + Send + Sync {
    /// Exact count plus an offset-keyed HLL register sketch.
    fn count_hll<'a>(
        &'a self,
        ctx: &'a RequestContext,
        filter: &'a Filter,
        offset: u8,
    ) -> BoxedFuture<'a, Result<(u64, Vec<u8>), StoreError>>;
}

/// Fired after an event has been durably stored (not for ephemeral events).
pub trait OnEventSaved: std::fmt::Debug + Send + Sync {
    /// Runs once, after storage succeeds.
    fn on_saved<'a>(&'a self, ctx: &'a RequestContext, event: &'a Event) -> BoxedFuture<'a, ()>;
}

/// Fired for ephemeral events instead of [`OnEventSaved`], since they are
/// never stored.
pub trait OnEphemeralEvent: std::fmt::Debug + Send + Sync {
    /// Runs once, right before broadcast.
    fn on_ephemeral<'a>(&'a self, ctx: &'a RequestContext, event: &'a Event) -> BoxedFuture<'a, ()>;
}

/// Suppresses live delivery of an otherwise-matching event to one listener.
pub trait PreventBroadcast: std::fmt::Debug + Send + Sync {
    /// Return `true` to suppress delivery of `event` to `ctx`'s connection.
    fn prevent<'a>(&'a self, ctx: &'a RequestContext, event: &'a Event) -> BoxedFuture<'a, bool>;
}

/// Customizes the NIP-11 document before it is served.
pub trait OverwriteRelayInformation: std::fmt::Debug + Send + Sync {
    /// Return a (possibly modified) copy of `info`.
    fn overwrite<'a>(
        &'a self,
        addr: &'a SocketAddr,
        info: RelayInformationDocument,
    ) -> BoxedFuture<'a, RelayInformationDocument>;
}

/// All hook chains a [`crate::relay::Relay`] consults, grouped the way
/// `relay.go`'s field list groups them.
#[derive(Default)]
pub struct HookChains {
    pub(crate) reject_connection: Vec<Box<dyn RejectConnection>>,
    pub(crate) on_connect: Vec<Box<dyn OnConnect>>,
    pub(crate) on_disconnect: Vec<Box<dyn OnDisconnect>>,
    pub(crate) write_policy: Vec<Box<dyn WritePolicy>>,
    pub(crate) query_policy: Vec<Box<dyn QueryPolicy>>,
    pub(crate) count_policy: Vec<Box<dyn QueryPolicy>>,
    pub(crate) overwrite_filter: Vec<Box<dyn OverwriteFilter>>,
    pub(crate) overwrite_count_filter: Vec<Box<dyn OverwriteFilter>>,
    pub(crate) overwrite_response_event: Vec<Box<dyn OverwriteResponseEvent>>,
    pub(crate) overwrite_deletion_outcome: Vec<Box<dyn OverwriteDeletionOutcome>>,
    pub(crate) store_event: Vec<Box<dyn StoreEvent>>,
    pub(crate) replace_event: Vec<Box<dyn ReplaceEvent>>,
    pub(crate) delete_event: Vec<Box<dyn DeleteEvent>>,
    pub(crate) query_events: Vec<Box<dyn QueryEvents>>,
    pub(crate) count_events: Vec<Box<dyn CountEvents>>,
    pub(crate) count_events_hll: Vec<Box<dyn CountEventsHll>>,
    pub(crate) on_event_saved: Vec<Box<dyn OnEventSaved>>,
    pub(crate) on_ephemeral_event: Vec<Box<dyn OnEphemeralEvent>>,
    pub(crate) prevent_broadcast: Vec<Box<dyn PreventBroadcast>>,
    pub(crate) overwrite_relay_information: Vec<Box<dyn OverwriteRelayInformation>>,
}

impl std::fmt::Debug for HookChains {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChains")
            .field("write_policy", &self.write_policy.len())
            .field("query_policy", &self.query_policy.len())
            .field("store_event", &self.store_event.len())
            .field("query_events", &self.query_events.len())
            .finish_non_exhaustive()
    }
}
