// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The programmable relay object: hook chains, storage, listeners,
//! expiration, and (optionally) the router, all built from a [`RelayBuilder`]
//! (§2, §4.1).
//!
//! Distinct from [`crate::local::LocalRelay`]: `Relay` holds no socket and
//! knows nothing about TCP/HTTP — it is the thing a connection handler
//! drives, not the thing that listens.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_utility::futures_util::StreamExt;
use nostr::Event;
use tokio::sync::Semaphore;

use crate::builder::{ConnectionOptions, Nip42Mode, RateLimit, RelayBuilder};
use crate::connection;
use crate::error::Error;
use crate::hooks::{BoxedFuture, CountEvents, DeleteEvent, HookChains, QueryEvents, StoreEvent};
use crate::info::{DynamicNipFlags, RelayInformationDocument};
use crate::listener::{ConnectionId, ListenerRegistry};
use crate::nip86::ManagementApi;
use crate::router::Router;
use crate::store::{query_stream, EventStoreBackend, StoreError};

/// Adapts the configured [`EventStoreBackend`] into the four storage hook
/// traits, so it always runs as the baseline link of each chain (§4.1:
/// "a capability contract the hook chains of the same name extend").
struct StoreBackendAdapter(Arc<dyn EventStoreBackend>);

impl fmt::Debug for StoreBackendAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBackendAdapter").finish_non_exhaustive()
    }
}

impl StoreEvent for StoreBackendAdapter {
    fn store<'a>(
        &'a self,
        _ctx: &'a crate::context::RequestContext,
        event: &'a Event,
    ) -> BoxedFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { self.0.save(event).await })
    }
}

impl DeleteEvent for StoreBackendAdapter {
    fn delete<'a>(
        &'a self,
        _ctx: &'a crate::context::RequestContext,
        event: &'a Event,
    ) -> BoxedFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { self.0.delete(&event.id).await })
    }
}

impl QueryEvents for StoreBackendAdapter {
    fn query<'a>(
        &'a self,
        _ctx: &'a crate::context::RequestContext,
        filter: &'a nostr::Filter,
    ) -> BoxedFuture<'a, Result<async_utility::futures_util::stream::BoxStream<'static, Event>, StoreError>> {
        Box::pin(async move {
            let events = self.0.query(filter).await?;
            Ok(query_stream(events))
        })
    }
}

impl CountEvents for StoreBackendAdapter {
    fn count<'a>(
        &'a self,
        _ctx: &'a crate::context::RequestContext,
        filter: &'a nostr::Filter,
    ) -> BoxedFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move { self.0.count(filter).await })
    }
}

/// A fully assembled relay: hook chains, storage, live listeners, expiration
/// tracking, and an optional router to sub-relays.
pub struct Relay {
    pub(crate) addr: Option<IpAddr>,
    pub(crate) port: Option<u16>,
    pub(crate) hooks: HookChains,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) expiration: crate::expiration::ExpirationManager,
    pub(crate) info: RelayInformationDocument,
    pub(crate) nip42: Nip42Mode,
    pub(crate) negentropy_enabled: bool,
    pub(crate) min_pow: Option<u8>,
    pub(crate) management: Option<ManagementApi>,
    pub(crate) rate_limit: RateLimit,
    pub(crate) connection_options: ConnectionOptions,
    pub(crate) connections_limit: Option<Arc<Semaphore>>,
    pub(crate) expiration_interval: std::time::Duration,
    pub(crate) service_url: Option<String>,
    pub(crate) router: Router,
    next_connection_id: AtomicU64,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("info", &self.info.name)
            .field("nip42", &self.nip42)
            .field("negentropy_enabled", &self.negentropy_enabled)
            .field("listeners", &self.listeners.len())
            .field("expiring", &self.expiration.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Assemble a `Relay` from a builder, splicing the configured storage
    /// backend in as the baseline store/delete/query/count hook ahead of any
    /// user-registered ones (§4.4.5, §4.5.2).
    pub fn from_builder(builder: RelayBuilder) -> Arc<Self> {
        let RelayBuilder {
            addr,
            port,
            store,
            rate_limit,
            connection_options,
            nip42,
            negentropy,
            min_pow,
            connections_limit,
            info,
            management,
            expiration_interval,
            service_url,
            router,
            reject_connection,
            on_connect,
            on_disconnect,
            write_policy,
            query_policy,
            count_policy,
            overwrite_filter,
            overwrite_count_filter,
            overwrite_response_event,
            overwrite_deletion_outcome,
            mut store_event,
            replace_event,
            mut delete_event,
            mut query_events,
            mut count_events,
            count_events_hll,
            on_event_saved,
            on_ephemeral_event,
            prevent_broadcast,
            overwrite_relay_information,
        } = builder;

        store_event.insert(0, Box::new(StoreBackendAdapter(store.clone())));
        delete_event.insert(0, Box::new(StoreBackendAdapter(store.clone())));
        query_events.insert(0, Box::new(StoreBackendAdapter(store.clone())));
        count_events.insert(0, Box::new(StoreBackendAdapter(store.clone())));

        let flags = DynamicNipFlags {
            has_delete_event: true,
            has_count_events: true,
            min_pow: min_pow.is_some(),
            expiration: true,
            negentropy,
            nip42: nip42 != Nip42Mode::Disabled,
            nip86: management.is_some(),
        };
        let info = info.with_dynamic_nips(flags);

        let hooks = HookChains {
            reject_connection,
            on_connect,
            on_disconnect,
            write_policy,
            query_policy,
            count_policy,
            overwrite_filter,
            overwrite_count_filter,
            overwrite_response_event,
            overwrite_deletion_outcome,
            store_event,
            replace_event,
            delete_event,
            query_events,
            count_events,
            count_events_hll,
            on_event_saved,
            on_ephemeral_event,
            prevent_broadcast,
            overwrite_relay_information,
        };

        Arc::new(Self {
            addr,
            port,
            hooks,
            listeners: ListenerRegistry::new(),
            expiration: crate::expiration::ExpirationManager::new(),
            info,
            nip42,
            negentropy_enabled: negentropy,
            min_pow,
            management,
            rate_limit,
            connection_options,
            connections_limit: connections_limit.map(|n| Arc::new(Semaphore::new(n))),
            expiration_interval,
            service_url,
            router,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Allocate a fresh, process-unique connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The NIP-11 information document, with dynamically detected NIPs baked in.
    pub fn info(&self) -> &RelayInformationDocument {
        &self.info
    }

    /// The sub-relay router (empty unless routes were registered on the builder).
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The externally-visible base URL used for NIP-42 `relay` tag matching,
    /// when explicitly configured.
    pub fn service_url(&self) -> Option<&str> {
        self.service_url.as_deref()
    }

    /// Run every `RejectConnection` hook; `true` means the connection must
    /// be refused before the WebSocket handshake completes (§4.2.1).
    pub async fn should_reject_connection(&self, addr: &SocketAddr) -> bool {
        for hook in &self.hooks.reject_connection {
            if hook.reject(addr).await {
                return true;
            }
        }
        false
    }

    /// Inject `event` straight into live-match fan-out, bypassing storage and
    /// every write/query policy. Grounded on khatru's `BroadcastEvent`
    /// (`broadcasting.go`): a bypass sub-relays and federation glue use to
    /// push events the write path never saw.
    pub async fn broadcast_event(self: &Arc<Self>, ctx: &crate::context::RequestContext, event: &Event) {
        crate::pipeline::broadcast(self, ctx, event).await;
    }

    /// Accept one already-established transport (TCP socket or an upgraded
    /// HTTP connection) as a nostr relay connection, running it to completion.
    pub async fn take_connection<S>(self: &Arc<Self>, io: S, addr: SocketAddr) -> Result<(), Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let _permit = match &self.connections_limit {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::ConnectionLimitReached)?,
            ),
            None => None,
        };
        let config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
            max_message_size: Some(self.connection_options.max_message_size),
            max_frame_size: Some(self.connection_options.max_message_size),
            ..Default::default()
        };
        let stream = tokio_tungstenite::accept_async_with_config(io, Some(config)).await?;
        connection::handle(Arc::clone(self), stream, addr).await;
        Ok(())
    }
}

/// Drain every registered `QueryEvents` hook, in order, collecting all
/// matching events. Shared by the ingestion pipeline and the subscription
/// engine's NIP-09/NIP-45 lookups.
pub(crate) async fn query_all(
    relay: &Arc<Relay>,
    ctx: &crate::context::RequestContext,
    filter: &nostr::Filter,
) -> Vec<Event> {
    let mut out = Vec::new();
    for hook in &relay.hooks.query_events {
        if let Ok(mut stream) = hook.query(ctx, filter).await {
            while let Some(event) = stream.next().await {
                out.push(event);
            }
        }
    }
    out
}
