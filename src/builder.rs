// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay builder.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::hooks::{
    CountEvents, CountEventsHll, DeleteEvent, OnConnect, OnDisconnect, OnEphemeralEvent,
    OnEventSaved, OverwriteDeletionOutcome, OverwriteFilter, OverwriteRelayInformation,
    OverwriteResponseEvent, PreventBroadcast, QueryEvents, QueryPolicy, RejectConnection,
    ReplaceEvent, StoreEvent, WritePolicy,
};
use crate::info::RelayInformationDocument;
use crate::nip86::ManagementApi;
use crate::router::Router;
use crate::store::{EventStoreBackend, MemoryStore};

/// Rate limit applied per connection.
#[derive(Debug, Clone)]
pub struct RateLimit {
    /// Max concurrently open `REQ` subscriptions per connection.
    pub max_reqs: usize,
    /// Max `EVENT` frames accepted per minute, per connection.
    pub notes_per_minute: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_reqs: 20,
            notes_per_minute: 60,
        }
    }
}

/// WebSocket timing/limits, matching `relay.go`'s fields.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Time allowed to write a message to the peer.
    pub write_wait: Duration,
    /// Time allowed to read the next pong from the peer.
    pub pong_wait: Duration,
    /// How often to send a ping; must be less than `pong_wait`.
    pub ping_period: Duration,
    /// Maximum inbound message size, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(30),
            max_message_size: 512_000,
        }
    }
}

/// NIP-42 gating mode for a relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Nip42Mode {
    /// No authentication required.
    #[default]
    Disabled,
    /// Authentication required to publish events.
    Write,
    /// Authentication required to publish events and to open subscriptions.
    ReadAndWrite,
}

/// Relay builder: gathers storage, hook chains, and connection options
/// before the relay starts accepting connections. Mirrors the teacher's
/// fluent `RelayBuilder`, generalized to register every hook chain from
/// §4.1 instead of only a database and a rate limit.
pub struct RelayBuilder {
    pub(crate) addr: Option<IpAddr>,
    pub(crate) port: Option<u16>,
    pub(crate) store: Arc<dyn EventStoreBackend>,
    pub(crate) rate_limit: RateLimit,
    pub(crate) connection_options: ConnectionOptions,
    pub(crate) nip42: Nip42Mode,
    pub(crate) negentropy: bool,
    pub(crate) min_pow: Option<u8>,
    pub(crate) connections_limit: Option<usize>,
    pub(crate) info: RelayInformationDocument,
    pub(crate) management: Option<ManagementApi>,
    pub(crate) expiration_interval: Duration,
    pub(crate) service_url: Option<String>,
    pub(crate) router: Router,

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

impl Default for RelayBuilder {
    fn default() -> Self {
        Self {
            addr: None,
            port: None,
            store: Arc::new(MemoryStore::new()),
            rate_limit: RateLimit::default(),
            connection_options: ConnectionOptions::default(),
            nip42: Nip42Mode::Disabled,
            negentropy: false,
            min_pow: None,
            connections_limit: None,
            info: RelayInformationDocument::new(
                "https://github.com/rust-nostr/nostr",
                env!("CARGO_PKG_VERSION"),
            ),
            management: None,
            expiration_interval: crate::expiration::ExpirationManager::sweep_interval(),
            service_url: None,
            router: Router::new(),

            reject_connection: Vec::new(),
            on_connect: Vec::new(),
            on_disconnect: Vec::new(),
            write_policy: Vec::new(),
            query_policy: Vec::new(),
            count_policy: Vec::new(),
            overwrite_filter: Vec::new(),
            overwrite_count_filter: Vec::new(),
            overwrite_response_event: Vec::new(),
            overwrite_deletion_outcome: Vec::new(),
            store_event: Vec::new(),
            replace_event: Vec::new(),
            delete_event: Vec::new(),
            query_events: Vec::new(),
            count_events: Vec::new(),
            count_events_hll: Vec::new(),
            on_event_saved: Vec::new(),
            on_ephemeral_event: Vec::new(),
            prevent_broadcast: Vec::new(),
            overwrite_relay_information: Vec::new(),
        }
    }
}

macro_rules! push_hook {
    ($name:ident, $field:ident, $trait_:path) => {
        /// Register a hook in this chain.
        #[inline]
        pub fn $name(mut self, hook: impl $trait_ + 'static) -> Self {
            self.$field.push(Box::new(hook));
            self
        }
    };
}

impl RelayBuilder {
    /// Bind to a specific IP address instead of the default.
    #[inline]
    pub fn addr(mut self, ip: IpAddr) -> Self {
        self.addr = Some(ip);
        self
    }

    /// Bind to a specific port instead of an auto-selected one.
    #[inline]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Use a custom storage backend in place of the in-memory default.
    #[inline]
    pub fn store(mut self, store: impl EventStoreBackend + 'static) -> Self {
        self.store = Arc::new(store);
        self
    }

    /// Configure the per-connection rate limit.
    #[inline]
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Configure WebSocket timing/limits.
    #[inline]
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Require NIP-42 authentication per `mode`.
    #[inline]
    pub fn nip42(mut self, mode: Nip42Mode) -> Self {
        self.nip42 = mode;
        self
    }

    /// Enable NIP-77 negentropy set reconciliation.
    #[inline]
    pub fn negentropy(mut self, enabled: bool) -> Self {
        self.negentropy = enabled;
        self
    }

    /// Require at least this many leading zero bits of proof-of-work (NIP-13)
    /// on every accepted event.
    #[inline]
    pub fn min_pow(mut self, difficulty: u8) -> Self {
        self.min_pow = Some(difficulty);
        self
    }

    /// Cap the number of concurrently open connections.
    #[inline]
    pub fn connections_limit(mut self, limit: usize) -> Self {
        self.connections_limit = Some(limit);
        self
    }

    /// Override the base NIP-11 information document.
    #[inline]
    pub fn info(mut self, info: RelayInformationDocument) -> Self {
        self.info = info;
        self
    }

    /// Attach a NIP-86 management API.
    #[inline]
    pub fn management(mut self, api: ManagementApi) -> Self {
        self.management = Some(api);
        self
    }

    /// Override how often the expiration manager sweeps (default: hourly).
    #[inline]
    pub fn expiration_interval(mut self, interval: Duration) -> Self {
        self.expiration_interval = interval;
        self
    }

    /// Fix the relay's externally-visible base URL (for NIP-42 `relay` tag
    /// matching) instead of deriving it from request headers / socket addr.
    #[inline]
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    /// Register one sub-relay route (§4.8). Routes are tried in registration order.
    #[inline]
    pub fn route(mut self, route: crate::router::Route) -> Self {
        self.router.add_route(route);
        self
    }

    push_hook!(reject_connection, reject_connection, RejectConnection);
    push_hook!(on_connect, on_connect, OnConnect);
    push_hook!(on_disconnect, on_disconnect, OnDisconnect);
    push_hook!(write_policy, write_policy, WritePolicy);
    push_hook!(query_policy, query_policy, QueryPolicy);
    push_hook!(count_policy, count_policy, QueryPolicy);
    push_hook!(overwrite_filter, overwrite_filter, OverwriteFilter);
    push_hook!(
        overwrite_count_filter,
        overwrite_count_filter,
        OverwriteFilter
    );
    push_hook!(
        overwrite_response_event,
        overwrite_response_event,
        OverwriteResponseEvent
    );
    push_hook!(
        overwrite_deletion_outcome,
        overwrite_deletion_outcome,
        OverwriteDeletionOutcome
    );
    push_hook!(store_event, store_event, StoreEvent);
    push_hook!(replace_event, replace_event, ReplaceEvent);
    push_hook!(delete_event, delete_event, DeleteEvent);
    push_hook!(query_events, query_events, QueryEvents);
    push_hook!(count_events, count_events, CountEvents);
    push_hook!(count_events_hll, count_events_hll, CountEventsHll);
    push_hook!(on_event_saved, on_event_saved, OnEventSaved);
    push_hook!(on_ephemeral_event, on_ephemeral_event, OnEphemeralEvent);
    push_hook!(prevent_broadcast, prevent_broadcast, PreventBroadcast);
    push_hook!(
        overwrite_relay_information,
        overwrite_relay_information,
        OverwriteRelayInformation
    );
}
