// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Re-exports of the types most callers need, so `use nostr_relay_core::prelude::*;`
//! is enough to build and run a relay.

pub use nostr;
pub use nostr::{Event, EventBuilder, EventId, Filter, Keys, Kind, PublicKey, Timestamp};

pub use crate::builder::{ConnectionOptions, Nip42Mode, RateLimit, RelayBuilder};
pub use crate::context::{ConnectionInfo, RequestContext};
pub use crate::error::Error;
pub use crate::event_class::EventClass;
pub use crate::hooks::{
    BoxedFuture, CountEvents, CountEventsHll, DeleteEvent, HookChains, OnConnect, OnDisconnect,
    OnEphemeralEvent, OnEventSaved, OverwriteDeletionOutcome, OverwriteFilter,
    OverwriteRelayInformation, OverwriteResponseEvent, PolicyResult, PreventBroadcast, QueryEvents,
    QueryPolicy, RejectConnection, ReplaceEvent, StoreEvent, WritePolicy,
};
pub use crate::info::{DynamicNipFlags, RelayInformationDocument};
pub use crate::listener::{CancelCause, ConnectionId, Listener, ListenerRegistry};
pub use crate::local::LocalRelay;
pub use crate::mock::MockRelay;
pub use crate::negentropy::NegentropySessions;
pub use crate::nip86::{ManagementApi, ManagementRequest, ManagementResponse};
pub use crate::protocol::{ClientMessage, ParseError, ReasonPrefix, RelayMessage, SubscriptionId};
pub use crate::relay::Relay;
pub use crate::router::{Route, RouteBuilder, Router};
pub use crate::store::{EventStoreBackend, MemoryStore, StoreError};

/// This crate's `Result` alias, matching the teacher's convention.
pub type Result<T, E = Error> = std::result::Result<T, E>;
