// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Per-request context threaded through every hook call.
//!
//! Grounded on khatru's `utils.go` (`GetConnection`/`GetAuthed`) and
//! `handlers.go`'s per-connection/per-REQ context values.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nostr::PublicKey;
use tokio::sync::watch;

/// Shared, cloneable per-connection identity and auth state.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    addr: SocketAddr,
    authed: watch::Sender<Option<PublicKey>>,
    internal: bool,
}

impl ConnectionInfo {
    /// Create connection info for a freshly accepted socket.
    pub fn new(addr: SocketAddr) -> Self {
        let (authed, _) = watch::channel(None);
        Self {
            addr,
            authed,
            internal: false,
        }
    }

    /// Context used for the relay's own internal queries (expiration sweeps,
    /// replaceable-event lookups) which bypass rate limits and auth gating.
    pub fn internal() -> Self {
        let mut info = Self::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        info.internal = true;
        info
    }

    /// The peer's socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Record a successful NIP-42 authentication.
    pub fn set_authed(&self, pubkey: PublicKey) {
        let _ = self.authed.send(Some(pubkey));
    }

    /// The currently authenticated pubkey, if any.
    pub fn authed(&self) -> Option<PublicKey> {
        *self.authed.borrow()
    }

    /// A future that resolves once authentication succeeds.
    pub fn wait_for_auth(&self) -> watch::Receiver<Option<PublicKey>> {
        self.authed.subscribe()
    }

    /// Whether this context represents an internally-issued query (not bound
    /// to any client connection).
    pub fn is_internal(&self) -> bool {
        self.internal
    }
}

/// Context passed to every hook invocation for a single frame / request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    connection: ConnectionInfo,
    subscription_id: Option<Arc<str>>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    /// Build a context scoped to a whole connection (no active subscription).
    pub fn for_connection(connection: ConnectionInfo) -> Self {
        Self {
            connection,
            subscription_id: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Derive a context scoped to one subscription id within this connection.
    pub fn for_subscription(&self, subscription_id: impl Into<Arc<str>>) -> Self {
        Self {
            connection: self.connection.clone(),
            subscription_id: Some(subscription_id.into()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context used for the relay's own internal operations.
    pub fn internal() -> Self {
        Self::for_connection(ConnectionInfo::internal())
    }

    /// The authenticated pubkey for this connection, if any.
    pub fn get_authed(&self) -> Option<PublicKey> {
        self.connection.authed()
    }

    /// The peer's address.
    pub fn get_ip(&self) -> SocketAddr {
        self.connection.addr()
    }

    /// The subscription id this context is scoped to, if any.
    pub fn get_subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// Whether this call originated from the relay itself (expiration sweep,
    /// replaceable-event resolution) rather than from a client frame.
    pub fn is_internal_call(&self) -> bool {
        self.connection.is_internal()
    }

    /// Mark this context's request (e.g. a REQ) as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`RequestContext::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Access the underlying connection info.
    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }
}
