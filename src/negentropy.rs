// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Negentropy (NIP-77) set-reconciliation sessions.
//!
//! Grounded on `local/inner.rs`'s `NegOpen`/`NegMsg`/`NegClose` handling
//! (`NegentropyStorageVector` sealed then wrapped in a `Negentropy` client)
//! and on `negentropy.go` for the auto-close debounce and session lifetime.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use negentropy::{Bytes, Id, Negentropy, NegentropyStorageVector};
use nostr::{EventId, Timestamp};

use crate::error::Error;

/// Frame budget passed to [`Negentropy::new`], matching the teacher's usage.
const FRAME_SIZE_LIMIT: u64 = 60_000;

/// How long a session may sit idle before it is treated as abandoned.
pub const AUTO_CLOSE_DEBOUNCE: Duration = Duration::from_secs(7);

struct Session {
    reconciler: Negentropy<'static, NegentropyStorageVector>,
    last_active: Instant,
}

/// Per-connection table of open negentropy sessions, keyed by subscription id.
#[derive(Default)]
pub struct NegentropySessions {
    sessions: Mutex<HashMap<String, Session>>,
}

impl NegentropySessions {
    /// An empty session table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `subscription_id` seeded with `items` (ids +
    /// timestamps from the relay's own query), reconcile the client's
    /// opening message, and return our reply.
    pub fn open(
        &self,
        subscription_id: &str,
        items: Vec<(EventId, Timestamp)>,
        initial_message_hex: &str,
    ) -> Result<String, Error> {
        let mut storage = NegentropyStorageVector::with_capacity(items.len());
        for (id, timestamp) in items {
            let id = Id::new(id.to_bytes());
            storage
                .insert(timestamp.as_u64(), id)
                .map_err(Error::Negentropy)?;
        }
        storage.seal().map_err(Error::Negentropy)?;

        let mut reconciler = Negentropy::new(storage, FRAME_SIZE_LIMIT).map_err(Error::Negentropy)?;
        let incoming = Bytes::from_hex(initial_message_hex).map_err(Error::Negentropy)?;
        let reply = reconciler.reconcile(&incoming).map_err(Error::Negentropy)?;

        let reply_hex = reply.to_hex();
        if !reply.as_bytes().is_empty() {
            self.sessions.lock().unwrap().insert(
                subscription_id.to_string(),
                Session {
                    reconciler,
                    last_active: Instant::now(),
                },
            );
        }
        Ok(reply_hex)
    }

    /// Continue an existing session with the peer's next message.
    pub fn reconcile(&self, subscription_id: &str, message_hex: &str) -> Result<Option<String>, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(subscription_id) else {
            return Ok(None);
        };
        let incoming = Bytes::from_hex(message_hex).map_err(Error::Negentropy)?;
        let reply = session.reconciler.reconcile(&incoming).map_err(Error::Negentropy)?;
        session.last_active = Instant::now();
        let reply_hex = reply.to_hex();
        let is_empty = reply.as_bytes().is_empty();
        drop(sessions);
        if is_empty {
            self.close(subscription_id);
        }
        Ok(Some(reply_hex))
    }

    /// Close a session explicitly (`NEG-CLOSE`).
    pub fn close(&self, subscription_id: &str) {
        self.sessions.lock().unwrap().remove(subscription_id);
    }

    /// Drop every session idle for longer than [`AUTO_CLOSE_DEBOUNCE`].
    pub fn sweep_idle(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|_, session| session.last_active.elapsed() < AUTO_CLOSE_DEBOUNCE);
    }

    /// Number of open sessions (for diagnostics/tests).
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Whether no sessions are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
