// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! A mock relay for (unit/integration) tests.
//!
//! Generalized from the teacher's self-contained `mock.rs` (bespoke
//! `MemoryDatabase` + session loop) into a thin wrapper over [`LocalRelay`],
//! so tests exercise the exact same pipeline/subscription/router machinery
//! a real deployment does.

use std::sync::Arc;

use crate::builder::RelayBuilder;
use crate::error::Error;
use crate::local::LocalRelay;
use crate::relay::Relay;

/// A relay bound to `127.0.0.1` on an OS-assigned port, for `#[tokio::test]`s.
#[derive(Debug, Clone)]
pub struct MockRelay {
    inner: LocalRelay,
}

impl MockRelay {
    /// Start a mock relay with default configuration (in-memory store, no
    /// policies, no rate limiting beyond the defaults).
    pub async fn run() -> Result<Self, Error> {
        Self::run_with_builder(RelayBuilder::default()).await
    }

    /// Start a mock relay with a caller-supplied builder, e.g. to register
    /// hooks under test.
    pub async fn run_with_builder(builder: RelayBuilder) -> Result<Self, Error> {
        Ok(Self {
            inner: LocalRelay::run(builder).await?,
        })
    }

    /// The `ws://` URL this mock relay is listening on.
    pub fn url(&self) -> String {
        self.inner.url()
    }

    /// Access the underlying [`Relay`] to inspect storage/listeners directly in assertions.
    pub fn relay(&self) -> &Arc<Relay> {
        self.inner.relay()
    }

    /// Stop accepting connections and tear down every open connection.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_and_reports_a_ws_url() {
        let relay = MockRelay::run().await.unwrap();
        assert!(relay.url().starts_with("ws://127.0.0.1:"));
        relay.shutdown();
    }
}
