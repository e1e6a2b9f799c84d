// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay core error

use std::io;

use thiserror::Error;

/// Relay core error
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error(transparent)]
    IO(#[from] io::Error),
    /// No port available
    #[error("no port available")]
    NoPortAvailable,
    /// The relay's concurrent-connection limit is already saturated
    #[error("connection limit reached")]
    ConnectionLimitReached,
    /// Negentropy reconciliation error
    #[error(transparent)]
    Negentropy(#[from] negentropy::Error),
    /// WebSocket transport error
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
