// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! A directly-bound, websocket-only relay, for tests and simple deployments.
//!
//! Grounded on the teacher's `local/internal.rs`: bind a `TcpListener`,
//! accept in a loop, hand each socket to [`crate::connection::handle`].
//! Also exposes [`LocalRelay::new`]/[`LocalRelay::take_connection`] for
//! callers (e.g. `demos/hyper.rs`) that want to multiplex their own HTTP
//! listener instead of letting this type own one.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use atomic_destructor::{AtomicDestroyer, AtomicDestructor};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::builder::RelayBuilder;
use crate::error::Error;
use crate::pipeline;
use crate::relay::Relay;

/// A runnable, websocket-only nostr relay.
#[derive(Debug, Clone)]
pub struct LocalRelay {
    inner: AtomicDestructor<InternalLocalRelay>,
}

impl LocalRelay {
    /// Build the relay without binding any socket. Useful when an outer HTTP
    /// server (see `demos/hyper.rs`) will hand connections in via
    /// [`LocalRelay::take_connection`] instead.
    pub async fn new(builder: RelayBuilder) -> Result<Self, Error> {
        Ok(Self {
            inner: AtomicDestructor::new(InternalLocalRelay::new(builder)),
        })
    }

    /// Build the relay and start serving it on its own bound `TcpListener`.
    pub async fn run(builder: RelayBuilder) -> Result<Self, Error> {
        Ok(Self {
            inner: AtomicDestructor::new(InternalLocalRelay::run(builder).await?),
        })
    }

    /// The `ws://` URL this relay is listening on, if it bound its own socket.
    pub fn url(&self) -> String {
        self.inner.url()
    }

    /// Access the underlying [`Relay`] (hook chains, storage, listeners, ...).
    pub fn relay(&self) -> &Arc<Relay> {
        self.inner.relay()
    }

    /// Hand an already-accepted transport to this relay as a new connection.
    pub async fn take_connection<S>(&self, io: S, addr: SocketAddr) -> Result<(), Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        self.inner.relay().take_connection(io, addr).await
    }

    /// Stop accepting connections and tear down every open connection.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

#[derive(Debug, Clone)]
struct InternalLocalRelay {
    addr: Option<SocketAddr>,
    relay: Arc<Relay>,
    shutdown: broadcast::Sender<()>,
}

impl AtomicDestroyer for InternalLocalRelay {
    fn on_destroy(&self) {
        self.shutdown();
    }
}

impl InternalLocalRelay {
    fn new(builder: RelayBuilder) -> Self {
        let (shutdown, _) = broadcast::channel::<()>(1);
        let relay = Relay::from_builder(builder);
        tokio::spawn(pipeline::run_expiration_sweeper(Arc::clone(&relay), shutdown.subscribe()));
        Self {
            addr: None,
            relay,
            shutdown,
        }
    }

    async fn run(builder: RelayBuilder) -> Result<Self, Error> {
        let ip = builder.addr.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let port = builder.port;
        let relay = Relay::from_builder(builder);

        let bind_addr = SocketAddr::new(ip, port.unwrap_or(0));
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        tokio::spawn(pipeline::run_expiration_sweeper(Arc::clone(&relay), shutdown_tx.subscribe()));

        let accept_relay = Arc::clone(&relay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    output = listener.accept() => {
                        match output {
                            Ok((stream, peer)) => {
                                let relay = Arc::clone(&accept_relay);
                                tokio::spawn(async move {
                                    if let Err(e) = accept_one(relay, stream, peer).await {
                                        tracing::error!(error = %e, "connection ended with an error");
                                    }
                                });
                            }
                            Err(e) => tracing::warn!(error = %e, "can't accept incoming connection"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::debug!("local relay accept loop terminated");
        });

        Ok(Self {
            addr: Some(addr),
            relay,
            shutdown: shutdown_tx,
        })
    }

    fn url(&self) -> String {
        match self.addr {
            Some(addr) => format!("ws://{addr}"),
            None => "ws://unbound".to_string(),
        }
    }

    fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

async fn accept_one(relay: Arc<Relay>, stream: TcpStream, addr: SocketAddr) -> Result<(), Error> {
    if relay.should_reject_connection(&addr).await {
        return Ok(());
    }
    relay.take_connection(stream, addr).await
}
