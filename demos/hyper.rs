// Distributed under the MIT software license

use std::net::SocketAddr;

use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use nostr_relay_core::http::RelayHttpService;
use nostr_relay_core::prelude::*;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let builder = RelayBuilder::default();
    let relay = LocalRelay::new(builder).await?;

    let http_addr: SocketAddr = "127.0.0.1:8000".parse().expect("valid socket address");
    let listener = TcpListener::bind(&http_addr).await?;
    loop {
        let (socket, addr) = listener.accept().await?;

        let io = TokioIo::new(socket);
        let service = RelayHttpService::new(relay.relay().clone(), addr);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                tracing::error!("failed to handle request: {e}");
            }
        });
    }
}
