// Distributed under the MIT software license

use std::time::Duration;

use nostr_relay_core::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Swap in a custom `EventStoreBackend` with `.store(...)` for anything
    // durable; the default is an in-memory store.
    let builder = RelayBuilder::default().port(7777);

    let relay = LocalRelay::run(builder).await?;

    println!("Url: {}", relay.url());

    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
