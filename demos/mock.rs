// Distributed under the MIT software license

use std::time::Duration;

use nostr_relay_core::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let relay = MockRelay::run().await?;

    let url = relay.url();
    println!("Url: {url}");

    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
