// Distributed under the MIT software license

//! Route `kind:0`/`kind:3` profile events to a dedicated sub-relay, keeping
//! everything else on the root relay's own storage and listeners.

use std::time::Duration;

use nostr_relay_core::relay::Relay;
use nostr_relay_core::router::Router;
use nostr_relay_core::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let profiles = Relay::from_builder(RelayBuilder::default());

    let route = Router::route()
        .matching_events(|event| matches!(event.kind, Kind::Metadata | Kind::ContactList))
        .matching_filters(|filter| {
            filter
                .kinds
                .as_ref()
                .is_some_and(|kinds| kinds.contains(&Kind::Metadata) || kinds.contains(&Kind::ContactList))
        })
        .to_relay(profiles);

    let builder = RelayBuilder::default().port(7778).route(route);
    let relay = LocalRelay::run(builder).await?;

    println!("Url: {}", relay.url());

    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
