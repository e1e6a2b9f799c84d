// Distributed under the MIT software license

use std::collections::HashSet;
use std::time::Duration;

use nostr_relay_core::prelude::*;

/// Accept only certain event kinds.
#[derive(Debug)]
struct AcceptKinds {
    pub kinds: HashSet<Kind>,
}

impl WritePolicy for AcceptKinds {
    fn admit_event<'a>(&'a self, _ctx: &'a RequestContext, event: &'a Event) -> BoxedFuture<'a, PolicyResult> {
        Box::pin(async move {
            if self.kinds.contains(&event.kind) {
                PolicyResult::Accept
            } else {
                PolicyResult::Reject("kind not accepted".to_string())
            }
        })
    }
}

/// Reject requests with more than `limit` authors in the filter.
#[derive(Debug)]
struct RejectAuthorLimit {
    pub limit: usize,
}

impl QueryPolicy for RejectAuthorLimit {
    fn admit_query<'a>(&'a self, _ctx: &'a RequestContext, filter: &'a Filter) -> BoxedFuture<'a, PolicyResult> {
        Box::pin(async move {
            if filter.authors.as_ref().map(|a| a.len()).unwrap_or(0) > self.limit {
                PolicyResult::Reject("query too expensive".to_string())
            } else {
                PolicyResult::Accept
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let accept_profile_data = AcceptKinds {
        kinds: HashSet::from([Kind::Metadata, Kind::RelayList, Kind::ContactList]),
    };

    let low_author_limit = RejectAuthorLimit { limit: 2 };

    let builder = RelayBuilder::default()
        .write_policy(accept_profile_data)
        .query_policy(low_author_limit);

    let relay = LocalRelay::run(builder).await?;

    println!("Url: {}", relay.url());

    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
