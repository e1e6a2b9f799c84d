// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The subscription engine (§4.5): opening a `REQ`, stored-event fan-in,
//! live listener registration, and `CLOSE`/teardown bookkeeping.

use std::sync::Arc;

use nostr::Filter;
use tokio::sync::mpsc;

use crate::context::RequestContext;
use crate::hooks::PolicyResult;
use crate::listener::{ConnectionId, Listener};
use crate::protocol::{ReasonPrefix, RelayMessage, SubscriptionId};
use crate::relay::Relay;

/// Open a `REQ`: per filter, run `OverwriteFilter` then `QueryPolicy`; fan in
/// every matching stored event (one task per filter×hook pair, so a slow
/// backend on one filter can't stall the others); send `EOSE`; finally
/// register a live listener per filter so future events are delivered
/// (§4.5.1–4.5.3).
pub async fn open_req(
    relay: &Arc<Relay>,
    ctx: &RequestContext,
    connection_id: ConnectionId,
    subscription_id: SubscriptionId,
    mut filters: Vec<Filter>,
    sender: mpsc::UnboundedSender<RelayMessage>,
) {
    for filter in filters.iter_mut() {
        let sub_relay = relay.router().sub_relay_for_filter(relay, filter);

        for hook in &sub_relay.hooks.overwrite_filter {
            hook.overwrite(ctx, filter).await;
        }

        for hook in &sub_relay.hooks.query_policy {
            if let PolicyResult::Reject(msg) = hook.admit_query(ctx, filter).await {
                let msg = if msg.is_empty() { "no reason".to_string() } else { msg };
                let _ = sender.send(RelayMessage::closed(subscription_id.clone(), ReasonPrefix::Blocked.message(msg)));
                ctx.cancel();
                return;
            }
        }

        if filter.limit != Some(0) {
            let target_relay = Arc::clone(sub_relay);
            let mut handles = Vec::new();
            for hook_index in 0..target_relay.hooks.query_events.len() {
                let target_relay = Arc::clone(&target_relay);
                let ctx = ctx.clone();
                let filter = filter.clone();
                let sender = sender.clone();
                let subscription_id = subscription_id.clone();
                handles.push(tokio::spawn(async move {
                    let Ok(mut stream) = target_relay.hooks.query_events[hook_index].query(&ctx, &filter).await else {
                        return;
                    };
                    use async_utility::futures_util::StreamExt;
                    while let Some(mut event) = stream.next().await {
                        for hook in &target_relay.hooks.overwrite_response_event {
                            hook.overwrite(&ctx, &mut event).await;
                        }
                        let _ = sender.send(RelayMessage::event(subscription_id.clone(), event));
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        sub_relay.listeners.add(Listener {
            connection_id,
            subscription_id: Arc::from(subscription_id.0.as_str()),
            filter: filter.clone(),
            sender: sender.clone(),
        });
    }

    let _ = sender.send(RelayMessage::eose(subscription_id));
}

/// `CLOSE`: drop every listener this connection registered under `subscription_id`.
///
/// Sweeps every relay reachable through the router, since the router isn't
/// consulted again on close — a given subscription may have landed listeners
/// on more than one sub-relay depending on its filters. Returns whether any
/// listener actually existed, so a stray or duplicate `CLOSE` for an id that
/// was never opened (or already closed) can be told apart from a real one.
pub fn close_subscription(relay: &Arc<Relay>, connection_id: ConnectionId, subscription_id: &str) -> bool {
    let mut removed = 0;
    for r in relay.router().all_relays(relay) {
        removed += r.listeners.remove_subscription(connection_id, subscription_id);
    }
    removed > 0
}

/// Connection teardown: drop every listener this connection ever registered,
/// anywhere in the router.
pub fn teardown_connection(relay: &Arc<Relay>, connection_id: ConnectionId) {
    for r in relay.router().all_relays(relay) {
        r.listeners.remove_connection(connection_id);
    }
}
