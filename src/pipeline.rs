// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The event ingestion pipeline (§4.4): validation, protected/pow checks,
//! write policy, kind-class dispatch (ephemeral/regular/replaceable/
//! addressable), NIP-09 deletion, NIP-45 counting, NIP-42 auth, and NIP-77
//! negentropy — everything that turns a parsed [`ClientMessage`] into a
//! [`RelayMessage`] reply plus (for EVENT) live fan-out.

use std::sync::Arc;

use nostr::{Alphabet, Event, EventId, Filter, GenericTagValue, Kind, SingleLetterTag};

use crate::context::RequestContext;
use crate::event_class::{self, EventClass};
use crate::hooks::PolicyResult;
use crate::negentropy::NegentropySessions;
use crate::protocol::{ReasonPrefix, RelayMessage, SubscriptionId};
use crate::relay::{query_all, Relay};
use crate::store::StoreError;
use crate::urlutil;

fn reason(msg: String) -> String {
    if msg.is_empty() {
        "no reason".to_string()
    } else {
        msg
    }
}

/// Ingest one `EVENT` frame end to end (§4.4.1–4.4.9).
pub async fn ingest_event(relay: &Arc<Relay>, ctx: &RequestContext, event: Event) -> RelayMessage {
    let id = event.id;

    if !event.verify_id() {
        return RelayMessage::ok(id, false, ReasonPrefix::Invalid.message("id does not match the hash of the event data"));
    }
    if !event.verify_signature() {
        return RelayMessage::ok(id, false, ReasonPrefix::Invalid.message("signature is invalid"));
    }

    if event_class::is_protected(&event) {
        match ctx.get_authed() {
            None => {
                return RelayMessage::ok(id, false, ReasonPrefix::AuthRequired.message("must be published by the event's author"));
            }
            Some(pubkey) if pubkey != event.pubkey => {
                return RelayMessage::ok(id, false, ReasonPrefix::Blocked.message("must be published by the event's author"));
            }
            _ => {}
        }
    }

    if let Some(difficulty) = relay.min_pow {
        if !event.id.check_pow(difficulty) {
            return RelayMessage::ok(
                id,
                false,
                ReasonPrefix::Blocked.message(format!("difficulty {difficulty} is required")),
            );
        }
    }

    let sub_relay = relay.router().sub_relay_for_event(relay, &event);

    for hook in &sub_relay.hooks.write_policy {
        if let PolicyResult::Reject(msg) = hook.admit_event(ctx, &event).await {
            return RelayMessage::ok(id, false, ReasonPrefix::Blocked.message(reason(msg)));
        }
    }

    if event.kind.as_u64() == 5 {
        return handle_deletion(sub_relay, ctx, event).await;
    }

    match EventClass::of_event(&event) {
        EventClass::Ephemeral => {
            for hook in &sub_relay.hooks.on_ephemeral_event {
                hook.on_ephemeral(ctx, &event).await;
            }
            broadcast(sub_relay, ctx, &event).await;
            RelayMessage::ok(id, true, String::new())
        }
        EventClass::Regular => store_regular(sub_relay, ctx, event).await,
        EventClass::Replaceable | EventClass::Addressable => store_replaceable(sub_relay, ctx, event).await,
    }
}

async fn store_regular(relay: &Arc<Relay>, ctx: &RequestContext, event: Event) -> RelayMessage {
    let id = event.id;
    for hook in &relay.hooks.store_event {
        match hook.store(ctx, &event).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                return RelayMessage::ok(id, true, ReasonPrefix::Duplicate.message("already have this event"));
            }
            Err(StoreError::Backend(msg)) => {
                return RelayMessage::ok(id, false, ReasonPrefix::Error.message(msg));
            }
        }
    }
    after_store(relay, ctx, &event).await;
    RelayMessage::ok(id, true, String::new())
}

async fn after_store(relay: &Arc<Relay>, ctx: &RequestContext, event: &Event) {
    for hook in &relay.hooks.on_event_saved {
        hook.on_saved(ctx, event).await;
    }
    if let Some(expires_at) = event_class::expiration_tag(event) {
        relay.expiration.track(event.id, nostr::Timestamp::from(expires_at));
    }
    broadcast(relay, ctx, event).await;
}

/// Replace-on-write for replaceable/addressable kinds (§4.4.5): either a
/// dedicated `ReplaceEvent` hook owns the swap atomically, or the default
/// path queries the prior event(s), deletes the superseded ones, and stores.
async fn store_replaceable(relay: &Arc<Relay>, ctx: &RequestContext, event: Event) -> RelayMessage {
    let id = event.id;

    if !relay.hooks.replace_event.is_empty() {
        for hook in &relay.hooks.replace_event {
            if let Err(e) = hook.replace(ctx, &event).await {
                return match e {
                    StoreError::Duplicate => RelayMessage::ok(id, true, ReasonPrefix::Duplicate.message("already have this event")),
                    StoreError::Backend(msg) => RelayMessage::ok(id, false, ReasonPrefix::Error.message(msg)),
                };
            }
        }
        after_store(relay, ctx, &event).await;
        return RelayMessage::ok(id, true, String::new());
    }

    let class = EventClass::of_event(&event);
    let mut filter = Filter::new().author(event.pubkey).kind(event.kind).limit(1);
    if class == EventClass::Addressable {
        let Some(d) = event_class::identifier_tag(&event) else {
            return RelayMessage::ok(id, false, ReasonPrefix::Invalid.message("missing 'd' tag on parameterized replaceable event"));
        };
        filter = filter.identifier(d);
    }

    let prior = query_all(relay, ctx, &filter).await;

    for prev in &prior {
        if prev.id != event.id && !event_class::is_older(prev, &event) {
            // An existing event is newer or ties and wins: accept, keep
            // current state, don't broadcast.
            return RelayMessage::ok(id, true, String::new());
        }
    }

    for prev in &prior {
        if prev.id != event.id && event_class::is_older(prev, &event) {
            for hook in &relay.hooks.delete_event {
                let _ = hook.delete(ctx, prev).await;
            }
            relay.expiration.untrack(&prev.id);
        }
    }

    store_regular(relay, ctx, event).await
}

/// NIP-09: resolve `e`/`a` tags to their targets and delete those the
/// requester is authorized to delete. The deletion event itself is always
/// stored afterward (it does not recurse through this path again).
async fn handle_deletion(relay: &Arc<Relay>, ctx: &RequestContext, event: Event) -> RelayMessage {
    let id = event.id;

    for e_tag in event_class::tag_values(&event, "e") {
        let Ok(target_id) = EventId::from_hex(&e_tag) else { continue };
        let filter = Filter::new().id(target_id).limit(1);
        let targets = query_all(relay, ctx, &filter).await;
        let Some(target) = targets.into_iter().next() else { continue };
        if let Some(msg) = delete_if_authorized(relay, ctx, &target, &event).await {
            return RelayMessage::ok(id, false, msg);
        }
    }

    for a_tag in event_class::tag_values(&event, "a") {
        let mut parts = a_tag.splitn(3, ':');
        let Some(kind_s) = parts.next() else { continue };
        let Some(pubkey_s) = parts.next() else { continue };
        let d = parts.next().unwrap_or("");
        let Ok(kind_num) = kind_s.parse::<u16>() else { continue };
        let Ok(pubkey) = nostr::PublicKey::from_hex(pubkey_s) else { continue };

        let mut filter = Filter::new().author(pubkey).kind(Kind::from(kind_num)).until(event.created_at).limit(1);
        if !d.is_empty() {
            filter = filter.identifier(d);
        }
        let targets = query_all(relay, ctx, &filter).await;
        let Some(target) = targets.into_iter().next() else { continue };
        if let Some(msg) = delete_if_authorized(relay, ctx, &target, &event).await {
            return RelayMessage::ok(id, false, msg);
        }
    }

    store_regular(relay, ctx, event).await
}

async fn delete_if_authorized(relay: &Arc<Relay>, ctx: &RequestContext, target: &Event, deletion: &Event) -> Option<String> {
    let decision = if relay.hooks.overwrite_deletion_outcome.is_empty() {
        if target.pubkey == deletion.pubkey {
            PolicyResult::Accept
        } else {
            PolicyResult::Reject("not the author of the target event".to_string())
        }
    } else {
        let mut decision = PolicyResult::Accept;
        for hook in &relay.hooks.overwrite_deletion_outcome {
            decision = hook.overwrite(ctx, target, deletion).await;
            if decision.is_reject() {
                break;
            }
        }
        decision
    };

    match decision {
        PolicyResult::Accept => {
            for hook in &relay.hooks.delete_event {
                let _ = hook.delete(ctx, target).await;
            }
            relay.expiration.untrack(&target.id);
            None
        }
        PolicyResult::Reject(msg) => Some(ReasonPrefix::Blocked.message(reason(msg))),
    }
}

/// Deliver `event` to every live listener whose filter matches, honoring
/// `PreventBroadcast` and `OverwriteResponseEvent` per-recipient (§4.4.9).
pub(crate) async fn broadcast(relay: &Arc<Relay>, ctx: &RequestContext, event: &Event) {
    for (_connection_id, subscription_id, sender) in relay.listeners.matching(event) {
        let mut delivered = event.clone();

        let mut suppress = false;
        for hook in &relay.hooks.prevent_broadcast {
            if hook.prevent(ctx, &delivered).await {
                suppress = true;
                break;
            }
        }
        if suppress {
            continue;
        }

        for hook in &relay.hooks.overwrite_response_event {
            hook.overwrite(ctx, &mut delivered).await;
        }

        let _ = sender.send(RelayMessage::event(SubscriptionId(subscription_id.to_string()), delivered));
    }
}

/// NIP-45: `COUNT` against every configured `count_events` hook, summed.
pub async fn handle_count(relay: &Arc<Relay>, ctx: &RequestContext, subscription_id: SubscriptionId, mut filters: Vec<Filter>) -> RelayMessage {
    let empty = Filter::new();
    let sub_relay = relay
        .router()
        .sub_relay_for_filter(relay, filters.first().unwrap_or(&empty));

    if sub_relay.hooks.count_events.is_empty() && sub_relay.hooks.count_events_hll.is_empty() {
        return RelayMessage::Closed {
            subscription_id,
            message: ReasonPrefix::Unsupported.message("this relay does not support NIP-45"),
        };
    }

    let mut total: u64 = 0;
    let mut registers: Option<Vec<u8>> = None;
    let mut hll_ineligible = false;

    for filter in filters.iter_mut() {
        for hook in &sub_relay.hooks.overwrite_count_filter {
            hook.overwrite(ctx, filter).await;
        }
        for hook in &sub_relay.hooks.count_policy {
            if let PolicyResult::Reject(msg) = hook.admit_query(ctx, filter).await {
                return RelayMessage::Closed {
                    subscription_id,
                    message: ReasonPrefix::Blocked.message(reason(msg)),
                };
            }
        }

        let offset = hll_pubkey_offset(filter).filter(|_| !sub_relay.hooks.count_events_hll.is_empty());
        match offset {
            Some(offset) if !hll_ineligible => {
                let mut merged: Option<Vec<u8>> = None;
                for hook in &sub_relay.hooks.count_events_hll {
                    if let Ok((n, regs)) = hook.count_hll(ctx, filter, offset).await {
                        total += n;
                        merged = Some(match merged {
                            None => regs,
                            Some(existing) => merge_hll_registers(existing, regs),
                        });
                    }
                }
                registers = match (registers.take(), merged) {
                    (existing, None) => existing,
                    (None, Some(new)) => Some(new),
                    (Some(existing), Some(new)) => Some(merge_hll_registers(existing, new)),
                };
            }
            _ => {
                // Either this filter can't use HLL or an earlier one couldn't;
                // per §4.4.6 one ineligible filter discards the sketch entirely.
                hll_ineligible = true;
                registers = None;
                for hook in &sub_relay.hooks.count_events {
                    if let Ok(n) = hook.count(ctx, filter).await {
                        total += n;
                    }
                }
            }
        }
    }

    RelayMessage::Count {
        subscription_id,
        count: total,
        hll: registers.map(hex::encode),
    }
}

/// NIP-45's mergeable-HLL extension is only defined for filters shaped like a
/// followers-count query: a single `#p` tag naming the pubkey being counted,
/// whose first byte becomes the sketch's offset so sketches computed by
/// different relays for the same pubkey stay mergeable.
fn hll_pubkey_offset(filter: &Filter) -> Option<u8> {
    let pubkeys = filter.generic_tags.get(&SingleLetterTag::lowercase(Alphabet::P))?;
    if pubkeys.len() != 1 {
        return None;
    }
    match pubkeys.iter().next()? {
        GenericTagValue::PublicKey(pk) => pk.to_bytes().first().copied(),
        _ => None,
    }
}

fn merge_hll_registers(a: Vec<u8>, b: Vec<u8>) -> Vec<u8> {
    if a.len() != b.len() {
        return a;
    }
    a.into_iter().zip(b).map(|(x, y)| x.max(y)).collect()
}

/// NIP-42: validate a kind-22242 `AUTH` event against the challenge this
/// connection was issued, marking the connection authenticated on success.
pub async fn handle_auth(relay: &Arc<Relay>, ctx: &RequestContext, event: Event, relay_base_url: &str, challenge: &str) -> RelayMessage {
    let _ = relay;
    let id = event.id;
    let now = nostr::Timestamp::now().as_u64();
    let created_at = event.created_at.as_u64();
    let within_window = created_at.abs_diff(now) <= 600;

    let relay_tag_ok = event_class::tag_values(&event, "relay")
        .next()
        .map(|u| urlutil::urls_match(&u, relay_base_url))
        .unwrap_or(false);
    let challenge_ok = event_class::tag_values(&event, "challenge")
        .next()
        .map(|c| c == challenge)
        .unwrap_or(false);

    let valid = event.kind.as_u64() == 22242
        && within_window
        && relay_tag_ok
        && challenge_ok
        && event.verify_id()
        && event.verify_signature();

    if valid {
        ctx.connection().set_authed(event.pubkey);
        RelayMessage::ok(id, true, String::new())
    } else {
        RelayMessage::ok(id, false, ReasonPrefix::Error.message("failed to authenticate"))
    }
}

/// NIP-77: open a negentropy reconciliation session seeded with this
/// connection's view of `filter`.
pub async fn handle_neg_open(
    relay: &Arc<Relay>,
    ctx: &RequestContext,
    sessions: &NegentropySessions,
    subscription_id: SubscriptionId,
    filter: Filter,
    initial_message: String,
) -> RelayMessage {
    if !relay.negentropy_enabled {
        return RelayMessage::NegErr {
            subscription_id,
            message: ReasonPrefix::Unsupported.message("negentropy is not enabled on this relay"),
        };
    }

    let sub_relay = relay.router().sub_relay_for_filter(relay, &filter);

    for hook in &sub_relay.hooks.query_policy {
        if let PolicyResult::Reject(msg) = hook.admit_query(ctx, &filter).await {
            return RelayMessage::NegErr {
                subscription_id,
                message: ReasonPrefix::Blocked.message(reason(msg)),
            };
        }
    }

    let items = query_all(sub_relay, ctx, &filter)
        .await
        .into_iter()
        .map(|e| (e.id, e.created_at))
        .collect();

    match sessions.open(subscription_id.as_ref(), items, &initial_message) {
        Ok(reply) => RelayMessage::NegMsg { subscription_id, message: reply },
        Err(e) => RelayMessage::NegErr {
            subscription_id,
            message: ReasonPrefix::Error.message(e.to_string()),
        },
    }
}

/// NIP-77: advance an open negentropy session with the client's next message.
pub fn handle_neg_msg(sessions: &NegentropySessions, subscription_id: SubscriptionId, message: String) -> RelayMessage {
    match sessions.reconcile(subscription_id.as_ref(), &message) {
        Ok(Some(reply)) => RelayMessage::NegMsg { subscription_id, message: reply },
        Ok(None) => RelayMessage::NegErr {
            subscription_id,
            message: ReasonPrefix::Error.message("no open negentropy session with that id"),
        },
        Err(e) => RelayMessage::NegErr {
            subscription_id,
            message: ReasonPrefix::Error.message(e.to_string()),
        },
    }
}

/// NIP-77: close a negentropy session early.
pub fn handle_neg_close(sessions: &NegentropySessions, subscription_id: SubscriptionId) {
    sessions.close(subscription_id.as_ref());
}

/// Background loop driving NIP-40 expiration: wakes up every
/// `relay.expiration_interval`, pops everything due, and runs it through the
/// same `delete_event` chain a NIP-09 deletion would. Grounded on
/// `expiration.go`'s ticker loop. Stops as soon as `shutdown` fires, so it
/// doesn't outlive the [`crate::local::LocalRelay`] that owns it.
pub(crate) async fn run_expiration_sweeper(relay: Arc<Relay>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let startup_ctx = RequestContext::internal();
    for event in query_all(&relay, &startup_ctx, &Filter::new()).await {
        if let Some(expires_at) = crate::event_class::expiration_tag(&event) {
            relay.expiration.track(event.id, nostr::Timestamp::from(expires_at));
        }
    }

    let mut ticker = tokio::time::interval(relay.expiration_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => break,
        }
        let due = relay.expiration.due(nostr::Timestamp::now());
        if due.is_empty() {
            continue;
        }
        let ctx = RequestContext::internal();
        for id in due {
            let filter = Filter::new().id(id).limit(1);
            let targets = query_all(&relay, &ctx, &filter).await;
            let Some(target) = targets.into_iter().next() else { continue };
            for hook in &relay.hooks.delete_event {
                let _ = hook.delete(&ctx, &target).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RelayBuilder;
    use crate::context::ConnectionInfo;
    use nostr::{EventBuilder, Keys};

    fn ctx() -> RequestContext {
        RequestContext::for_connection(ConnectionInfo::internal())
    }

    #[tokio::test]
    async fn rejects_tampered_event() {
        let relay = Relay::from_builder(RelayBuilder::default());
        let keys = Keys::generate();
        let mut event = EventBuilder::text_note("hi", []).to_event(&keys).unwrap();
        event.content = "tampered".to_string();
        let reply = ingest_event(&relay, &ctx(), event).await;
        match reply {
            RelayMessage::Ok { accepted, message, .. } => {
                assert!(!accepted);
                assert!(message.starts_with("invalid:"));
            }
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn stores_and_accepts_well_formed_event() {
        let relay = Relay::from_builder(RelayBuilder::default());
        let keys = Keys::generate();
        let event = EventBuilder::text_note("hi", []).to_event(&keys).unwrap();
        let reply = ingest_event(&relay, &ctx(), event).await;
        match reply {
            RelayMessage::Ok { accepted, .. } => assert!(accepted),
            _ => panic!("expected Ok"),
        }
    }
}
