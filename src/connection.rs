// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The per-connection message dispatcher (§4.2–§4.3).
//!
//! Grounded on the teacher's `local/internal.rs::handle_connection`, split
//! into a reader loop that spawns one task per inbound frame (so a slow REQ
//! can't stall a concurrent EVENT) and a single writer task that owns the
//! WebSocket sink exclusively — the write-mutex of §4.2.3 realized as "only
//! one task ever touches the sink", fed by an `mpsc` channel rather than a
//! `Mutex<SplitSink<..>>`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_utility::futures_util::stream::SplitSink;
use async_utility::futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::builder::Nip42Mode;
use crate::context::{ConnectionInfo, RequestContext};
use crate::listener::ConnectionId;
use crate::negentropy::NegentropySessions;
use crate::pipeline;
use crate::protocol::{ClientMessage, ReasonPrefix, RelayMessage};
use crate::relay::Relay;
use crate::subscription;

type WsTx<S> = SplitSink<WebSocketStream<S>, Message>;

/// Token-bucket rate limiter for inbound `EVENT` frames, refilled
/// proportionally to elapsed wall time. Grounded on the teacher's
/// `local/internal.rs::Tokens`/`check_rate_limit`.
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(notes_per_minute: u32) -> Self {
        Self {
            tokens: notes_per_minute.max(1) as f64,
            capacity: notes_per_minute.max(1) as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * (self.capacity / 60.0)).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

static CHALLENGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A 16-hex-char per-connection nonce, bound to a single AUTH attempt (§4.2.1).
fn generate_challenge() -> String {
    let counter = CHALLENGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    hex::encode((nanos ^ counter.rotate_left(17)).to_be_bytes())
}

/// Run one accepted WebSocket connection to completion: handshake bookkeeping,
/// reader/writer tasks, and teardown. Generic over the underlying transport
/// so the same dispatcher serves raw TCP sockets ([`crate::local::LocalRelay`])
/// and HTTP-upgraded connections ([`crate::http::RelayHttpService`]) alike.
pub async fn handle<S>(relay: Arc<Relay>, stream: WebSocketStream<S>, addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id: ConnectionId = relay.next_connection_id();
    let challenge: Arc<str> = Arc::from(generate_challenge());
    let connection = ConnectionInfo::new(addr);
    let ctx = RequestContext::for_connection(connection.clone());

    for hook in &relay.hooks.on_connect {
        hook.on_connect(&ctx).await;
    }

    let (ws_tx, mut ws_rx) = stream.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<RelayMessage>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    if relay.nip42 != Nip42Mode::Disabled {
        let _ = out_tx.send(RelayMessage::Auth {
            challenge: challenge.to_string(),
        });
    }

    let writer = tokio::spawn(write_loop(Arc::clone(&relay), ws_tx, out_rx, ctrl_rx));

    let sessions = Arc::new(NegentropySessions::new());
    let bucket = Arc::new(Mutex::new(TokenBucket::new(relay.rate_limit.notes_per_minute)));
    let open_subscriptions = Arc::new(AtomicU32::new(0));

    let idle_sweep_sessions = Arc::clone(&sessions);
    let idle_sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(crate::negentropy::AUTO_CLOSE_DEBOUNCE);
        loop {
            ticker.tick().await;
            idle_sweep_sessions.sweep_idle();
        }
    });

    let pong_wait = relay.connection_options.pong_wait;
    let mut deadline = tokio::time::Instant::now() + pong_wait;
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = tokio::time::sleep_until(deadline) => break,
        };
        let Some(frame) = frame else { break };
        let Ok(frame) = frame else { break };
        match frame {
            Message::Text(text) => {
                let relay = Arc::clone(&relay);
                let ctx = ctx.clone();
                let out_tx = out_tx.clone();
                let challenge = Arc::clone(&challenge);
                let sessions = Arc::clone(&sessions);
                let bucket = Arc::clone(&bucket);
                let open_subscriptions = Arc::clone(&open_subscriptions);
                tokio::spawn(async move {
                    handle_frame(
                        relay,
                        ctx,
                        connection_id,
                        text,
                        out_tx,
                        sessions,
                        bucket,
                        open_subscriptions,
                        challenge,
                    )
                    .await;
                });
            }
            Message::Binary(_) => {
                let _ = out_tx.send(RelayMessage::notice("binary frames are not accepted by this relay"));
            }
            Message::Ping(payload) => {
                let _ = ctrl_tx.send(payload);
            }
            Message::Pong(_) => {
                deadline = tokio::time::Instant::now() + pong_wait;
            }
            Message::Frame(_) => {}
            Message::Close(_) => break,
        }
    }

    idle_sweeper.abort();

    for hook in &relay.hooks.on_disconnect {
        hook.on_disconnect(&ctx).await;
    }
    subscription::teardown_connection(&relay, connection_id);
    drop(out_tx);
    let _ = writer.await;
}

async fn write_loop<S>(
    relay: Arc<Relay>,
    mut ws_tx: WsTx<S>,
    mut out_rx: mpsc::UnboundedReceiver<RelayMessage>,
    mut ctrl_rx: mpsc::UnboundedReceiver<Vec<u8>>,
)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let write_wait = relay.connection_options.write_wait;
    let mut ticker = tokio::time::interval(relay.connection_options.ping_period);
    loop {
        tokio::select! {
            msg = out_rx.recv() => {
                match msg {
                    Some(msg) => {
                        if send_deadlined(&mut ws_tx, Message::Text(msg.as_json()), write_wait).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            payload = ctrl_rx.recv() => {
                match payload {
                    Some(payload) => {
                        if send_deadlined(&mut ws_tx, Message::Pong(payload), write_wait).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if send_deadlined(&mut ws_tx, Message::Ping(Vec::new()), write_wait).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Write one frame, dropping the connection if it doesn't complete within
/// `write_wait` (§6's "write deadline 10 s") as well as on a hard send error.
async fn send_deadlined<S>(ws_tx: &mut WsTx<S>, msg: Message, write_wait: std::time::Duration) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match tokio::time::timeout(write_wait, ws_tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_frame(
    relay: Arc<Relay>,
    ctx: RequestContext,
    connection_id: ConnectionId,
    text: String,
    out_tx: mpsc::UnboundedSender<RelayMessage>,
    sessions: Arc<NegentropySessions>,
    bucket: Arc<Mutex<TokenBucket>>,
    open_subscriptions: Arc<AtomicU32>,
    challenge: Arc<str>,
) {
    let Ok(client_msg) = ClientMessage::from_json(&text) else {
        return;
    };

    match client_msg {
        ClientMessage::Event(event) => {
            if !bucket.lock().await.try_take() {
                let _ = out_tx.send(RelayMessage::ok(event.id, false, ReasonPrefix::RateLimited.message("slow down")));
                return;
            }
            let reply = pipeline::ingest_event(&relay, &ctx, *event).await;
            let _ = out_tx.send(reply);
        }
        ClientMessage::Req { subscription_id, filters } => {
            let max = relay.rate_limit.max_reqs as u32;
            if open_subscriptions.fetch_add(1, Ordering::SeqCst) >= max {
                open_subscriptions.fetch_sub(1, Ordering::SeqCst);
                let _ = out_tx.send(RelayMessage::closed(subscription_id, ReasonPrefix::RateLimited.message("too many concurrent REQs")));
                return;
            }
            subscription::open_req(&relay, &ctx, connection_id, subscription_id, filters, out_tx).await;
        }
        ClientMessage::Count { subscription_id, filters } => {
            let reply = pipeline::handle_count(&relay, &ctx, subscription_id, filters).await;
            let _ = out_tx.send(reply);
        }
        ClientMessage::Close(subscription_id) => {
            if subscription::close_subscription(&relay, connection_id, subscription_id.as_ref()) {
                open_subscriptions.fetch_sub(1, Ordering::SeqCst);
            }
        }
        ClientMessage::Auth(event) => {
            let base_url = relay
                .service_url()
                .map(str::to_string)
                .unwrap_or_else(|| crate::urlutil::derive_base_url(None, None, &ctx.get_ip()));
            let reply = pipeline::handle_auth(&relay, &ctx, *event, &base_url, &challenge).await;
            let _ = out_tx.send(reply);
        }
        ClientMessage::NegOpen {
            subscription_id,
            filter,
            initial_message,
        } => {
            let reply = pipeline::handle_neg_open(&relay, &ctx, &sessions, subscription_id, *filter, initial_message).await;
            let _ = out_tx.send(reply);
        }
        ClientMessage::NegMsg { subscription_id, message } => {
            let reply = pipeline::handle_neg_msg(&sessions, subscription_id, message);
            let _ = out_tx.send(reply);
        }
        ClientMessage::NegClose { subscription_id } => {
            pipeline::handle_neg_close(&sessions, subscription_id);
        }
    }
}
