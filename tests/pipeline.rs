// Distributed under the MIT software license

//! End-to-end scenarios driven over a real WebSocket connection against a
//! [`MockRelay`], per spec §8.

use std::time::Duration;

use async_utility::futures_util::{SinkExt, StreamExt};
use nostr::{EventBuilder, Keys, Kind, Tag, Timestamp};
use nostr_relay_core::prelude::*;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(relay: &MockRelay) -> WsStream {
    let (stream, _) = connect_async(relay.url()).await.expect("connect");
    stream
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.expect("send");
}

async fn recv(ws: &mut WsStream) -> Value {
    loop {
        let msg = ws.next().await.expect("stream open").expect("ws frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("valid json frame");
        }
    }
}

async fn recv_matching(ws: &mut WsStream, tag: &str) -> Vec<Value> {
    loop {
        let frame = recv(ws).await;
        if frame[0].as_str() == Some(tag) {
            return frame.as_array().unwrap().clone();
        }
    }
}

#[tokio::test]
async fn two_connections_publish_and_subscribe() {
    let relay = MockRelay::run().await.unwrap();

    let mut publisher = connect(&relay).await;
    let mut subscriber = connect(&relay).await;

    send(&mut subscriber, serde_json::json!(["REQ", "sub1", {"kinds": [1]}])).await;
    recv_matching(&mut subscriber, "EOSE").await;

    let keys = Keys::generate();
    let event = EventBuilder::text_note("hello", []).to_event(&keys).unwrap();
    send(&mut publisher, serde_json::json!(["EVENT", event])).await;

    let ok = recv_matching(&mut publisher, "OK").await;
    assert_eq!(ok[2], Value::Bool(true));

    let delivered = recv_matching(&mut subscriber, "EVENT").await;
    assert_eq!(delivered[1], Value::String("sub1".to_string()));
    assert_eq!(delivered[2]["content"], Value::String("hello".to_string()));

    relay.shutdown();
}

#[tokio::test]
async fn replaceable_kind_keeps_only_the_latest() {
    let relay = MockRelay::run().await.unwrap();
    let mut ws = connect(&relay).await;
    let keys = Keys::generate();

    let older = EventBuilder::new(Kind::Metadata, "{\"name\":\"old\"}")
        .custom_created_at(Timestamp::from(1_000))
        .to_event(&keys)
        .unwrap();
    send(&mut ws, serde_json::json!(["EVENT", older])).await;
    recv_matching(&mut ws, "OK").await;

    let newer = EventBuilder::new(Kind::Metadata, "{\"name\":\"new\"}")
        .custom_created_at(Timestamp::from(2_000))
        .to_event(&keys)
        .unwrap();
    send(&mut ws, serde_json::json!(["EVENT", newer])).await;
    recv_matching(&mut ws, "OK").await;

    send(&mut ws, serde_json::json!(["REQ", "profiles", {"authors": [keys.public_key()], "kinds": [0]}])).await;
    let stored = recv_matching(&mut ws, "EVENT").await;
    assert_eq!(stored[2]["content"], Value::String("{\"name\":\"new\"}".to_string()));

    // Only one EVENT should arrive before EOSE.
    let next = recv(&mut ws).await;
    assert_eq!(next[0].as_str(), Some("EOSE"));

    relay.shutdown();
}

#[tokio::test]
async fn deletion_removes_the_target_for_its_author() {
    let relay = MockRelay::run().await.unwrap();
    let mut ws = connect(&relay).await;
    let keys = Keys::generate();

    let note = EventBuilder::text_note("to be deleted", []).to_event(&keys).unwrap();
    let note_id = note.id;
    send(&mut ws, serde_json::json!(["EVENT", note])).await;
    recv_matching(&mut ws, "OK").await;

    let deletion = EventBuilder::new(Kind::EventDeletion, "")
        .tag(Tag::event(note_id))
        .to_event(&keys)
        .unwrap();
    send(&mut ws, serde_json::json!(["EVENT", deletion])).await;
    let ok = recv_matching(&mut ws, "OK").await;
    assert_eq!(ok[2], Value::Bool(true));

    send(&mut ws, serde_json::json!(["REQ", "check", {"ids": [note_id]}])).await;
    let frame = recv(&mut ws).await;
    assert_eq!(frame[0].as_str(), Some("EOSE"), "deleted event must not be returned");

    relay.shutdown();
}

#[tokio::test]
async fn unauthorized_deletion_is_blocked() {
    let relay = MockRelay::run().await.unwrap();
    let mut ws = connect(&relay).await;
    let author = Keys::generate();
    let attacker = Keys::generate();

    let note = EventBuilder::text_note("not yours", []).to_event(&author).unwrap();
    let note_id = note.id;
    send(&mut ws, serde_json::json!(["EVENT", note])).await;
    recv_matching(&mut ws, "OK").await;

    let deletion = EventBuilder::new(Kind::EventDeletion, "")
        .tag(Tag::event(note_id))
        .to_event(&attacker)
        .unwrap();
    send(&mut ws, serde_json::json!(["EVENT", deletion])).await;
    let ok = recv_matching(&mut ws, "OK").await;
    assert_eq!(ok[2], Value::Bool(false));

    send(&mut ws, serde_json::json!(["REQ", "check", {"ids": [note_id]}])).await;
    let delivered = recv_matching(&mut ws, "EVENT").await;
    assert_eq!(delivered[2]["id"], Value::String(note_id.to_hex()));

    relay.shutdown();
}

#[tokio::test]
async fn close_stops_further_delivery() {
    let relay = MockRelay::run().await.unwrap();
    let mut publisher = connect(&relay).await;
    let mut subscriber = connect(&relay).await;

    send(&mut subscriber, serde_json::json!(["REQ", "sub1", {"kinds": [1]}])).await;
    recv_matching(&mut subscriber, "EOSE").await;
    send(&mut subscriber, serde_json::json!(["CLOSE", "sub1"])).await;

    let keys = Keys::generate();
    let event = EventBuilder::text_note("after close", []).to_event(&keys).unwrap();
    send(&mut publisher, serde_json::json!(["EVENT", event])).await;
    recv_matching(&mut publisher, "OK").await;

    // The closed subscription must receive nothing further; a fresh ping/pong
    // round trip on a short timeout stands in for "definitely nothing arrived".
    let nothing = tokio::time::timeout(Duration::from_millis(300), subscriber.next()).await;
    assert!(nothing.is_err(), "expected no frames after CLOSE, got one");

    relay.shutdown();
}

#[tokio::test]
async fn count_reports_matching_event_total() {
    let relay = MockRelay::run().await.unwrap();
    let mut ws = connect(&relay).await;
    let keys = Keys::generate();

    for i in 0..3 {
        let event = EventBuilder::text_note(format!("note {i}"), []).to_event(&keys).unwrap();
        send(&mut ws, serde_json::json!(["EVENT", event])).await;
        recv_matching(&mut ws, "OK").await;
    }

    send(&mut ws, serde_json::json!(["COUNT", "c1", {"authors": [keys.public_key()], "kinds": [1]}])).await;
    let count = recv_matching(&mut ws, "COUNT").await;
    assert_eq!(count[2]["count"], Value::from(3));

    relay.shutdown();
}
