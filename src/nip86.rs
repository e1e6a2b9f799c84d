// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! NIP-86 relay management RPC.
//!
//! Grounded on `nip86.go`'s `RelayManagementAPI`: an optional struct of
//! method callbacks, dispatched from a JSON `{"method", "params"}` body.
//! Supplemented from `original_source/` per SPEC_FULL §10.5 since the
//! distilled spec treats NIP-86 purely as an external collaborator.

use nostr::hashes::sha256::Hash as Sha256Hash;
use nostr::hashes::Hash as _;
use nostr::{Event, PublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks::BoxedFuture;
use crate::urlutil;

/// How far a kind-22242 auth event's `created_at` may drift from now, per NIP-98.
const AUTH_WINDOW_SECS: u64 = 30;

/// NIP-98-style authorization check for the management RPC (§6): the decoded
/// `Authorization: Nostr <base64 event>` event must be a valid, freshly-signed
/// kind-22242 event whose `payload` tag is the sha256 hex digest of the
/// request body and whose `u` tag names this relay.
///
/// Grounded on NIP-98's HTTP Auth event shape; khatru's own `nip86.go` skips
/// this check, but SPEC_FULL.md's External Interfaces section requires it for
/// the management RPC.
pub fn authorize_management_request(event: &Event, body: &[u8], base_url: &str) -> Result<(), String> {
    if event.kind.as_u64() != 22242 {
        return Err("auth event must be kind 22242".to_string());
    }
    if !event.verify_id() {
        return Err("auth event id does not match its content".to_string());
    }
    if !event.verify_signature() {
        return Err("auth event signature is invalid".to_string());
    }

    let now = nostr::Timestamp::now().as_u64();
    let created_at = event.created_at.as_u64();
    if created_at.abs_diff(now) > AUTH_WINDOW_SECS {
        return Err("auth event created_at is outside the allowed window".to_string());
    }

    let expected_payload = Sha256Hash::hash(body).to_string();
    let payload_matches = crate::event_class::tag_values(event, "payload")
        .any(|v| v.eq_ignore_ascii_case(&expected_payload));
    if !payload_matches {
        return Err("auth event payload does not match the request body".to_string());
    }

    let url_matches = crate::event_class::tag_values(event, "u").any(|v| urlutil::urls_match(&v, base_url));
    if !url_matches {
        return Err("auth event url does not match this relay".to_string());
    }

    Ok(())
}

/// One RPC request body: `{"method": "...", "params": [...]}`.
#[derive(Debug, Deserialize)]
pub struct ManagementRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// One RPC response body: either `{"result": ...}` or `{"error": "..."}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ManagementResponse {
    Ok { result: Value },
    Err { error: String },
}

impl ManagementResponse {
    pub fn ok(result: impl Serialize) -> Self {
        Self::Ok {
            result: serde_json::to_value(result).unwrap_or(Value::Null),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self::Err { error: msg.into() }
    }
}

/// Optional management callbacks a relay may register. Any field left
/// unset responds with `"method '<name>' not supported"`, matching
/// khatru's behaviour for methods the embedder never wired up.
#[derive(Default)]
pub struct ManagementApi {
    pub ban_pubkey: Option<Box<dyn Fn(PublicKey, String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
    pub allow_pubkey: Option<Box<dyn Fn(PublicKey, String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
    pub list_banned_pubkeys: Option<Box<dyn Fn() -> BoxedFuture<'static, Vec<PublicKey>> + Send + Sync>>,
    pub ban_event: Option<Box<dyn Fn(nostr::EventId, String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
    pub allow_event: Option<Box<dyn Fn(nostr::EventId, String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
    pub change_relay_name: Option<Box<dyn Fn(String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
    pub change_relay_description: Option<Box<dyn Fn(String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
}

impl std::fmt::Debug for ManagementApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementApi").finish_non_exhaustive()
    }
}

/// Names of every method this API *could* dispatch, regardless of whether a
/// callback is actually registered — used to answer the `"supportedmethods"`
/// meta-query, same as khatru's reflection-based enumeration.
pub const KNOWN_METHODS: &[&str] = &[
    "banpubkey",
    "allowpubkey",
    "listbannedpubkeys",
    "banevent",
    "allowevent",
    "changerelayname",
    "changerelaydescription",
];

impl ManagementApi {
    /// Dispatch one decoded request.
    pub async fn handle(&self, request: ManagementRequest) -> ManagementResponse {
        match request.method.as_str() {
            "supportedmethods" => ManagementResponse::ok(KNOWN_METHODS),
            "banpubkey" => self.dispatch_pubkey_reason(&self.ban_pubkey, request).await,
            "allowpubkey" => self.dispatch_pubkey_reason(&self.allow_pubkey, request).await,
            "listbannedpubkeys" => match &self.list_banned_pubkeys {
                Some(cb) => ManagementResponse::ok(cb().await),
                None => Self::unsupported("listbannedpubkeys"),
            },
            "banevent" => self.dispatch_event_reason(&self.ban_event, request).await,
            "allowevent" => self.dispatch_event_reason(&self.allow_event, request).await,
            "changerelayname" => self.dispatch_string(&self.change_relay_name, request).await,
            "changerelaydescription" => {
                self.dispatch_string(&self.change_relay_description, request).await
            }
            other => Self::unknown(other),
        }
    }

    async fn dispatch_pubkey_reason(
        &self,
        cb: &Option<Box<dyn Fn(PublicKey, String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
        request: ManagementRequest,
    ) -> ManagementResponse {
        let Some(cb) = cb else {
            return Self::unsupported(&request.method);
        };
        let Some(pubkey) = request
            .params
            .first()
            .and_then(Value::as_str)
            .and_then(|s| PublicKey::from_hex(s).ok())
        else {
            return ManagementResponse::err("invalid pubkey parameter");
        };
        let reason = request
            .params
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match cb(pubkey, reason).await {
            Ok(()) => ManagementResponse::ok(true),
            Err(e) => ManagementResponse::err(e),
        }
    }

    async fn dispatch_event_reason(
        &self,
        cb: &Option<Box<dyn Fn(nostr::EventId, String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
        request: ManagementRequest,
    ) -> ManagementResponse {
        let Some(cb) = cb else {
            return Self::unsupported(&request.method);
        };
        let Some(id) = request
            .params
            .first()
            .and_then(Value::as_str)
            .and_then(|s| nostr::EventId::from_hex(s).ok())
        else {
            return ManagementResponse::err("invalid event id parameter");
        };
        let reason = request
            .params
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match cb(id, reason).await {
            Ok(()) => ManagementResponse::ok(true),
            Err(e) => ManagementResponse::err(e),
        }
    }

    async fn dispatch_string(
        &self,
        cb: &Option<Box<dyn Fn(String) -> BoxedFuture<'static, Result<(), String>> + Send + Sync>>,
        request: ManagementRequest,
    ) -> ManagementResponse {
        let Some(cb) = cb else {
            return Self::unsupported(&request.method);
        };
        let Some(value) = request.params.first().and_then(Value::as_str) else {
            return ManagementResponse::err("missing string parameter");
        };
        match cb(value.to_string()).await {
            Ok(()) => ManagementResponse::ok(true),
            Err(e) => ManagementResponse::err(e),
        }
    }

    fn unsupported(method: &str) -> ManagementResponse {
        ManagementResponse::err(format!("method '{method}' not supported"))
    }

    fn unknown(method: &str) -> ManagementResponse {
        ManagementResponse::err(format!("method '{method}' not known"))
    }
}
