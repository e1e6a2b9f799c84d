// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! HTTP surface multiplexing (§4.2, §6): WebSocket upgrade, the NIP-11
//! information document, and the NIP-86 management RPC, all on one port.
//!
//! Grounded on `demos/hyper.rs`'s manual upgrade handshake, generalized into
//! a reusable [`hyper::service::Service`] any binary can drop onto a listener.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use base64::prelude::*;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONNECTION, UPGRADE};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use nostr::hashes::sha1::Hash as Sha1Hash;
use nostr::hashes::{Hash, HashEngine};

use crate::nip86::{authorize_management_request, ManagementResponse};
use crate::relay::Relay;

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`, per RFC 6455.
fn derive_accept_key(request_key: &[u8]) -> String {
    let mut engine = Sha1Hash::engine();
    engine.input(request_key);
    engine.input(WS_GUID);
    let hash = Sha1Hash::from_engine(engine);
    BASE64_STANDARD.encode(hash)
}

fn header_contains(req: &Request<Incoming>, name: hyper::header::HeaderName, needle: &str) -> bool {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains(needle))
        .unwrap_or(false)
}

fn is_upgrade_request(req: &Request<Incoming>) -> bool {
    header_contains(req, CONNECTION, "upgrade") && header_contains(req, UPGRADE, "websocket")
}

fn wants_info_document(req: &Request<Incoming>) -> bool {
    header_contains(req, hyper::header::ACCEPT, "application/nostr+json")
}

fn is_management_rpc(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("application/nostr+json+rpc"))
        .unwrap_or(false)
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(body.into())))
        .unwrap()
}

/// hyper [`Service`] multiplexing websocket upgrades, the NIP-11 document, and
/// the NIP-86 management RPC onto one port.
pub struct RelayHttpService {
    relay: Arc<Relay>,
    remote: SocketAddr,
}

impl RelayHttpService {
    pub fn new(relay: Arc<Relay>, remote: SocketAddr) -> Self {
        Self { relay, remote }
    }
}

impl Service<Request<Incoming>> for RelayHttpService {
    type Response = Response<Full<Bytes>>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let relay = Arc::clone(&self.relay);
        let remote = self.remote;

        if is_upgrade_request(&req) {
            return Box::pin(upgrade(relay, remote, req));
        }
        if wants_info_document(&req) {
            return Box::pin(async move {
                let body = serde_json::to_vec(relay.info()).unwrap_or_default();
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/nostr+json")
                    .header("access-control-allow-origin", "*")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap())
            });
        }
        if is_management_rpc(&req) {
            return Box::pin(management(relay, remote, req));
        }

        Box::pin(async move { Ok(text_response(StatusCode::NOT_FOUND, "this endpoint speaks the nostr relay protocol")) })
    }
}

async fn upgrade(relay: Arc<Relay>, remote: SocketAddr, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    if relay.should_reject_connection(&remote).await {
        return Ok(text_response(StatusCode::TOO_MANY_REQUESTS, "connection rejected"));
    }

    let Some(key) = req.headers().get("sec-websocket-key").cloned() else {
        return Ok(text_response(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key"));
    };
    let accept_key = derive_accept_key(key.as_bytes());

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = relay.take_connection(TokioIo::new(upgraded), remote).await {
                    tracing::error!(error = %e, "upgraded connection ended with an error");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to complete websocket upgrade"),
        }
    });

    Ok(Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header("sec-websocket-accept", accept_key)
        .body(Full::new(Bytes::new()))
        .unwrap())
}

fn header_str<'a>(req: &'a Request<Incoming>, name: hyper::header::HeaderName) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn management(
    relay: Arc<Relay>,
    remote: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let Some(management) = relay.management.as_ref() else {
        return Ok(text_response(StatusCode::NOT_IMPLEMENTED, "this relay has no management API configured"));
    };

    let auth_header = header_str(&req, hyper::header::AUTHORIZATION).map(str::to_string);
    let forwarded_host = header_str(&req, hyper::header::HeaderName::from_static("x-forwarded-host")).map(str::to_string);
    let forwarded_proto = header_str(&req, hyper::header::HeaderName::from_static("x-forwarded-proto")).map(str::to_string);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(text_response(StatusCode::BAD_REQUEST, "failed to read request body")),
    };

    let base_url = relay.service_url().map(str::to_string).unwrap_or_else(|| {
        crate::urlutil::derive_base_url(forwarded_host.as_deref(), forwarded_proto.as_deref(), &remote)
    });

    if let Err(reason) = authorize(auth_header.as_deref(), &body, &base_url) {
        return Ok(text_response(StatusCode::UNAUTHORIZED, format!("unauthorized: {reason}")));
    }

    let response = match serde_json::from_slice(&body) {
        Ok(request) => management.handle(request).await,
        Err(e) => ManagementResponse::err(format!("invalid request body: {e}")),
    };

    let body = serde_json::to_vec(&response).unwrap_or_default();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/nostr+json+rpc")
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}

/// Parse and validate the `Authorization: Nostr <base64 event>` header per NIP-98.
fn authorize(header: Option<&str>, body: &Bytes, base_url: &str) -> Result<(), String> {
    let header = header.ok_or("missing Authorization header")?;
    let encoded = header.strip_prefix("Nostr ").ok_or("Authorization header is not a Nostr scheme")?;
    let decoded = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|_| "invalid base64 in Authorization header".to_string())?;
    let event: nostr::Event =
        serde_json::from_slice(&decoded).map_err(|_| "invalid auth event".to_string())?;
    authorize_management_request(&event, body, base_url)
}
