// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Base-URL derivation and NIP-42 URL matching (§6).

use std::net::SocketAddr;

/// Normalize a relay/auth URL for comparison: `ws`/`wss` folded onto
/// `http`/`https`, lowercased, trailing slash stripped.
pub fn normalize_url(url: &str) -> String {
    let mut url = url.trim().to_lowercase();
    if let Some(rest) = url.strip_prefix("ws://") {
        url = format!("http://{rest}");
    } else if let Some(rest) = url.strip_prefix("wss://") {
        url = format!("https://{rest}");
    }
    while url.len() > "http://".len() && url.ends_with('/') {
        url.pop();
    }
    url
}

/// Two URLs match for NIP-42 purposes iff their normalized forms are equal.
pub fn urls_match(a: &str, b: &str) -> bool {
    normalize_url(a) == normalize_url(b)
}

/// Derive the relay's externally-visible base URL, honouring forwarding
/// headers before falling back to the local socket address.
pub fn derive_base_url(
    forwarded_host: Option<&str>,
    forwarded_proto: Option<&str>,
    local_addr: &SocketAddr,
) -> String {
    if let Some(host) = forwarded_host {
        let scheme = forwarded_proto.unwrap_or("https");
        return format!("{scheme}://{host}");
    }
    let scheme = if local_addr.ip().is_loopback() { "http" } else { "https" };
    format!("{scheme}://{local_addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_and_http_urls_match() {
        assert!(urls_match("wss://relay.example/", "https://relay.example"));
        assert!(!urls_match("wss://relay.example", "https://other.example"));
    }

    #[test]
    fn loopback_defaults_to_http() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(derive_base_url(None, None, &addr), "http://127.0.0.1:8080");
    }
}
