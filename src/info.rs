// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! NIP-11 relay information document.
//!
//! Grounded on `nip11.go`: the document's `supported_nips` list is computed
//! dynamically from which hooks are registered, not hardcoded.

use serde::{Deserialize, Serialize};

/// The relay metadata document served for `Accept: application/nostr+json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayInformationDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub supported_nips: Vec<u32>,
    pub software: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl RelayInformationDocument {
    /// A bare document advertising only the base NIPs (1, 11, 70). Every
    /// other NIP, including 40 (expiration), is folded in by
    /// [`RelayInformationDocument::with_dynamic_nips`] once the relay's hook
    /// chains and config are known.
    pub fn new(software: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: None,
            description: None,
            pubkey: None,
            contact: None,
            supported_nips: vec![1, 11, 70],
            software: software.into(),
            version: version.into(),
            icon: None,
        }
    }

    /// Extend `supported_nips` with NIPs whose presence is conditional on
    /// hook registration or config: 9 (deletion) if any `DeleteEvent` hook
    /// exists, 13 (proof of work) if a minimum difficulty is required, 40
    /// (expiration) if the expiration sweeper is running, 45 (counting) if
    /// any `CountEvents` hook exists, 77 (negentropy) if enabled, 42 if auth
    /// is required, 86 if a management API is attached.
    pub fn with_dynamic_nips(mut self, flags: DynamicNipFlags) -> Self {
        if flags.has_delete_event {
            self.supported_nips.push(9);
        }
        if flags.min_pow {
            self.supported_nips.push(13);
        }
        if flags.expiration {
            self.supported_nips.push(40);
        }
        if flags.has_count_events {
            self.supported_nips.push(45);
        }
        if flags.negentropy {
            self.supported_nips.push(77);
        }
        if flags.nip42 {
            self.supported_nips.push(42);
        }
        if flags.nip86 {
            self.supported_nips.push(86);
        }
        self.supported_nips.sort_unstable();
        self.supported_nips.dedup();
        self
    }
}

/// Which optional hook groups or config knobs are present, used to compute
/// `supported_nips`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicNipFlags {
    pub has_delete_event: bool,
    pub has_count_events: bool,
    pub min_pow: bool,
    pub expiration: bool,
    pub negentropy: bool,
    pub nip42: bool,
    pub nip86: bool,
}
