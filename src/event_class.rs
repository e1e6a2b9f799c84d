// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Kind-based durability classification.
//!
//! Grounded on `add-event.go`'s kind-range branching (ephemeral / replaceable /
//! parameterized-replaceable / regular).

use nostr::Event;

/// How a [`Kind`](nostr::Kind) determines an event's storage/durability semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// `20000 <= kind < 30000`: broadcast only, never stored.
    Ephemeral,
    /// `kind in {0, 3}` or `10000 <= kind < 20000`: latest wins per `(pubkey, kind)`.
    Replaceable,
    /// `30000 <= kind < 40000`: latest wins per `(pubkey, kind, d-tag)`.
    Addressable,
    /// Everything else: stored as-is, deduplicated by id.
    Regular,
}

impl EventClass {
    /// Classify a kind number.
    pub fn of(kind: u64) -> Self {
        if (20_000..30_000).contains(&kind) {
            Self::Ephemeral
        } else if kind == 0 || kind == 3 || (10_000..20_000).contains(&kind) {
            Self::Replaceable
        } else if (30_000..40_000).contains(&kind) {
            Self::Addressable
        } else {
            Self::Regular
        }
    }

    /// Classify an event by its kind.
    pub fn of_event(event: &Event) -> Self {
        Self::of(event.kind.as_u64())
    }
}

/// A tag reduced to its raw string elements, independent of how the `nostr`
/// crate's richer [`Tag`](nostr::Tag) enum models it.
fn raw_tag(tag: &nostr::Tag) -> &[String] {
    tag.as_vec()
}

/// Extract the first `d` tag value, used as the addressable-event identifier.
///
/// Returns `None` if the event has no `d` tag, which per NIP-33 makes an
/// addressable event invalid.
pub fn identifier_tag(event: &Event) -> Option<String> {
    event.tags.iter().find_map(|tag| {
        let raw = raw_tag(tag);
        if raw.first().map(String::as_str) == Some("d") {
            raw.get(1).cloned()
        } else {
            None
        }
    })
}

/// Does this event carry a NIP-70 `["-"]` protected-event marker?
pub fn is_protected(event: &Event) -> bool {
    event.tags.iter().any(|tag| {
        let raw = raw_tag(tag);
        raw.len() == 1 && raw[0] == "-"
    })
}

/// The `expiration` tag value (unix timestamp), if present, per NIP-40.
pub fn expiration_tag(event: &Event) -> Option<u64> {
    event.tags.iter().find_map(|tag| {
        let raw = raw_tag(tag);
        if raw.first().map(String::as_str) == Some("expiration") {
            raw.get(1)?.parse::<u64>().ok()
        } else {
            None
        }
    })
}

/// Values of every tag named `name` (e.g. `"e"` or `"a"`), in order.
pub fn tag_values<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = String> + 'a {
    event.tags.iter().filter_map(move |tag| {
        let raw = raw_tag(tag);
        if raw.first().map(String::as_str) == Some(name) {
            raw.get(1).cloned()
        } else {
            None
        }
    })
}

/// Total order used to decide which of two same-key replaceable/addressable
/// events survives.
///
/// `previous` is considered older than `next` iff its timestamp is strictly
/// smaller, or on a tie its id is lexicographically greater (favouring the
/// smaller id) — matching `helpers.go`'s `isOlder`.
pub fn is_older(previous: &Event, next: &Event) -> bool {
    previous.created_at < next.created_at
        || (previous.created_at == next.created_at && previous.id > next.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ephemeral_replaceable_addressable_regular() {
        assert_eq!(EventClass::of(20_500), EventClass::Ephemeral);
        assert_eq!(EventClass::of(0), EventClass::Replaceable);
        assert_eq!(EventClass::of(3), EventClass::Replaceable);
        assert_eq!(EventClass::of(10_002), EventClass::Replaceable);
        assert_eq!(EventClass::of(30_023), EventClass::Addressable);
        assert_eq!(EventClass::of(1), EventClass::Regular);
        assert_eq!(EventClass::of(9999), EventClass::Regular);
    }
}
