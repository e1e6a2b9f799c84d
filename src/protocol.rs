// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! The Nostr wire protocol: client→relay and relay→client envelopes.
//!
//! JSON arrays tagged by their first element, per NIP-01/09/40/42/45/77
//! (spec §4.3). Implemented directly against `serde_json::Value` rather
//! than the `nostr` crate's own message types, since those drift across
//! crate versions far more than the plain data types (`Event`, `Filter`) do
//! — see `DESIGN.md` for the reasoning.

use nostr::{Event, Filter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A subscription identifier, scoped to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The well-known reason prefixes every OK/CLOSED/NOTICE message uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonPrefix {
    Invalid,
    Blocked,
    RateLimited,
    AuthRequired,
    Restricted,
    Duplicate,
    Error,
    Unsupported,
}

impl ReasonPrefix {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Blocked => "blocked",
            Self::RateLimited => "rate-limited",
            Self::AuthRequired => "auth-required",
            Self::Restricted => "restricted",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
            Self::Unsupported => "unsupported",
        }
    }

    /// Format `"<prefix>: <msg>"`.
    pub fn message(self, msg: impl AsRef<str>) -> String {
        format!("{}: {}", self.as_str(), msg.as_ref())
    }
}

/// A message received from a client.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Box<Event>),
    Req {
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    },
    Count {
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    },
    Close(SubscriptionId),
    Auth(Box<Event>),
    NegOpen {
        subscription_id: SubscriptionId,
        filter: Box<Filter>,
        initial_message: String,
    },
    NegMsg {
        subscription_id: SubscriptionId,
        message: String,
    },
    NegClose {
        subscription_id: SubscriptionId,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed frame")]
    Malformed,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClientMessage {
    /// Parse one inbound JSON array frame. Unknown envelope names return
    /// [`ParseError::Malformed`] so the caller can drop the frame silently
    /// (§4.3: "preserving client/server liveness under version drift").
    pub fn from_json(raw: &str) -> Result<Self, ParseError> {
        let v: Vec<Value> = serde_json::from_str(raw)?;
        let tag = v.first().and_then(Value::as_str).ok_or(ParseError::Malformed)?;
        match tag {
            "EVENT" => {
                let event: Event = serde_json::from_value(v.get(1).cloned().ok_or(ParseError::Malformed)?)?;
                Ok(Self::Event(Box::new(event)))
            }
            "REQ" => {
                let subscription_id = parse_sub_id(&v)?;
                let filters = parse_filters(&v, 2)?;
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "COUNT" => {
                let subscription_id = parse_sub_id(&v)?;
                let filters = parse_filters(&v, 2)?;
                Ok(Self::Count {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(Self::Close(parse_sub_id(&v)?)),
            "AUTH" => {
                let event: Event = serde_json::from_value(v.get(1).cloned().ok_or(ParseError::Malformed)?)?;
                Ok(Self::Auth(Box::new(event)))
            }
            "NEG-OPEN" => {
                let subscription_id = parse_sub_id(&v)?;
                let filter: Filter = serde_json::from_value(v.get(2).cloned().ok_or(ParseError::Malformed)?)?;
                let initial_message = v
                    .get(3)
                    .and_then(Value::as_str)
                    .ok_or(ParseError::Malformed)?
                    .to_string();
                Ok(Self::NegOpen {
                    subscription_id,
                    filter: Box::new(filter),
                    initial_message,
                })
            }
            "NEG-MSG" => {
                let subscription_id = parse_sub_id(&v)?;
                let message = v
                    .get(2)
                    .and_then(Value::as_str)
                    .ok_or(ParseError::Malformed)?
                    .to_string();
                Ok(Self::NegMsg {
                    subscription_id,
                    message,
                })
            }
            "NEG-CLOSE" => Ok(Self::NegClose {
                subscription_id: parse_sub_id(&v)?,
            }),
            _ => Err(ParseError::Malformed),
        }
    }
}

fn parse_sub_id(v: &[Value]) -> Result<SubscriptionId, ParseError> {
    v.get(1)
        .and_then(Value::as_str)
        .map(|s| SubscriptionId(s.to_string()))
        .ok_or(ParseError::Malformed)
}

fn parse_filters(v: &[Value], from: usize) -> Result<Vec<Filter>, ParseError> {
    v.get(from..)
        .unwrap_or_default()
        .iter()
        .map(|f| serde_json::from_value(f.clone()).map_err(ParseError::from))
        .collect()
}

/// A message sent to a client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event {
        subscription_id: SubscriptionId,
        event: Box<Event>,
    },
    Ok {
        event_id: nostr::EventId,
        accepted: bool,
        message: String,
    },
    Eose {
        subscription_id: SubscriptionId,
    },
    Closed {
        subscription_id: SubscriptionId,
        message: String,
    },
    Notice {
        message: String,
    },
    Count {
        subscription_id: SubscriptionId,
        count: u64,
        hll: Option<String>,
    },
    Auth {
        challenge: String,
    },
    NegMsg {
        subscription_id: SubscriptionId,
        message: String,
    },
    NegErr {
        subscription_id: SubscriptionId,
        message: String,
    },
}

impl RelayMessage {
    pub fn event(subscription_id: SubscriptionId, event: Event) -> Self {
        Self::Event {
            subscription_id,
            event: Box::new(event),
        }
    }

    pub fn ok(event_id: nostr::EventId, accepted: bool, message: impl Into<String>) -> Self {
        Self::Ok {
            event_id,
            accepted,
            message: message.into(),
        }
    }

    pub fn eose(subscription_id: SubscriptionId) -> Self {
        Self::Eose { subscription_id }
    }

    pub fn closed(subscription_id: SubscriptionId, message: impl Into<String>) -> Self {
        Self::Closed {
            subscription_id,
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    pub fn as_json(&self) -> String {
        let value = match self {
            Self::Event {
                subscription_id,
                event,
            } => serde_json::json!(["EVENT", subscription_id.0, event]),
            Self::Ok {
                event_id,
                accepted,
                message,
            } => serde_json::json!(["OK", event_id.to_hex(), accepted, message]),
            Self::Eose { subscription_id } => serde_json::json!(["EOSE", subscription_id.0]),
            Self::Closed {
                subscription_id,
                message,
            } => serde_json::json!(["CLOSED", subscription_id.0, message]),
            Self::Notice { message } => serde_json::json!(["NOTICE", message]),
            Self::Count {
                subscription_id,
                count,
                hll,
            } => match hll {
                Some(hll) => serde_json::json!(["COUNT", subscription_id.0, {"count": count, "hll": hll}]),
                None => serde_json::json!(["COUNT", subscription_id.0, {"count": count}]),
            },
            Self::Auth { challenge } => serde_json::json!(["AUTH", challenge]),
            Self::NegMsg {
                subscription_id,
                message,
            } => serde_json::json!(["NEG-MSG", subscription_id.0, message]),
            Self::NegErr {
                subscription_id,
                message,
            } => serde_json::json!(["NEG-ERR", subscription_id.0, message]),
        };
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_close_and_req() {
        let close = ClientMessage::from_json(r#"["CLOSE","sub1"]"#).unwrap();
        assert!(matches!(close, ClientMessage::Close(id) if id.0 == "sub1"));

        let req = ClientMessage::from_json(r#"["REQ","sub2",{"kinds":[1]}]"#).unwrap();
        match req {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                assert_eq!(subscription_id.0, "sub2");
                assert_eq!(filters.len(), 1);
            }
            _ => panic!("expected Req"),
        }
    }

    #[test]
    fn unknown_envelope_is_malformed_not_panic() {
        assert!(ClientMessage::from_json(r#"["SOMETHING-NEW", 1, 2]"#).is_err());
    }

    #[test]
    fn reason_prefix_formats_with_colon_space() {
        assert_eq!(
            ReasonPrefix::Blocked.message("no reason"),
            "blocked: no reason"
        );
    }
}
