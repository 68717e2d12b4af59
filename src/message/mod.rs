//! The NIP-01 line-oriented JSON wire protocol.
//!
//! Client -> relay: `EVENT`, `REQ`, `CLOSE`, `AUTH`, `COUNT`.
//! Relay -> client: `EVENT`, `EOSE`, `OK`, `NOTICE`, `AUTH`, `CLOSED`, `COUNT`.
//! Messages are positional JSON arrays, so the codec goes through
//! `serde_json::Value` rather than derived struct shapes.

use serde_json::{Value, json};
use thiserror::Error;

use crate::event::{Event, EventId};
use crate::filter::Filter;
use crate::types::SubscriptionId;

#[derive(Error, Debug)]
pub enum MessageError {
    /// Malformed JSON. A connection receiving this closes with a
    /// protocol-error reason.
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Structurally valid JSON that is not a valid message (wrong arity,
    /// wrong element types).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A message type this library does not know. Logged and dropped.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// A well-formed `EVENT` frame whose event payload fails validation
    /// (bad hex, wrong JSON shape). The event is dropped, not the
    /// connection.
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

/// Machine-readable prefixes on `OK` and `CLOSED` reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineReadablePrefix {
    Duplicate,
    Pow,
    Blocked,
    RateLimited,
    Invalid,
    Error,
    AuthRequired,
    Restricted,
}

impl MachineReadablePrefix {
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            m if m.starts_with("duplicate:") => Some(Self::Duplicate),
            m if m.starts_with("pow:") => Some(Self::Pow),
            m if m.starts_with("blocked:") => Some(Self::Blocked),
            m if m.starts_with("rate-limited:") => Some(Self::RateLimited),
            m if m.starts_with("invalid:") => Some(Self::Invalid),
            m if m.starts_with("error:") => Some(Self::Error),
            m if m.starts_with("auth-required:") => Some(Self::AuthRequired),
            m if m.starts_with("restricted:") => Some(Self::Restricted),
            _ => None,
        }
    }
}

/// A message sent from this client to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Event(Box<Event>),
    Req {
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    },
    Close(SubscriptionId),
    Auth(Box<Event>),
    Count {
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    },
}

impl ClientMessage {
    pub fn as_json(&self) -> String {
        self.as_value().to_string()
    }

    fn as_value(&self) -> Value {
        match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut items = vec![json!("REQ"), json!(subscription_id)];
                items.extend(filters.iter().map(|f| json!(f)));
                Value::Array(items)
            }
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
            Self::Auth(event) => json!(["AUTH", event]),
            Self::Count {
                subscription_id,
                filters,
            } => {
                let mut items = vec![json!("COUNT"), json!(subscription_id)];
                items.extend(filters.iter().map(|f| json!(f)));
                Value::Array(items)
            }
        }
    }
}

/// A message received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event {
        subscription_id: SubscriptionId,
        event: Box<Event>,
    },
    EndOfStoredEvents(SubscriptionId),
    Ok {
        event_id: EventId,
        accepted: bool,
        message: String,
    },
    Notice(String),
    Auth {
        challenge: String,
    },
    Closed {
        subscription_id: SubscriptionId,
        message: String,
    },
    Count {
        subscription_id: SubscriptionId,
        count: u64,
    },
}

fn element<'a>(array: &'a [Value], index: usize, what: &str) -> Result<&'a Value, MessageError> {
    array.get(index).ok_or_else(|| {
        MessageError::ProtocolViolation(format!("missing element {} ({})", index, what))
    })
}

fn string_element(array: &[Value], index: usize, what: &str) -> Result<String, MessageError> {
    element(array, index, what)?
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| MessageError::ProtocolViolation(format!("{} must be a string", what)))
}

impl RelayMessage {
    pub fn from_json(raw: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(raw)?;
        let array = value
            .as_array()
            .ok_or_else(|| MessageError::ProtocolViolation("message must be an array".into()))?;
        let message_type = string_element(array, 0, "message type")?;

        match message_type.as_str() {
            "EVENT" => {
                let subscription_id =
                    SubscriptionId::new(string_element(array, 1, "subscription id")?);
                let event: Event = serde_json::from_value(element(array, 2, "event")?.clone())
                    .map_err(|e| MessageError::MalformedEvent(e.to_string()))?;
                Ok(Self::Event {
                    subscription_id,
                    event: Box::new(event),
                })
            }
            "EOSE" => Ok(Self::EndOfStoredEvents(SubscriptionId::new(
                string_element(array, 1, "subscription id")?,
            ))),
            "OK" => {
                let event_id = EventId::from_hex(&string_element(array, 1, "event id")?)
                    .map_err(|e| MessageError::ProtocolViolation(e.to_string()))?;
                let accepted = element(array, 2, "status")?
                    .as_bool()
                    .ok_or_else(|| {
                        MessageError::ProtocolViolation("status must be a boolean".into())
                    })?;
                let message = string_element(array, 3, "message").unwrap_or_default();
                Ok(Self::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            "NOTICE" => Ok(Self::Notice(string_element(array, 1, "notice")?)),
            "AUTH" => Ok(Self::Auth {
                challenge: string_element(array, 1, "challenge")?,
            }),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: SubscriptionId::new(string_element(array, 1, "subscription id")?),
                message: string_element(array, 2, "message").unwrap_or_default(),
            }),
            "COUNT" => {
                let subscription_id =
                    SubscriptionId::new(string_element(array, 1, "subscription id")?);
                let count = element(array, 2, "count payload")?
                    .get("count")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        MessageError::ProtocolViolation("count payload must be {\"count\": n}".into())
                    })?;
                Ok(Self::Count {
                    subscription_id,
                    count,
                })
            }
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Kind, Timestamp, UnsignedEvent};
    use crate::keys::Keys;

    fn sample_event() -> Event {
        let keys = Keys::from_secret_hex(
            "0000000000000000000000000000000000000000000000000000000000000002",
        )
        .unwrap();
        keys.sign_event(UnsignedEvent::new(
            keys.public_key(),
            Timestamp::from_secs(1700000000),
            Kind::TEXT_NOTE,
            vec![],
            "hello",
        ))
    }

    #[test]
    fn test_req_encoding_is_positional() {
        let message = ClientMessage::Req {
            subscription_id: SubscriptionId::new("abc"),
            filters: vec![Filter::new().kind(Kind(1)).limit(10)],
        };
        assert_eq!(message.as_json(), r#"["REQ","abc",{"kinds":[1],"limit":10}]"#);
    }

    #[test]
    fn test_close_and_event_encoding() {
        assert_eq!(
            ClientMessage::Close(SubscriptionId::new("abc")).as_json(),
            r#"["CLOSE","abc"]"#
        );
        let event = sample_event();
        let encoded = ClientMessage::Event(Box::new(event.clone())).as_json();
        assert!(encoded.starts_with(r#"["EVENT",{"#));
        assert!(encoded.contains(&event.id.to_hex()));
    }

    #[test]
    fn test_decode_event_message() {
        let event = sample_event();
        let raw = format!(r#"["EVENT","sub1",{}]"#, event.as_json());
        match RelayMessage::from_json(&raw).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event: decoded,
            } => {
                assert_eq!(subscription_id.as_str(), "sub1");
                assert_eq!(*decoded, event);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_ok_and_prefix() {
        let raw = r#"["OK","b1a649ebe8b435ec71d3784793f3bbf4b93e64e17568a741aecd4c7ddeafce30",false,"pow: difficulty 26 is less than 30"]"#;
        match RelayMessage::from_json(raw).unwrap() {
            RelayMessage::Ok {
                accepted, message, ..
            } => {
                assert!(!accepted);
                assert_eq!(
                    MachineReadablePrefix::parse(&message),
                    Some(MachineReadablePrefix::Pow)
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_eose_closed_notice_auth_count() {
        assert!(matches!(
            RelayMessage::from_json(r#"["EOSE","s"]"#).unwrap(),
            RelayMessage::EndOfStoredEvents(id) if id.as_str() == "s"
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["CLOSED","s","auth-required: do auth"]"#).unwrap(),
            RelayMessage::Closed { message, .. } if message.starts_with("auth-required")
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice(n) if n == "slow down"
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["AUTH","challenge-string"]"#).unwrap(),
            RelayMessage::Auth { challenge } if challenge == "challenge-string"
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["COUNT","s",{"count":42}]"#).unwrap(),
            RelayMessage::Count { count: 42, .. }
        ));
    }

    #[test]
    fn test_unknown_type_is_distinct_from_violation() {
        assert!(matches!(
            RelayMessage::from_json(r#"["NEG-MSG","s","data"]"#),
            Err(MessageError::UnknownType(t)) if t == "NEG-MSG"
        ));
        // A valid frame with a bad event payload is a validation error,
        // not a protocol violation.
        assert!(matches!(
            RelayMessage::from_json(r#"["EVENT","s",{"id":"short"}]"#),
            Err(MessageError::MalformedEvent(_))
        ));
        assert!(matches!(
            RelayMessage::from_json("not json at all"),
            Err(MessageError::InvalidJson(_))
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"{"EVENT":1}"#),
            Err(MessageError::ProtocolViolation(_))
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["OK","nothex",true,""]"#),
            Err(MessageError::ProtocolViolation(_))
        ));
    }
}
