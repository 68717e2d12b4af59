//! Small shared types: normalised relay URLs and subscription identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayUrlError {
    #[error("relay url is empty")]
    Empty,
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("relay url has no host")]
    MissingHost,
}

/// A relay URL in normalised form.
///
/// Normalisation is the single source of relay identity: the scheme and host
/// are lower-cased, a missing scheme defaults to `wss://`, and a trailing
/// slash is stripped. Two differently-spelled URLs that normalise to the same
/// string refer to the same relay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RelayUrl(String);

impl RelayUrl {
    /// Parse and normalise a relay URL.
    ///
    /// Accepts `ws://` and `wss://` URLs; a bare `host[/path]` is given the
    /// default `wss://` scheme.
    pub fn parse(url: &str) -> Result<Self, RelayUrlError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(RelayUrlError::Empty);
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((s, r)) => (s.to_ascii_lowercase(), r),
            None => ("wss".to_string(), trimmed),
        };
        match scheme.as_str() {
            "ws" | "wss" => {}
            other => return Err(RelayUrlError::UnsupportedScheme(other.to_string())),
        }

        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(RelayUrlError::MissingHost);
        }

        let mut normalised = format!("{}://{}", scheme, host.to_ascii_lowercase());
        let path = path.strip_suffix('/').unwrap_or(path);
        normalised.push_str(path);

        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The HTTP(S) URL used for the NIP-11 information document fetch.
    pub fn to_http_url(&self) -> String {
        match self.0.strip_prefix("wss://") {
            Some(rest) => format!("https://{}", rest),
            None => format!("http://{}", self.0.trim_start_matches("ws://")),
        }
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for RelayUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RelayUrl::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A subscription identifier: an opaque string of at most 64 characters,
/// unique per relay connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub const MAX_LEN: usize = 64;

    /// Wrap a caller-supplied id, truncating to the 64-character limit.
    pub fn new<S: Into<String>>(id: S) -> Self {
        let mut id: String = id.into();
        if id.len() > Self::MAX_LEN {
            id.truncate(Self::MAX_LEN);
        }
        Self(id)
    }

    /// Generate a fresh id: 16 random lowercase hex characters.
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalises_case_and_trailing_slash() {
        let a = RelayUrl::parse("Relay.Example.COM/").unwrap();
        let b = RelayUrl::parse("wss://relay.example.com").unwrap();
        let c = RelayUrl::parse("wss://relay.example.com/").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "wss://relay.example.com");
    }

    #[test]
    fn test_preserves_path_and_port() {
        let url = RelayUrl::parse("ws://localhost:8080/nostr/").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/nostr");
    }

    #[test]
    fn test_rejects_http_scheme() {
        assert!(matches!(
            RelayUrl::parse("http://relay.example.com"),
            Err(RelayUrlError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_http_url_for_nip11() {
        let wss = RelayUrl::parse("wss://relay.example.com").unwrap();
        assert_eq!(wss.to_http_url(), "https://relay.example.com");
        let ws = RelayUrl::parse("ws://localhost:7777").unwrap();
        assert_eq!(ws.to_http_url(), "http://localhost:7777");
    }

    #[test]
    fn test_generated_subscription_ids() {
        let id = SubscriptionId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, SubscriptionId::generate());
    }

    #[test]
    fn test_subscription_id_truncates() {
        let long = "a".repeat(100);
        assert_eq!(SubscriptionId::new(long).as_str().len(), 64);
    }
}
