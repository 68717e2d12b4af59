//! The canonical event model: ids, public keys, timestamps, signed and
//! unsigned events, and signature verification.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{All, Message, Secp256k1, XOnlyPublicKey};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod kind;
pub mod serializer;
pub mod tag;

pub use kind::Kind;
pub use serializer::{canonical_json, compute_id};
pub use tag::Tag;

use crate::nip19::{self, FromBech32};

pub(crate) static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Hex length or character set is wrong, or the JSON shape is off.
    #[error("malformed event: {0}")]
    Malformed(String),
    /// The id does not equal the recomputed canonical hash.
    #[error("event id does not match canonical hash")]
    InvalidId,
    /// Schnorr verification against the id failed.
    #[error("invalid signature")]
    InvalidSignature,
}

fn decode_hex_array<const N: usize>(hex_str: &str, what: &str) -> Result<[u8; N], EventError> {
    if hex_str.len() != N * 2 {
        return Err(EventError::Malformed(format!(
            "{} must be {} hex characters, got {}",
            what,
            N * 2,
            hex_str.len()
        )));
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(hex_str, &mut out)
        .map_err(|e| EventError::Malformed(format!("{}: {}", what, e)))?;
    Ok(out)
}

/// A 32-byte event id, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId([u8; 32]);

impl EventId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, EventError> {
        Ok(Self(decode_hex_array(hex_str, "event id")?))
    }

    /// Parse an id from hex or a `note1` bech32 string.
    pub fn parse(input: &str) -> Result<Self, EventError> {
        if input.starts_with(nip19::HRP_NOTE) {
            return Self::from_bech32(input)
                .map_err(|e| EventError::Malformed(format!("note: {}", e)));
        }
        Self::from_hex(input)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for EventId {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EventId::from_hex(&raw).map_err(DeError::custom)
    }
}

/// A 32-byte x-only secp256k1 public key, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, EventError> {
        Ok(Self(decode_hex_array(hex_str, "public key")?))
    }

    /// Parse a key from hex or an `npub1` bech32 string.
    pub fn parse(input: &str) -> Result<Self, EventError> {
        if input.starts_with(nip19::HRP_PUBKEY) {
            return Self::from_bech32(input)
                .map_err(|e| EventError::Malformed(format!("npub: {}", e)));
        }
        Self::from_hex(input)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn to_x_only(self) -> Result<XOnlyPublicKey, EventError> {
        XOnlyPublicKey::from_slice(&self.0).map_err(|_| EventError::InvalidSignature)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PublicKey::from_hex(&raw).map_err(DeError::custom)
    }
}

/// A 64-byte Schnorr signature, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, EventError> {
        Ok(Self(decode_hex_array(hex_str, "signature")?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Signature::from_hex(&raw).map_err(DeError::custom)
    }
}

/// Unix seconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The key under which the cache collapses same-identity events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Replaceable (`"{kind}:{pubkey}"`) or addressable
    /// (`"{kind}:{pubkey}:{d}"`) coordinate.
    Coordinate(String),
    /// Regular events deduplicate by id.
    Id(EventId),
}

/// A signed Nostr event.
///
/// Equality and hashing are by `id`: two events with the same id are the
/// same event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: Signature,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Event {
    /// Parse an event from its JSON object form, validating hex fields.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        serde_json::from_str(json).map_err(|e| EventError::Malformed(e.to_string()))
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string(self).expect("event serialization is infallible")
    }

    /// The canonical serialization this event's id commits to.
    pub fn canonical_json(&self) -> String {
        canonical_json(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Verify the event: the id must equal the recomputed canonical hash and
    /// the Schnorr signature must verify against the id under `pubkey`.
    pub fn verify(&self) -> Result<(), EventError> {
        let expected = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        if expected != self.id {
            return Err(EventError::InvalidId);
        }
        self.verify_signature()
    }

    /// Verify only the Schnorr signature against the stored id.
    pub fn verify_signature(&self) -> Result<(), EventError> {
        let message = Message::from_digest(*self.id.as_bytes());
        let signature = SchnorrSignature::from_slice(self.sig.as_bytes())
            .map_err(|_| EventError::InvalidSignature)?;
        let x_only = self.pubkey.to_x_only()?;
        SECP.verify_schnorr(&signature, &message, &x_only)
            .map_err(|_| EventError::InvalidSignature)
    }

    /// The first value of the first `d` tag, for addressable events.
    pub fn identifier(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.name() == "d")
            .and_then(Tag::content)
    }

    /// The dedup key this event is cached under.
    pub fn dedup_key(&self) -> DedupKey {
        if self.kind.is_replaceable() {
            DedupKey::Coordinate(format!("{}:{}", self.kind, self.pubkey))
        } else if self.kind.is_addressable() {
            DedupKey::Coordinate(format!(
                "{}:{}:{}",
                self.kind,
                self.pubkey,
                self.identifier().unwrap_or("")
            ))
        } else {
            DedupKey::Id(self.id)
        }
    }
}

/// Event fields before signing. `id` and `sig` are filled in by a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub kind: Kind,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(
        pubkey: PublicKey,
        created_at: Timestamp,
        kind: Kind,
        tags: Vec<Tag>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            pubkey,
            created_at,
            kind,
            tags,
            content: content.into(),
        }
    }

    /// The id this event will have once signed.
    pub fn id(&self) -> EventId {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Attach a signature, producing a signed event. The signature is not
    /// verified here; `sign` implementations are expected to be honest and
    /// relays re-verify on receipt.
    pub fn into_signed(self, sig: Signature) -> Event {
        let id = self.id();
        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}
