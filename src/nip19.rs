//! Bech32 identifiers: `npub`, `nsec`, `note` and the TLV forms
//! `nprofile`, `nevent`, `naddr`.
//!
//! TLV types: `0` = identifier bytes (or UTF-8 string for `naddr`),
//! `1` = relay URL, `2` = author pubkey, `3` = kind as big-endian u32.

use bech32::{FromBase32, ToBase32, Variant};
use thiserror::Error;

use crate::event::{EventId, Kind, PublicKey};

pub const HRP_PUBKEY: &str = "npub";
pub const HRP_SECRET_KEY: &str = "nsec";
pub const HRP_NOTE: &str = "note";
pub const HRP_PROFILE: &str = "nprofile";
pub const HRP_EVENT: &str = "nevent";
pub const HRP_COORDINATE: &str = "naddr";

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Nip19Error {
    #[error("bech32: {0}")]
    Bech32(String),
    #[error("wrong prefix: expected {expected}, got {found}")]
    WrongPrefix { expected: &'static str, found: String },
    #[error("unknown prefix: {0}")]
    UnknownPrefix(String),
    #[error("payload must be {expected} bytes, got {found}")]
    WrongPayloadLength { expected: usize, found: usize },
    #[error("TLV is missing required type {0}")]
    MissingTlv(u8),
    #[error("malformed TLV")]
    MalformedTlv,
}

impl From<bech32::Error> for Nip19Error {
    fn from(e: bech32::Error) -> Self {
        Self::Bech32(e.to_string())
    }
}

pub trait ToBech32 {
    fn to_bech32(&self) -> Result<String, Nip19Error>;
}

pub trait FromBech32: Sized {
    fn from_bech32(s: &str) -> Result<Self, Nip19Error>;
}

fn encode_simple(hrp: &'static str, payload: &[u8]) -> Result<String, Nip19Error> {
    Ok(bech32::encode(hrp, payload.to_base32(), Variant::Bech32)?)
}

fn decode_simple(hrp: &'static str, s: &str) -> Result<[u8; 32], Nip19Error> {
    let (found, data, _variant) = bech32::decode(s)?;
    if found != hrp {
        return Err(Nip19Error::WrongPrefix {
            expected: hrp,
            found,
        });
    }
    let bytes = Vec::<u8>::from_base32(&data)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Nip19Error::WrongPayloadLength {
            expected: 32,
            found: len,
        })
}

impl ToBech32 for PublicKey {
    fn to_bech32(&self) -> Result<String, Nip19Error> {
        encode_simple(HRP_PUBKEY, self.as_bytes())
    }
}

impl FromBech32 for PublicKey {
    fn from_bech32(s: &str) -> Result<Self, Nip19Error> {
        Ok(PublicKey::from_bytes(decode_simple(HRP_PUBKEY, s)?))
    }
}

impl ToBech32 for EventId {
    fn to_bech32(&self) -> Result<String, Nip19Error> {
        encode_simple(HRP_NOTE, self.as_bytes())
    }
}

impl FromBech32 for EventId {
    fn from_bech32(s: &str) -> Result<Self, Nip19Error> {
        Ok(EventId::from_bytes(decode_simple(HRP_NOTE, s)?))
    }
}

/// Raw `nsec` payload. Kept as bytes so this module stays independent of
/// the signing layer; `Keys::parse` turns it into a real secret key.
#[derive(Clone)]
pub struct SecretKeyBytes([u8; 32]);

impl SecretKeyBytes {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for SecretKeyBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl ToBech32 for SecretKeyBytes {
    fn to_bech32(&self) -> Result<String, Nip19Error> {
        encode_simple(HRP_SECRET_KEY, &self.0)
    }
}

impl FromBech32 for SecretKeyBytes {
    fn from_bech32(s: &str) -> Result<Self, Nip19Error> {
        Ok(Self(decode_simple(HRP_SECRET_KEY, s)?))
    }
}

struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, tlv_type: u8, value: &[u8]) {
        debug_assert!(value.len() <= u8::MAX as usize);
        self.buf.push(tlv_type);
        self.buf.push(value.len() as u8);
        self.buf.extend_from_slice(value);
    }
}

fn parse_tlv(bytes: &[u8]) -> Result<Vec<(u8, Vec<u8>)>, Nip19Error> {
    let mut entries = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(Nip19Error::MalformedTlv);
        }
        let (tlv_type, len) = (rest[0], rest[1] as usize);
        if rest.len() < 2 + len {
            return Err(Nip19Error::MalformedTlv);
        }
        entries.push((tlv_type, rest[2..2 + len].to_vec()));
        rest = &rest[2 + len..];
    }
    Ok(entries)
}

fn decode_tlv(hrp: &'static str, s: &str) -> Result<Vec<(u8, Vec<u8>)>, Nip19Error> {
    let (found, data, _variant) = bech32::decode(s)?;
    if found != hrp {
        return Err(Nip19Error::WrongPrefix {
            expected: hrp,
            found,
        });
    }
    parse_tlv(&Vec::<u8>::from_base32(&data)?)
}

fn bytes32(value: Vec<u8>) -> Result<[u8; 32], Nip19Error> {
    let len = value.len();
    value
        .try_into()
        .map_err(|_| Nip19Error::WrongPayloadLength {
            expected: 32,
            found: len,
        })
}

/// An `nprofile`: a public key plus relay hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nip19Profile {
    pub public_key: PublicKey,
    pub relays: Vec<String>,
}

impl ToBech32 for Nip19Profile {
    fn to_bech32(&self) -> Result<String, Nip19Error> {
        let mut tlv = TlvWriter::new();
        tlv.push(TLV_SPECIAL, self.public_key.as_bytes());
        for relay in &self.relays {
            tlv.push(TLV_RELAY, relay.as_bytes());
        }
        encode_simple(HRP_PROFILE, &tlv.buf)
    }
}

impl FromBech32 for Nip19Profile {
    fn from_bech32(s: &str) -> Result<Self, Nip19Error> {
        let mut public_key = None;
        let mut relays = Vec::new();
        for (tlv_type, value) in decode_tlv(HRP_PROFILE, s)? {
            match tlv_type {
                TLV_SPECIAL => public_key = Some(PublicKey::from_bytes(bytes32(value)?)),
                TLV_RELAY => relays.push(String::from_utf8_lossy(&value).into_owned()),
                _ => {} // unknown TLV types are ignored
            }
        }
        Ok(Self {
            public_key: public_key.ok_or(Nip19Error::MissingTlv(TLV_SPECIAL))?,
            relays,
        })
    }
}

/// An `nevent`: an event id plus relay hints and optional author and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nip19Event {
    pub event_id: EventId,
    pub author: Option<PublicKey>,
    pub kind: Option<Kind>,
    pub relays: Vec<String>,
}

impl ToBech32 for Nip19Event {
    fn to_bech32(&self) -> Result<String, Nip19Error> {
        let mut tlv = TlvWriter::new();
        tlv.push(TLV_SPECIAL, self.event_id.as_bytes());
        for relay in &self.relays {
            tlv.push(TLV_RELAY, relay.as_bytes());
        }
        if let Some(author) = &self.author {
            tlv.push(TLV_AUTHOR, author.as_bytes());
        }
        if let Some(kind) = self.kind {
            tlv.push(TLV_KIND, &u32::from(kind.as_u16()).to_be_bytes());
        }
        encode_simple(HRP_EVENT, &tlv.buf)
    }
}

impl FromBech32 for Nip19Event {
    fn from_bech32(s: &str) -> Result<Self, Nip19Error> {
        let mut event_id = None;
        let mut author = None;
        let mut kind = None;
        let mut relays = Vec::new();
        for (tlv_type, value) in decode_tlv(HRP_EVENT, s)? {
            match tlv_type {
                TLV_SPECIAL => event_id = Some(EventId::from_bytes(bytes32(value)?)),
                TLV_RELAY => relays.push(String::from_utf8_lossy(&value).into_owned()),
                TLV_AUTHOR => author = Some(PublicKey::from_bytes(bytes32(value)?)),
                TLV_KIND => {
                    let raw: [u8; 4] =
                        value.try_into().map_err(|_| Nip19Error::MalformedTlv)?;
                    kind = Some(Kind((u32::from_be_bytes(raw) & 0xffff) as u16));
                }
                _ => {}
            }
        }
        Ok(Self {
            event_id: event_id.ok_or(Nip19Error::MissingTlv(TLV_SPECIAL))?,
            author,
            kind,
            relays,
        })
    }
}

/// An `naddr`: the `(kind, pubkey, d-identifier)` coordinate of an
/// addressable event, plus relay hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nip19Coordinate {
    pub kind: Kind,
    pub public_key: PublicKey,
    pub identifier: String,
    pub relays: Vec<String>,
}

impl ToBech32 for Nip19Coordinate {
    fn to_bech32(&self) -> Result<String, Nip19Error> {
        let mut tlv = TlvWriter::new();
        tlv.push(TLV_SPECIAL, self.identifier.as_bytes());
        for relay in &self.relays {
            tlv.push(TLV_RELAY, relay.as_bytes());
        }
        tlv.push(TLV_AUTHOR, self.public_key.as_bytes());
        tlv.push(TLV_KIND, &u32::from(self.kind.as_u16()).to_be_bytes());
        encode_simple(HRP_COORDINATE, &tlv.buf)
    }
}

impl FromBech32 for Nip19Coordinate {
    fn from_bech32(s: &str) -> Result<Self, Nip19Error> {
        let mut identifier = None;
        let mut public_key = None;
        let mut kind = None;
        let mut relays = Vec::new();
        for (tlv_type, value) in decode_tlv(HRP_COORDINATE, s)? {
            match tlv_type {
                TLV_SPECIAL => identifier = Some(String::from_utf8_lossy(&value).into_owned()),
                TLV_RELAY => relays.push(String::from_utf8_lossy(&value).into_owned()),
                TLV_AUTHOR => public_key = Some(PublicKey::from_bytes(bytes32(value)?)),
                TLV_KIND => {
                    let raw: [u8; 4] =
                        value.try_into().map_err(|_| Nip19Error::MalformedTlv)?;
                    kind = Some(Kind((u32::from_be_bytes(raw) & 0xffff) as u16));
                }
                _ => {}
            }
        }
        Ok(Self {
            kind: kind.ok_or(Nip19Error::MissingTlv(TLV_KIND))?,
            public_key: public_key.ok_or(Nip19Error::MissingTlv(TLV_AUTHOR))?,
            identifier: identifier.ok_or(Nip19Error::MissingTlv(TLV_SPECIAL))?,
            relays,
        })
    }
}

/// Any NIP-19 entity, as classified by its prefix.
#[derive(Debug, Clone)]
pub enum Nip19 {
    Pubkey(PublicKey),
    EventId(EventId),
    Profile(Nip19Profile),
    Event(Nip19Event),
    Coordinate(Nip19Coordinate),
}

/// Decode any supported bech32 identifier by prefix.
///
/// `nsec` is deliberately not handled here: secret keys go through
/// `Keys::parse` and never travel through the generic entity path.
pub fn decode(s: &str) -> Result<Nip19, Nip19Error> {
    let (hrp, _, _) = bech32::decode(s)?;
    match hrp.as_str() {
        HRP_PUBKEY => Ok(Nip19::Pubkey(PublicKey::from_bech32(s)?)),
        HRP_NOTE => Ok(Nip19::EventId(EventId::from_bech32(s)?)),
        HRP_PROFILE => Ok(Nip19::Profile(Nip19Profile::from_bech32(s)?)),
        HRP_EVENT => Ok(Nip19::Event(Nip19Event::from_bech32(s)?)),
        HRP_COORDINATE => Ok(Nip19::Coordinate(Nip19Coordinate::from_bech32(s)?)),
        other => Err(Nip19Error::UnknownPrefix(other.to_string())),
    }
}
