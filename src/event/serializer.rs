//! Canonical event serialization and id computation.
//!
//! The id of an event is the SHA-256 of the canonical serialization
//! `[0, pubkey, created_at, kind, tags, content]` with minimal JSON: no
//! insignificant whitespace, UTF-8, control characters JSON-escaped.

use serde_json::json;
use sha2::{Digest, Sha256};

use super::{EventId, Kind, PublicKey, Tag, Timestamp};

/// The canonical serialization of the given event fields.
pub fn canonical_json(
    pubkey: &PublicKey,
    created_at: Timestamp,
    kind: Kind,
    tags: &[Tag],
    content: &str,
) -> String {
    // serde_json emits compact JSON with RFC 8259 string escaping, which is
    // exactly the canonical form.
    json!([0, pubkey.to_hex(), created_at, kind, tags, content]).to_string()
}

/// Compute the event id for the given fields.
pub fn compute_id(
    pubkey: &PublicKey,
    created_at: Timestamp,
    kind: Kind,
    tags: &[Tag],
    content: &str,
) -> EventId {
    let serialized = canonical_json(pubkey, created_at, kind, tags, content);
    let digest: [u8; 32] = Sha256::digest(serialized.as_bytes()).into();
    EventId::from_bytes(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_shape() {
        let pubkey = PublicKey::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let serialized = canonical_json(&pubkey, Timestamp::from_secs(1700000000), Kind(1), &[], "hello");
        assert_eq!(
            serialized,
            r#"[0,"0000000000000000000000000000000000000000000000000000000000000001",1700000000,1,[],"hello"]"#
        );
    }

    #[test]
    fn test_canonical_escapes_control_characters() {
        let pubkey = PublicKey::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let serialized = canonical_json(
            &pubkey,
            Timestamp::from_secs(1),
            Kind(1),
            &[],
            "line\nbreak\ttab \"quote\"",
        );
        assert!(serialized.contains(r#""line\nbreak\ttab \"quote\"""#));
    }

    #[test]
    fn test_id_is_sha256_of_canonical() {
        let pubkey = PublicKey::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let created_at = Timestamp::from_secs(1700000000);
        let id = compute_id(&pubkey, created_at, Kind(1), &[], "hello");
        let expected: [u8; 32] =
            Sha256::digest(canonical_json(&pubkey, created_at, Kind(1), &[], "hello").as_bytes())
                .into();
        assert_eq!(id.as_bytes(), &expected);
    }
}
