//! Event kinds and the kind-range classes that drive cache behaviour.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An event kind.
///
/// The numeric ranges classify storage behaviour: kinds `0`, `3` and
/// `[10000, 20000)` are replaceable, `[20000, 30000)` are ephemeral,
/// `[30000, 40000)` are addressable, everything else is regular.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub u16);

impl Kind {
    /// Profile metadata (NIP-01).
    pub const METADATA: Kind = Kind(0);
    /// Short text note.
    pub const TEXT_NOTE: Kind = Kind(1);
    /// Contact list (NIP-02).
    pub const CONTACT_LIST: Kind = Kind(3);
    /// Relay list metadata (NIP-65).
    pub const RELAY_LIST: Kind = Kind(10002);
    /// Client authentication (NIP-42). Ephemeral by range.
    pub const AUTH: Kind = Kind(22242);
    /// Long-form content (NIP-23). Addressable by range.
    pub const LONG_FORM: Kind = Kind(30023);

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Replaceable: a later event from the same author supersedes an earlier
    /// one of the same kind.
    pub fn is_replaceable(&self) -> bool {
        matches!(self.0, 0 | 3) || (10000..20000).contains(&self.0)
    }

    /// Ephemeral: relayed but never cached.
    pub fn is_ephemeral(&self) -> bool {
        (20000..30000).contains(&self.0)
    }

    /// Addressable: replaceable per `(kind, pubkey, d-tag)`.
    pub fn is_addressable(&self) -> bool {
        (30000..40000).contains(&self.0)
    }

    /// Regular: stored by id.
    pub fn is_regular(&self) -> bool {
        !self.is_replaceable() && !self.is_ephemeral() && !self.is_addressable()
    }
}

impl From<u16> for Kind {
    fn from(kind: u16) -> Self {
        Kind(kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
