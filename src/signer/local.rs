//! In-process secret-key signer.

use async_trait::async_trait;

use crate::event::{Event, PublicKey, UnsignedEvent};
use crate::keys::Keys;

use super::{NostrSigner, Result};

/// A signer backed by an in-process [`Keys`] pair.
///
/// Keys live in memory for the lifetime of the signer; nothing is persisted.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    keys: Keys,
}

impl LocalSigner {
    /// Generate a signer with fresh random keys.
    pub fn generate() -> Self {
        Self {
            keys: Keys::generate(),
        }
    }

    pub fn from_keys(keys: Keys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }
}

#[async_trait]
impl NostrSigner for LocalSigner {
    async fn public_key(&self) -> Result<PublicKey> {
        Ok(self.keys.public_key())
    }

    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event> {
        Ok(self.keys.sign_event(unsigned))
    }
}
