//! Signer abstraction layer.
//!
//! The engine never owns secret material: everything that needs a signature
//! goes through the [`NostrSigner`] capability. [`LocalSigner`] wraps an
//! in-process secret key; external signer apps (NIP-07/NIP-55 bridges) plug
//! in behind the same trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{Event, PublicKey, UnsignedEvent};
use crate::types::RelayUrl;

pub mod local;

pub use local::LocalSigner;

use std::sync::Arc;

/// A shareable signer handle.
pub type SharedSigner = Arc<dyn NostrSigner>;

/// The engine-wide active-signer slot. Relays read it for NIP-42 AUTH; the
/// facade writes it on `set_signer`/`unset_signer`.
pub(crate) type SignerCell = Arc<tokio::sync::RwLock<Option<SharedSigner>>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The user declined the signing request.
    #[error("user cancelled the request")]
    UserCancelled,
    /// The signer backend is not reachable right now.
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    /// The backend does not implement this operation.
    #[error("operation unsupported: {0}")]
    Unsupported(&'static str),
    #[error("key error: {0}")]
    Key(String),
}

pub type Result<T> = std::result::Result<T, SignerError>;

/// A signing capability.
///
/// `nip04_*`/`nip44_*` and `relays` are optional: the defaults report
/// `Unsupported` (respectively an empty relay list), and backends override
/// what they actually provide.
#[async_trait]
pub trait NostrSigner: Send + Sync + std::fmt::Debug {
    /// The 32-byte x-only public key this signer signs as.
    async fn public_key(&self) -> Result<PublicKey>;

    /// Sign the event, setting `id` and `sig`.
    async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event>;

    async fn nip04_encrypt(&self, _public_key: &PublicKey, _content: &str) -> Result<String> {
        Err(SignerError::Unsupported("nip04_encrypt"))
    }

    async fn nip04_decrypt(&self, _public_key: &PublicKey, _content: &str) -> Result<String> {
        Err(SignerError::Unsupported("nip04_decrypt"))
    }

    async fn nip44_encrypt(&self, _public_key: &PublicKey, _content: &str) -> Result<String> {
        Err(SignerError::Unsupported("nip44_encrypt"))
    }

    async fn nip44_decrypt(&self, _public_key: &PublicKey, _content: &str) -> Result<String> {
        Err(SignerError::Unsupported("nip44_decrypt"))
    }

    /// Relays the signer recommends for its user, if it knows any.
    async fn get_relays(&self) -> Result<Vec<RelayUrl>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;

    #[tokio::test]
    async fn test_optional_operations_default_to_unsupported() {
        let signer = LocalSigner::from_keys(Keys::generate());
        let peer = Keys::generate().public_key();
        assert_eq!(
            signer.nip04_encrypt(&peer, "hi").await,
            Err(SignerError::Unsupported("nip04_encrypt"))
        );
        assert_eq!(
            signer.nip44_decrypt(&peer, "hi").await,
            Err(SignerError::Unsupported("nip44_decrypt"))
        );
        assert_eq!(signer.get_relays().await, Ok(vec![]));
    }
}
