//! Secret-key handling and in-process event signing.

use secp256k1::{Keypair, Message, SecretKey};
use thiserror::Error;

use crate::event::{Event, PublicKey, Signature, UnsignedEvent, SECP};
use crate::nip19::{self, FromBech32};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("bech32 decode failed: {0}")]
    Bech32(String),
}

/// A secp256k1 keypair used for signing events.
///
/// The secret key never leaves this struct except through
/// [`Keys::secret_key_hex`]; the engine itself only ever sees the
/// [`crate::signer::NostrSigner`] capability.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: PublicKey,
}

impl Keys {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        loop {
            let bytes: [u8; 32] = rand::random();
            if let Ok(secret_key) = SecretKey::from_slice(&bytes) {
                return Self::from_secret_key(secret_key);
            }
            // Astronomically unlikely: bytes outside the curve order. Retry.
        }
    }

    /// Parse a secret key from hex or an `nsec1` bech32 string.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        if input.starts_with(nip19::HRP_SECRET_KEY) {
            let bytes = nip19::SecretKeyBytes::from_bech32(input)
                .map_err(|e| KeyError::Bech32(e.to_string()))?;
            let secret_key = SecretKey::from_slice(bytes.as_ref())
                .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
            return Ok(Self::from_secret_key(secret_key));
        }
        Self::from_secret_hex(input)
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes =
            hex::decode(hex_str).map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let keypair = Keypair::from_secret_key(&SECP, &secret_key);
        let (x_only, _parity) = keypair.x_only_public_key();
        Self {
            keypair,
            public_key: PublicKey::from_bytes(x_only.serialize()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.keypair.secret_key().secret_bytes())
    }

    /// The secret key as an `nsec1` bech32 string.
    pub fn to_nsec(&self) -> Result<String, KeyError> {
        use crate::nip19::ToBech32;
        nip19::SecretKeyBytes::new(self.keypair.secret_key().secret_bytes())
            .to_bech32()
            .map_err(|e| KeyError::Bech32(e.to_string()))
    }

    /// Sign the unsigned event, filling in `id` and `sig`.
    ///
    /// The unsigned event's `pubkey` is overwritten with this keypair's
    /// public key so the signature always verifies.
    pub fn sign_event(&self, mut unsigned: UnsignedEvent) -> Event {
        unsigned.pubkey = self.public_key;
        let id = unsigned.id();
        let message = Message::from_digest(*id.as_bytes());
        let signature = SECP.sign_schnorr_no_aux_rand(&message, &self.keypair);
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(signature.as_ref());
        unsigned.into_signed(Signature::from_bytes(sig_bytes))
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}
