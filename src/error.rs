use thiserror::Error;

use crate::cache::CacheError;
use crate::event::EventError;
use crate::keys::KeyError;
use crate::message::MessageError;
use crate::nip19::Nip19Error;
use crate::pool::PoolError;
use crate::publisher::PublishError;
use crate::relay::{Nip11Error, RelayError};
use crate::signer::SignerError;
use crate::types::RelayUrlError;

pub type Result<T> = core::result::Result<T, DriftnetError>;

#[derive(Error, Debug)]
pub enum DriftnetError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Logging setup error: {0}")]
    LoggingSetup(String),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Bech32 identifier error: {0}")]
    Nip19(#[from] Nip19Error),

    #[error("Wire message error: {0}")]
    Message(#[from] MessageError),

    #[error("Relay url error: {0}")]
    RelayUrl(#[from] RelayUrlError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Relay information document error: {0}")]
    Nip11(#[from] Nip11Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}
