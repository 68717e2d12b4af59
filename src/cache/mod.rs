//! The event-cache adapter contract.
//!
//! Backends must preserve replaceable/addressable semantics and the
//! `created_at`-descending ordering of query results; everything else is
//! theirs to index however they like. The in-memory reference backend lives
//! in [`memory`].

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{Event, EventId, Kind, PublicKey};
use crate::filter::Filter;

pub mod memory;

pub use memory::MemoryCache;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Opaque backend failure, surfaced to the caller. The engine never
    /// hides an adapter failure behind an empty result.
    #[error("cache adapter failure: {0}")]
    Adapter(#[from] anyhow::Error),
    #[error("event not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Storage for events with replaceable-event resolution.
#[async_trait]
pub trait CacheAdapter: Send + Sync + std::fmt::Debug {
    /// Store an event.
    ///
    /// Ephemeral kinds are a no-op. Replaceable and addressable kinds are
    /// installed iff strictly newer than the current entry for their dedup
    /// key (a `created_at` tie keeps the first observed entry). Regular
    /// kinds upsert by id. Returns whether the event was installed.
    async fn store(&self, event: &Event) -> Result<bool>;

    /// All matches for the filter, ordered by `created_at` descending and
    /// truncated by the filter's `limit` if set.
    async fn query(&self, filter: &Filter) -> Result<Vec<Event>>;

    async fn get(&self, id: &EventId) -> Result<Option<Event>>;

    async fn delete(&self, id: &EventId) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// The current event for a replaceable/addressable dedup key
    /// (`"{kind}:{pubkey}"` or `"{kind}:{pubkey}:{d}"`).
    async fn get_by_dedup(&self, key: &str) -> Result<Option<Event>>;

    /// The author's current kind-0 profile event.
    async fn profile(&self, pubkey: &PublicKey) -> Result<Option<Event>> {
        self.get_by_dedup(&format!("{}:{}", Kind::METADATA, pubkey))
            .await
    }

    /// The author's current kind-3 contact list event.
    async fn contacts(&self, pubkey: &PublicKey) -> Result<Option<Event>> {
        self.get_by_dedup(&format!("{}:{}", Kind::CONTACT_LIST, pubkey))
            .await
    }

    /// The author's current kind-10002 relay list event.
    async fn relay_list(&self, pubkey: &PublicKey) -> Result<Option<Event>> {
        self.get_by_dedup(&format!("{}:{}", Kind::RELAY_LIST, pubkey))
            .await
    }
}
