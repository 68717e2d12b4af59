//! NIP-11 relay information documents.
//!
//! Fetched over HTTP by substituting `wss`->`https` (`ws`->`http`) with
//! `Accept: application/nostr+json` and 5-second per-phase timeouts. Parsed
//! best-effort: unknown fields are ignored, missing fields stay `None`.
//! Results live in a bounded TTL cache with single-flight deduplication of
//! concurrent fetches for the same URL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::RelayUrl;

const ACCEPT_HEADER: &str = "application/nostr+json";
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum Nip11Error {
    #[error("http status {0}")]
    Http(u16),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for Nip11Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Limitations a relay imposes on clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limitation {
    pub max_message_length: Option<i64>,
    pub max_subscriptions: Option<i64>,
    pub max_filters: Option<i64>,
    pub max_limit: Option<i64>,
    pub max_subid_length: Option<i64>,
    pub max_event_tags: Option<i64>,
    pub max_content_length: Option<i64>,
    pub min_pow_difficulty: Option<i64>,
    pub auth_required: Option<bool>,
    pub payment_required: Option<bool>,
    pub created_at_lower_limit: Option<i64>,
    pub created_at_upper_limit: Option<i64>,
}

/// A relay's NIP-11 information document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayInformationDocument {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub banner: Option<String>,
    pub pubkey: Option<String>,
    pub contact: Option<String>,
    pub supported_nips: Option<Vec<u16>>,
    pub software: Option<String>,
    pub version: Option<String>,
    pub limitation: Option<Limitation>,
    /// Retention policies, passed through uninterpreted.
    pub retention: Option<serde_json::Value>,
    /// Fee schedules, passed through uninterpreted.
    pub fees: Option<serde_json::Value>,
}

impl RelayInformationDocument {
    pub fn supports_nip(&self, nip: u16) -> bool {
        self.supported_nips
            .as_ref()
            .is_some_and(|nips| nips.contains(&nip))
    }
}

#[derive(Debug, Clone)]
struct CachedDocument {
    fetched_at: Instant,
    document: RelayInformationDocument,
}

/// Process-wide NIP-11 fetcher and cache.
#[derive(Debug)]
pub struct Nip11Client {
    http: reqwest::Client,
    documents: DashMap<String, CachedDocument>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    capacity: usize,
    ttl: Duration,
}

impl Default for Nip11Client {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}

impl Nip11Client {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(FETCH_TIMEOUT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client construction is infallible with these options");
        Self {
            http,
            documents: DashMap::new(),
            inflight: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// The cached document for `url`, fetching it if absent or stale.
    /// Concurrent callers for the same URL share one in-flight request.
    pub async fn fetch(&self, url: &RelayUrl) -> Result<RelayInformationDocument, Nip11Error> {
        let key = url.as_str().to_string();
        if let Some(document) = self.fresh(&key) {
            return Ok(document);
        }

        let gate = {
            let entry = self.inflight.entry(key.clone()).or_default();
            entry.value().clone()
        };
        let _guard = gate.lock().await;

        // Someone may have fetched while we waited on the gate.
        if let Some(document) = self.fresh(&key) {
            self.inflight.remove(&key);
            return Ok(document);
        }

        let result = self.fetch_remote(url).await;
        if let Ok(document) = &result {
            self.insert(key.clone(), document.clone());
        }
        self.inflight.remove(&key);
        result
    }

    /// The cached document, if present and fresh. Never fetches.
    pub fn cached(&self, url: &RelayUrl) -> Option<RelayInformationDocument> {
        self.fresh(url.as_str())
    }

    fn fresh(&self, key: &str) -> Option<RelayInformationDocument> {
        let entry = self.documents.get(key)?;
        if entry.fetched_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.document.clone())
    }

    fn insert(&self, key: String, document: RelayInformationDocument) {
        self.documents.insert(
            key,
            CachedDocument {
                fetched_at: Instant::now(),
                document,
            },
        );
        if self.documents.len() > self.capacity {
            self.evict();
        }
    }

    fn evict(&self) {
        self.documents
            .retain(|_, cached| cached.fetched_at.elapsed() <= self.ttl);
        while self.documents.len() > self.capacity {
            let oldest = self
                .documents
                .iter()
                .min_by_key(|entry| entry.fetched_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.documents.remove(&key);
                }
                None => break,
            }
        }
    }

    async fn fetch_remote(&self, url: &RelayUrl) -> Result<RelayInformationDocument, Nip11Error> {
        let http_url = url.to_http_url();
        tracing::debug!(
            target: "driftnet::relay::limits::fetch_remote",
            "Fetching NIP-11 document from {}",
            http_url
        );
        let response = self
            .http
            .get(&http_url)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Nip11Error::Http(status.as_u16()));
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| Nip11Error::Parse(e.to_string()))
    }
}
