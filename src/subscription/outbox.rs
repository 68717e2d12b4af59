//! Outbox-model relay selection.
//!
//! Author-constrained queries are routed to the authors' declared write
//! relays (kind 10002, NIP-65) instead of whatever the pool happens to be
//! connected to. Authors whose relay list is not cached yet contribute
//! nothing to this call; a background fetch against the discovery relays
//! fills the cache for next time.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::cache::CacheAdapter;
use crate::event::{Event, PublicKey};
use crate::filter::Filter;
use crate::pool::RelayPool;
use crate::types::RelayUrl;

use super::{SubscribeOptions, SubscriptionManager};

/// Upper bound on one background relay-list lookup.
const DISCOVERY_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How the manager routes author-constrained subscriptions.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub enabled: bool,
    /// Small, separately-configured relay set used to look up relay lists
    /// for authors we have not seen yet.
    pub discovery_relays: Vec<RelayUrl>,
    /// How many of each author's write relays to use.
    pub relay_goal_per_author: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery_relays: Vec::new(),
            relay_goal_per_author: 2,
        }
    }
}

/// A single `r`-tag entry from a kind-10002 relay list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayListEntry {
    pub url: RelayUrl,
    /// `None` means both read and write.
    pub marker: Option<String>,
}

impl RelayListEntry {
    pub fn is_write(&self) -> bool {
        match &self.marker {
            None => true,
            Some(marker) => marker == "write",
        }
    }

    pub fn is_read(&self) -> bool {
        match &self.marker {
            None => true,
            Some(marker) => marker == "read",
        }
    }
}

/// Parse the `r` tags of a kind-10002 event. Unparseable URLs are skipped.
pub fn relay_list_entries(event: &Event) -> Vec<RelayListEntry> {
    event
        .tags
        .iter()
        .filter(|tag| tag.name() == "r")
        .filter_map(|tag| {
            let url = RelayUrl::parse(tag.content()?).ok()?;
            let marker = tag.values().get(1).cloned();
            Some(RelayListEntry { url, marker })
        })
        .collect()
}

/// Pick the relay set for a subscription with no explicit override.
pub(crate) async fn select_relays(
    pool: &RelayPool,
    cache: &dyn CacheAdapter,
    config: &OutboxConfig,
    manager: &SubscriptionManager,
    filters: &[Filter],
) -> Vec<RelayUrl> {
    let authors: BTreeSet<PublicKey> = filters
        .iter()
        .filter_map(|filter| filter.authors.as_ref())
        .flatten()
        .copied()
        .collect();

    if config.enabled && !authors.is_empty() {
        let mut chosen: BTreeSet<RelayUrl> = BTreeSet::new();
        let mut missing: Vec<PublicKey> = Vec::new();

        for author in &authors {
            match cache.relay_list(author).await {
                Ok(Some(event)) => {
                    let write_relays = relay_list_entries(&event)
                        .into_iter()
                        .filter(RelayListEntry::is_write)
                        .take(config.relay_goal_per_author)
                        .map(|entry| entry.url);
                    chosen.extend(write_relays);
                }
                Ok(None) => missing.push(*author),
                Err(e) => {
                    tracing::warn!(
                        target: "driftnet::subscription::outbox",
                        "Relay list lookup failed for {}: {}",
                        author,
                        e
                    );
                }
            }
        }

        if !missing.is_empty() {
            spawn_relay_list_fetch(manager, config, missing);
        }
        if !chosen.is_empty() {
            return chosen.into_iter().collect();
        }
    }

    let connected = pool.connected_urls();
    if !connected.is_empty() {
        return connected;
    }
    pool.urls()
}

/// Fetch missing kind-10002 relay lists from the discovery relays in the
/// background. Results land in the cache through the normal event path and
/// improve the next selection for these authors.
fn spawn_relay_list_fetch(
    manager: &SubscriptionManager,
    config: &OutboxConfig,
    authors: Vec<PublicKey>,
) {
    if config.discovery_relays.is_empty() {
        return;
    }
    let manager = manager.clone();
    let discovery_relays = config.discovery_relays.clone();
    tokio::spawn(async move {
        tracing::debug!(
            target: "driftnet::subscription::outbox",
            "Fetching relay lists for {} author(s)",
            authors.len()
        );
        let filter = Filter::new()
            .authors(authors)
            .kind(crate::event::Kind::RELAY_LIST);
        let subscription = manager
            .subscribe(
                vec![filter],
                SubscribeOptions {
                    relays: Some(discovery_relays),
                    close_on_eose: true,
                },
            )
            .await;
        // Events reach the cache through the router; EOSE closes the
        // subscription. The timeout bounds unreachable discovery relays.
        let mut lifecycle = subscription.lifecycle_watch();
        let _ = tokio::time::timeout(DISCOVERY_FETCH_TIMEOUT, async {
            while lifecycle.changed().await.is_ok() {
                if *lifecycle.borrow() == super::SubscriptionLifecycle::Closed {
                    break;
                }
            }
        })
        .await;
        subscription.close().await;
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheAdapter, MemoryCache};
    use crate::event::{Kind, Tag, Timestamp, UnsignedEvent};
    use crate::keys::Keys;
    use crate::signer::SignerCell;
    use crate::subscription::SubscriptionManager;

    fn relay_list_event(keys: &Keys, relays: &[(&str, Option<&str>)]) -> Event {
        let tags = relays
            .iter()
            .map(|(url, marker)| Tag::relay(*url, *marker))
            .collect();
        keys.sign_event(UnsignedEvent::new(
            keys.public_key(),
            Timestamp::from_secs(100),
            Kind::RELAY_LIST,
            tags,
            "",
        ))
    }

    fn manager_with(cache: Arc<MemoryCache>, config: OutboxConfig) -> SubscriptionManager {
        SubscriptionManager::new(RelayPool::new(SignerCell::default()), cache, config)
    }

    #[test]
    fn test_relay_list_entry_markers() {
        let keys = Keys::generate();
        let event = relay_list_event(
            &keys,
            &[
                ("wss://both.example.com", None),
                ("wss://read.example.com", Some("read")),
                ("wss://write.example.com", Some("write")),
            ],
        );
        let entries = relay_list_entries(&event);
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_write() && entries[0].is_read());
        assert!(!entries[1].is_write() && entries[1].is_read());
        assert!(entries[2].is_write() && !entries[2].is_read());
    }

    #[tokio::test]
    async fn test_author_filter_routes_to_write_relays() {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keys::generate();
        let event = relay_list_event(
            &keys,
            &[
                ("wss://write1.example.com", Some("write")),
                ("wss://read.example.com", Some("read")),
                ("wss://write2.example.com", Some("write")),
                ("wss://write3.example.com", Some("write")),
            ],
        );
        cache.store(&event).await.unwrap();

        let config = OutboxConfig::default();
        let manager = manager_with(cache.clone(), config.clone());
        let filters = vec![Filter::new().author(keys.public_key()).kind(Kind(1))];
        let chosen =
            select_relays(manager.pool(), cache.as_ref(), &config, &manager, &filters).await;

        // Two write relays, no read relays.
        assert_eq!(chosen.len(), 2);
        assert!(chosen
            .iter()
            .all(|url| !url.as_str().contains("read.example.com")));
    }

    #[tokio::test]
    async fn test_unknown_author_falls_back_to_connected_pool() {
        let cache = Arc::new(MemoryCache::new());
        let config = OutboxConfig::default();
        let manager = manager_with(cache.clone(), config.clone());
        manager.pool().add("wss://pool.example.com", false).unwrap();

        let filters = vec![Filter::new().author(Keys::generate().public_key())];
        let chosen =
            select_relays(manager.pool(), cache.as_ref(), &config, &manager, &filters).await;

        // Nothing connected, so all available relays are the fallback.
        assert_eq!(chosen, vec![RelayUrl::parse("wss://pool.example.com").unwrap()]);
    }

    #[tokio::test]
    async fn test_no_author_filter_uses_pool() {
        let cache = Arc::new(MemoryCache::new());
        let config = OutboxConfig::default();
        let manager = manager_with(cache.clone(), config.clone());
        manager.pool().add("wss://pool.example.com", false).unwrap();

        let filters = vec![Filter::new().kind(Kind(1))];
        let chosen =
            select_relays(manager.pool(), cache.as_ref(), &config, &manager, &filters).await;
        assert_eq!(chosen.len(), 1);
    }

    #[tokio::test]
    async fn test_outbox_disabled_ignores_relay_lists() {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keys::generate();
        cache
            .store(&relay_list_event(
                &keys,
                &[("wss://write1.example.com", Some("write"))],
            ))
            .await
            .unwrap();

        let config = OutboxConfig {
            enabled: false,
            ..OutboxConfig::default()
        };
        let manager = manager_with(cache.clone(), config.clone());
        manager.pool().add("wss://pool.example.com", false).unwrap();

        let filters = vec![Filter::new().author(keys.public_key())];
        let chosen =
            select_relays(manager.pool(), cache.as_ref(), &config, &manager, &filters).await;
        assert_eq!(chosen, vec![RelayUrl::parse("wss://pool.example.com").unwrap()]);
    }
}
