//! User profiles, contact lists, and relay lists as reactive values.
//!
//! A [`UserHandle`] exposes the current kind-0 profile as a watch cell:
//! whenever a newer profile event arrives from any source (a subscription,
//! a fetch, another user of the same pool) the cell updates. Contacts
//! (kind 3) and relay lists (kind 10002) resolve the same way.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::event::{Event, Kind, PublicKey};
use crate::filter::Filter;
use crate::pool::RelayPoolNotification;
use crate::subscription::outbox::{RelayListEntry, relay_list_entries};
use crate::subscription::{SubscribeOptions, SubscriptionManager};

/// Parsed kind-0 profile content. Unknown fields are ignored, everything
/// is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub picture: Option<String>,
    pub banner: Option<String>,
    pub nip05: Option<String>,
    pub lud06: Option<String>,
    pub lud16: Option<String>,
    pub website: Option<String>,
}

impl Metadata {
    /// Best-effort parse of a kind-0 `content` string. Malformed JSON
    /// yields an empty metadata rather than an error: profiles are
    /// advisory data.
    pub fn from_json(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_default()
    }
}

type Cell = watch::Sender<Option<Event>>;

#[derive(Debug)]
struct InnerResolver {
    manager: SubscriptionManager,
    cells: DashMap<(Kind, PublicKey), Cell>,
    fetch_timeout: Duration,
}

/// Lazily resolves per-user replaceable events (profile, contacts, relay
/// list) and keeps them fresh from the live event stream.
#[derive(Debug, Clone)]
pub struct UserResolver {
    inner: Arc<InnerResolver>,
}

impl UserResolver {
    pub fn new(manager: SubscriptionManager, fetch_timeout: Duration) -> Self {
        let resolver = Self {
            inner: Arc::new(InnerResolver {
                manager,
                cells: DashMap::new(),
                fetch_timeout,
            }),
        };
        tokio::spawn(resolver.clone().watch_events());
        resolver
    }

    pub fn user(&self, public_key: PublicKey) -> UserHandle {
        UserHandle {
            public_key,
            resolver: self.clone(),
        }
    }

    /// The watch cell for one `(kind, pubkey)` slot, created (and seeded
    /// from the cache) on first use.
    async fn cell(&self, kind: Kind, public_key: PublicKey) -> watch::Receiver<Option<Event>> {
        if let Some(cell) = self.inner.cells.get(&(kind, public_key)) {
            return cell.subscribe();
        }
        let seed = self
            .inner
            .manager
            .cache()
            .get_by_dedup(&format!("{}:{}", kind, public_key))
            .await
            .unwrap_or_default();
        let (tx, _rx) = watch::channel(seed);
        // A racing creator may have beaten us; subscribe to whichever
        // sender actually lives in the map.
        self.inner
            .cells
            .entry((kind, public_key))
            .or_insert(tx)
            .subscribe()
    }

    fn update_cell(&self, event: &Event) {
        let key = (event.kind, event.pubkey);
        let Some(cell) = self.inner.cells.get(&key) else {
            return;
        };
        let newer = match cell.borrow().as_ref() {
            Some(current) => event.created_at > current.created_at,
            None => true,
        };
        if newer {
            cell.send_replace(Some(event.clone()));
        }
    }

    /// Keeps live cells fresh from the pool's event stream.
    async fn watch_events(self) {
        let mut notifications = self.inner.manager.pool().notifications();
        loop {
            match notifications.recv().await {
                Ok(RelayPoolNotification::Event { event, .. }) => {
                    if matches!(
                        event.kind,
                        Kind::METADATA | Kind::CONTACT_LIST | Kind::RELAY_LIST
                    ) {
                        self.update_cell(&event);
                    }
                }
                Ok(RelayPoolNotification::Shutdown) => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Short-lived subscription for one replaceable event: resolves on the
    /// first event, EOSE, or the fetch timeout, whichever comes first.
    async fn fetch_replaceable(&self, kind: Kind, public_key: PublicKey) -> Option<Event> {
        let filter = Filter::new().author(public_key).kind(kind).limit(1);
        let mut subscription = self
            .inner
            .manager
            .subscribe(
                vec![filter],
                SubscribeOptions {
                    relays: None,
                    close_on_eose: true,
                },
            )
            .await;

        let received =
            tokio::time::timeout(self.inner.fetch_timeout, subscription.recv()).await;
        subscription.close().await;
        match received {
            Ok(Some(event)) => Some(event),
            _ => {
                // Fall back to whatever the fetch put in the cache.
                self.inner
                    .manager
                    .cache()
                    .get_by_dedup(&format!("{}:{}", kind, public_key))
                    .await
                    .unwrap_or_default()
            }
        }
    }
}

/// A handle on one user's replaceable state.
#[derive(Debug, Clone)]
pub struct UserHandle {
    public_key: PublicKey,
    resolver: UserResolver,
}

impl UserHandle {
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// The current profile, if any source has produced one yet.
    pub async fn profile(&self) -> Option<Metadata> {
        let rx = self
            .resolver
            .cell(Kind::METADATA, self.public_key)
            .await;
        let event = rx.borrow().clone();
        event.map(|event| Metadata::from_json(&event.content))
    }

    /// Observable kind-0 slot; changes whenever a newer profile arrives.
    pub async fn profile_watch(&self) -> watch::Receiver<Option<Event>> {
        self.resolver.cell(Kind::METADATA, self.public_key).await
    }

    /// Fetch the profile from the network now (`{authors, kinds:[0],
    /// limit:1}`, closed on first event or EOSE).
    pub async fn fetch_profile(&self) -> Option<Metadata> {
        self.resolver
            .fetch_replaceable(Kind::METADATA, self.public_key)
            .await
            .map(|event| Metadata::from_json(&event.content))
    }

    /// `display_name`, else `name`, else a truncated hex prefix.
    pub async fn best_name(&self) -> String {
        if let Some(metadata) = self.profile().await {
            if let Some(display_name) = metadata.display_name.filter(|n| !n.is_empty()) {
                return display_name;
            }
            if let Some(name) = metadata.name.filter(|n| !n.is_empty()) {
                return name;
            }
        }
        let hex = self.public_key.to_hex();
        format!("{}…", &hex[..8])
    }

    /// The pubkeys this user follows (kind-3 `p` tags).
    pub async fn contacts(&self) -> Vec<PublicKey> {
        let rx = self
            .resolver
            .cell(Kind::CONTACT_LIST, self.public_key)
            .await;
        let event = rx.borrow().clone();
        event.map(|event| contact_pubkeys(&event)).unwrap_or_default()
    }

    pub async fn contacts_watch(&self) -> watch::Receiver<Option<Event>> {
        self.resolver.cell(Kind::CONTACT_LIST, self.public_key).await
    }

    pub async fn fetch_contacts(&self) -> Vec<PublicKey> {
        self.resolver
            .fetch_replaceable(Kind::CONTACT_LIST, self.public_key)
            .await
            .map(|event| contact_pubkeys(&event))
            .unwrap_or_default()
    }

    /// The user's declared relays (kind-10002 `r` tags).
    pub async fn relay_list(&self) -> Vec<RelayListEntry> {
        let rx = self
            .resolver
            .cell(Kind::RELAY_LIST, self.public_key)
            .await;
        let event = rx.borrow().clone();
        event
            .map(|event| relay_list_entries(&event))
            .unwrap_or_default()
    }

    pub async fn relay_list_watch(&self) -> watch::Receiver<Option<Event>> {
        self.resolver.cell(Kind::RELAY_LIST, self.public_key).await
    }

    pub async fn fetch_relay_list(&self) -> Vec<RelayListEntry> {
        self.resolver
            .fetch_replaceable(Kind::RELAY_LIST, self.public_key)
            .await
            .map(|event| relay_list_entries(&event))
            .unwrap_or_default()
    }
}

/// Extract followed pubkeys from a kind-3 event. Invalid entries are
/// skipped.
pub fn contact_pubkeys(event: &Event) -> Vec<PublicKey> {
    event
        .tags
        .iter()
        .filter(|tag| tag.name() == "p")
        .filter_map(|tag| PublicKey::from_hex(tag.content()?).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheAdapter, MemoryCache};
    use crate::event::{Tag, Timestamp, UnsignedEvent};
    use crate::keys::Keys;
    use crate::pool::RelayPool;
    use crate::signer::SignerCell;
    use crate::subscription::outbox::OutboxConfig;

    fn test_resolver(cache: Arc<MemoryCache>) -> UserResolver {
        let manager = SubscriptionManager::new(
            RelayPool::new(SignerCell::default()),
            cache,
            OutboxConfig::default(),
        );
        UserResolver::new(manager, Duration::from_millis(100))
    }

    fn profile_event(keys: &Keys, created_at: u64, name: &str) -> Event {
        keys.sign_event(UnsignedEvent::new(
            keys.public_key(),
            Timestamp::from_secs(created_at),
            Kind::METADATA,
            vec![],
            format!(r#"{{"name":"{}"}}"#, name),
        ))
    }

    #[test]
    fn test_metadata_parses_known_fields_only() {
        let metadata = Metadata::from_json(
            r#"{"name":"fiatjaf","display_name":"Fiatjaf","nip05":"_@fiatjaf.com","unknown":42}"#,
        );
        assert_eq!(metadata.name.as_deref(), Some("fiatjaf"));
        assert_eq!(metadata.display_name.as_deref(), Some("Fiatjaf"));
        assert_eq!(metadata.nip05.as_deref(), Some("_@fiatjaf.com"));
        assert!(metadata.about.is_none());
    }

    #[test]
    fn test_metadata_tolerates_garbage() {
        assert_eq!(Metadata::from_json("not json"), Metadata::default());
        assert_eq!(Metadata::from_json(""), Metadata::default());
    }

    #[tokio::test]
    async fn test_profile_seeded_from_cache() {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keys::generate();
        cache
            .store(&profile_event(&keys, 100, "alice"))
            .await
            .unwrap();

        let resolver = test_resolver(cache);
        let user = resolver.user(keys.public_key());
        let profile = user.profile().await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("alice"));
        assert_eq!(user.best_name().await, "alice");
    }

    #[tokio::test]
    async fn test_best_name_prefers_display_name_then_falls_back_to_hex() {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keys::generate();
        let resolver = test_resolver(cache);

        let unknown = resolver.user(keys.public_key());
        let fallback = unknown.best_name().await;
        assert!(fallback.starts_with(&keys.public_key().to_hex()[..8]));

        let with_display = keys.sign_event(UnsignedEvent::new(
            keys.public_key(),
            Timestamp::from_secs(10),
            Kind::METADATA,
            vec![],
            r#"{"name":"alice","display_name":"Alice in Chains"}"#,
        ));
        resolver
            .inner
            .manager
            .cache()
            .store(&with_display)
            .await
            .unwrap();
        // New handle so the cell seeds from the updated cache.
        let user = resolver.user(keys.public_key());
        assert_eq!(user.best_name().await, "Alice in Chains");
    }

    #[tokio::test]
    async fn test_newer_profile_updates_live_cell() {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keys::generate();
        cache.store(&profile_event(&keys, 100, "old")).await.unwrap();

        let resolver = test_resolver(cache);
        let user = resolver.user(keys.public_key());
        let mut cell = user.profile_watch().await;
        assert!(cell.borrow().is_some());

        resolver.update_cell(&profile_event(&keys, 200, "new"));
        cell.changed().await.unwrap();
        let profile = user.profile().await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("new"));

        // Older event does not regress the cell.
        resolver.update_cell(&profile_event(&keys, 150, "stale"));
        let profile = user.profile().await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_contacts_from_cached_kind3() {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keys::generate();
        let friend_a = Keys::generate().public_key();
        let friend_b = Keys::generate().public_key();
        let contact_list = keys.sign_event(UnsignedEvent::new(
            keys.public_key(),
            Timestamp::from_secs(50),
            Kind::CONTACT_LIST,
            vec![
                Tag::public_key(friend_a.to_hex()),
                Tag::public_key(friend_b.to_hex()),
                Tag::custom("p", ["not-hex"]),
            ],
            "",
        ));
        cache.store(&contact_list).await.unwrap();

        let resolver = test_resolver(cache);
        let contacts = resolver.user(keys.public_key()).contacts().await;
        assert_eq!(contacts, vec![friend_a, friend_b]);
    }

    #[tokio::test]
    async fn test_fetch_profile_times_out_to_cache_fallback() {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keys::generate();
        cache
            .store(&profile_event(&keys, 100, "cached"))
            .await
            .unwrap();

        let resolver = test_resolver(cache);
        let user = resolver.user(keys.public_key());
        // No relays are reachable; recv() yields the cache-primed event
        // immediately, so the fetch resolves with it.
        let profile = user.fetch_profile().await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("cached"));
    }
}
