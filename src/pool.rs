//! The relay pool: owns every relay connection, keyed by normalised URL.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::event::Event;
use crate::relay::{Nip11Client, Relay};
use crate::signer::SignerCell;
use crate::types::{RelayUrl, RelayUrlError, SubscriptionId};

/// Capacity of the pool notification broadcast channel. A consumer that
/// lags beyond this loses the oldest notifications.
const NOTIFICATION_CAPACITY: usize = 4096;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid relay url: {0}")]
    Url(#[from] RelayUrlError),
    #[error("relay not found: {0}")]
    NotFound(RelayUrl),
    #[error("the pool has shut down")]
    Shutdown,
}

/// Everything the engine learns from its relays, fanned out on one
/// broadcast channel. The subscription manager's router consumes this
/// stream; callers may subscribe too.
#[derive(Debug, Clone)]
pub enum RelayPoolNotification {
    /// An event admitted by the relay's verification sampler.
    Event {
        relay_url: RelayUrl,
        subscription_id: SubscriptionId,
        event: Box<Event>,
    },
    /// The relay flushed its stored backlog for a subscription.
    EndOfStoredEvents {
        relay_url: RelayUrl,
        subscription_id: SubscriptionId,
    },
    /// The relay terminated a subscription (`CLOSED`).
    SubscriptionClosed {
        relay_url: RelayUrl,
        subscription_id: SubscriptionId,
        message: String,
    },
    /// A human-readable `NOTICE` from the relay.
    Notice { relay_url: RelayUrl, message: String },
    RelayAdded { relay_url: RelayUrl },
    RelayRemoved { relay_url: RelayUrl },
    RelayConnected { relay_url: RelayUrl },
    RelayDisconnected { relay_url: RelayUrl },
    /// An event from this relay failed signature verification.
    RelayMisbehaving { relay_url: RelayUrl, reason: String },
    /// The pool is shutting down; no further notifications follow.
    Shutdown,
}

#[derive(Debug)]
struct PoolSlot {
    relay: Relay,
    /// Set for temporary relays: evicted after this much inactivity.
    idle_timeout: Option<Duration>,
    last_touch: std::sync::Mutex<Instant>,
}

#[derive(Debug)]
struct InnerPool {
    relays: DashMap<RelayUrl, Arc<PoolSlot>>,
    notifications: broadcast::Sender<RelayPoolNotification>,
    available_tx: watch::Sender<BTreeSet<RelayUrl>>,
    connected_tx: watch::Sender<BTreeSet<RelayUrl>>,
    signer: SignerCell,
    nip11: Arc<Nip11Client>,
}

/// The set of relay connections, keyed by normalised URL.
///
/// `add` is idempotent: adding a URL that normalises to an existing relay
/// returns the existing instance.
#[derive(Debug, Clone)]
pub struct RelayPool {
    inner: Arc<InnerPool>,
}

impl RelayPool {
    pub fn new(signer: SignerCell) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (available_tx, _) = watch::channel(BTreeSet::new());
        let (connected_tx, _) = watch::channel(BTreeSet::new());
        let pool = Self {
            inner: Arc::new(InnerPool {
                relays: DashMap::new(),
                notifications,
                available_tx,
                connected_tx,
                signer,
                nip11: Arc::new(Nip11Client::default()),
            }),
        };
        tokio::spawn(pool.clone().track_connected());
        pool
    }

    /// A fresh receiver on the pool notification stream.
    pub fn notifications(&self) -> broadcast::Receiver<RelayPoolNotification> {
        self.inner.notifications.subscribe()
    }

    pub(crate) fn notification_sender(&self) -> broadcast::Sender<RelayPoolNotification> {
        self.inner.notifications.clone()
    }

    /// Add a relay (idempotent) and optionally start connecting it.
    pub fn add(&self, url: &str, connect: bool) -> Result<Relay, PoolError> {
        let url = RelayUrl::parse(url)?;
        let slot = self.slot(url.clone(), None);
        if connect {
            slot.relay.connect();
        }
        Ok(slot.relay.clone())
    }

    /// Add a relay that is evicted automatically after `idle` of no active
    /// subscriptions or publishes. Touching it resets the timer. Adding an
    /// already-present permanent relay leaves it permanent.
    pub fn temporary(&self, url: &str, idle: Duration) -> Result<Relay, PoolError> {
        let url = RelayUrl::parse(url)?;
        let is_new = !self.inner.relays.contains_key(&url);
        let slot = self.slot(url.clone(), Some(idle));
        slot.relay.connect();
        if is_new && slot.idle_timeout.is_some() {
            tokio::spawn(self.clone().evict_when_idle(url));
        }
        Ok(slot.relay.clone())
    }

    fn slot(&self, url: RelayUrl, idle_timeout: Option<Duration>) -> Arc<PoolSlot> {
        use dashmap::mapref::entry::Entry;

        match self.inner.relays.entry(url.clone()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let relay = Relay::new(
                    url.clone(),
                    self.inner.signer.clone(),
                    self.inner.notifications.clone(),
                    self.inner.nip11.clone(),
                );
                let slot = Arc::new(PoolSlot {
                    relay,
                    idle_timeout,
                    last_touch: std::sync::Mutex::new(Instant::now()),
                });
                vacant.insert(slot.clone());
                tracing::debug!(target: "driftnet::pool::add", "Added relay {}", url);
                self.refresh_available();
                let _ = self
                    .inner
                    .notifications
                    .send(RelayPoolNotification::RelayAdded { relay_url: url });
                slot
            }
        }
    }

    /// Remove a relay: closes it, cancels its pending work, and forgets it.
    pub fn remove(&self, url: &str) -> Result<(), PoolError> {
        let url = RelayUrl::parse(url)?;
        let Some((_, slot)) = self.inner.relays.remove(&url) else {
            return Err(PoolError::NotFound(url));
        };
        slot.relay.disconnect();
        self.refresh_available();
        let _ = self
            .inner
            .notifications
            .send(RelayPoolNotification::RelayRemoved { relay_url: url });
        Ok(())
    }

    /// Look up a relay by (any spelling of) its URL.
    pub fn get(&self, url: &str) -> Option<Relay> {
        let url = RelayUrl::parse(url).ok()?;
        self.relay(&url)
    }

    pub fn relay(&self, url: &RelayUrl) -> Option<Relay> {
        self.inner
            .relays
            .get(url)
            .map(|slot| slot.relay.clone())
    }

    /// Reset a temporary relay's idle clock. No-op for permanent relays.
    pub(crate) fn touch(&self, url: &RelayUrl) {
        if let Some(slot) = self.inner.relays.get(url) {
            *slot.last_touch.lock().expect("touch lock poisoned") = Instant::now();
        }
    }

    /// All relays in the pool.
    pub fn urls(&self) -> Vec<RelayUrl> {
        self.inner
            .relays
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Relays whose socket is currently open.
    pub fn connected_urls(&self) -> Vec<RelayUrl> {
        self.inner
            .relays
            .iter()
            .filter(|entry| entry.relay.is_connected())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Observable set of every relay in the pool.
    pub fn available_watch(&self) -> watch::Receiver<BTreeSet<RelayUrl>> {
        self.inner.available_tx.subscribe()
    }

    /// Observable subset of relays that are currently connected.
    pub fn connected_watch(&self) -> watch::Receiver<BTreeSet<RelayUrl>> {
        self.inner.connected_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.relays.is_empty()
    }

    /// Ask every relay to connect.
    pub fn connect(&self) {
        for entry in self.inner.relays.iter() {
            entry.relay.connect();
        }
    }

    /// Disconnect every relay and emit the terminal notification.
    pub fn shutdown(&self) {
        for entry in self.inner.relays.iter() {
            entry.relay.disconnect();
        }
        let _ = self.inner.notifications.send(RelayPoolNotification::Shutdown);
    }

    fn refresh_available(&self) {
        let urls: BTreeSet<RelayUrl> = self
            .inner
            .relays
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        self.inner.available_tx.send_replace(urls);
    }

    fn refresh_connected(&self) {
        let urls: BTreeSet<RelayUrl> = self.connected_urls().into_iter().collect();
        self.inner.connected_tx.send_replace(urls);
    }

    /// Maintains the connected-relays watch from the notification stream.
    async fn track_connected(self) {
        let mut notifications = self.inner.notifications.subscribe();
        loop {
            match notifications.recv().await {
                Ok(RelayPoolNotification::RelayConnected { .. })
                | Ok(RelayPoolNotification::RelayDisconnected { .. })
                | Ok(RelayPoolNotification::RelayRemoved { .. }) => {
                    self.refresh_connected();
                }
                Ok(RelayPoolNotification::Shutdown) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => self.refresh_connected(),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Eviction loop for one temporary relay.
    async fn evict_when_idle(self, url: RelayUrl) {
        loop {
            let Some(slot) = self
                .inner
                .relays
                .get(&url)
                .map(|entry| entry.value().clone())
            else {
                return; // removed by other means
            };
            let Some(idle) = slot.idle_timeout else {
                return;
            };
            let last_touch = *slot.last_touch.lock().expect("touch lock poisoned");
            let deadline = last_touch + idle;
            let now = Instant::now();
            if now < deadline {
                tokio::time::sleep(deadline - now).await;
                continue;
            }
            if slot.relay.has_activity() {
                // Busy: re-arm from now.
                *slot.last_touch.lock().expect("touch lock poisoned") = Instant::now();
                continue;
            }
            tracing::debug!(
                target: "driftnet::pool::evict_when_idle",
                "Evicting idle temporary relay {}",
                url
            );
            let _ = self.remove(url.as_str());
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::SignerCell;

    fn test_pool() -> RelayPool {
        RelayPool::new(SignerCell::default())
    }

    #[tokio::test]
    async fn test_add_is_idempotent_across_spellings() {
        let pool = test_pool();
        let a = pool.add("Relay.Example.COM/", false).unwrap();
        let b = pool.add("wss://relay.example.com", false).unwrap();
        let c = pool.get("wss://relay.example.com/").unwrap();
        assert_eq!(a.url(), b.url());
        assert_eq!(b.url(), c.url());
        assert_eq!(pool.len(), 1);
        assert_eq!(*pool.available_watch().borrow(), {
            let mut set = BTreeSet::new();
            set.insert(RelayUrl::parse("wss://relay.example.com").unwrap());
            set
        });
    }

    #[tokio::test]
    async fn test_remove_unknown_is_an_error() {
        let pool = test_pool();
        assert!(matches!(
            pool.remove("wss://nowhere.example.com"),
            Err(PoolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_and_remove_emit_pool_events() {
        let pool = test_pool();
        let mut notifications = pool.notifications();
        pool.add("wss://relay.example.com", false).unwrap();
        pool.remove("wss://relay.example.com").unwrap();

        assert!(matches!(
            notifications.recv().await.unwrap(),
            RelayPoolNotification::RelayAdded { relay_url } if relay_url.as_str() == "wss://relay.example.com"
        ));
        assert!(matches!(
            notifications.recv().await.unwrap(),
            RelayPoolNotification::RelayRemoved { .. }
        ));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_temporary_relay_evicted_when_idle() {
        tokio::time::pause();
        let pool = test_pool();
        pool.temporary("wss://temp.example.com", Duration::from_millis(200))
            .unwrap();
        assert_eq!(pool.len(), 1);
        tokio::time::advance(Duration::from_millis(500)).await;
        // Give the eviction task a chance to run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn test_touch_defers_temporary_eviction() {
        tokio::time::pause();
        let pool = test_pool();
        let relay = pool
            .temporary("wss://temp.example.com", Duration::from_millis(300))
            .unwrap();
        let url = relay.url().clone();

        tokio::time::advance(Duration::from_millis(200)).await;
        pool.touch(&url);
        tokio::time::advance(Duration::from_millis(200)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // 400 ms elapsed but only 200 ms since the touch.
        assert_eq!(pool.len(), 1);

        tokio::time::advance(Duration::from_millis(300)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn test_permanent_relay_never_evicted() {
        tokio::time::pause();
        let pool = test_pool();
        pool.add("wss://keep.example.com", false).unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.len(), 1);
    }
}
