//! Logical subscriptions across relays: relay selection, `REQ` fan-out,
//! per-subscription deduplication, EOSE tracking, and closure.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use crate::cache::CacheAdapter;
use crate::event::{Event, EventId};
use crate::filter::Filter;
use crate::message::MachineReadablePrefix;
use crate::pool::{RelayPool, RelayPoolNotification};
use crate::types::{RelayUrl, SubscriptionId};

pub mod outbox;

/// Bounded capacity of each subscription's event stream. A consumer lagging
/// past this loses the oldest buffered events and `dropped_events` grows.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Idle eviction for relays added on demand by outbox routing.
const OUTBOX_RELAY_IDLE: Duration = Duration::from_secs(120);

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionLifecycle {
    /// Live on at least one relay that has not yet flushed its backlog.
    Active,
    /// Every active relay has either sent `EOSE` or terminated.
    Eosed,
    Closed,
}

/// A relay's `CLOSED` reason, with its machine-readable prefix when the
/// relay supplied one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayClosedReason {
    pub message: String,
    pub prefix: Option<MachineReadablePrefix>,
}

impl RelayClosedReason {
    fn new(message: String) -> Self {
        Self {
            prefix: MachineReadablePrefix::parse(&message),
            message,
        }
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCloseReason {
    /// The caller closed it.
    ClientClosed,
    /// Every chosen relay sent `CLOSED`; each relay's reason is carried.
    AllRelaysClosed(BTreeMap<RelayUrl, RelayClosedReason>),
    /// The engine shut down.
    Shutdown,
}

/// Options for [`SubscriptionManager::subscribe`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Explicit relay set, overriding outbox/connected selection.
    pub relays: Option<Vec<RelayUrl>>,
    /// Close the subscription as soon as it reaches `Eosed`.
    pub close_on_eose: bool,
}

#[derive(Debug)]
pub(crate) struct SubscriptionState {
    id: SubscriptionId,
    filters: Vec<Filter>,
    relays: std::sync::Mutex<HashSet<RelayUrl>>,
    seen: std::sync::Mutex<HashSet<EventId>>,
    eosed_relays: std::sync::Mutex<HashSet<RelayUrl>>,
    terminal_relays: std::sync::Mutex<HashMap<RelayUrl, RelayClosedReason>>,
    events_tx: std::sync::Mutex<Option<broadcast::Sender<Event>>>,
    lifecycle_tx: watch::Sender<SubscriptionLifecycle>,
    dropped_events: AtomicU64,
    closed: AtomicBool,
    close_on_eose: bool,
    close_reason: std::sync::Mutex<Option<SubscriptionCloseReason>>,
}

impl SubscriptionState {
    fn relay_set(&self) -> HashSet<RelayUrl> {
        self.relays.lock().expect("relays lock poisoned").clone()
    }

    /// Dedup guard: true when the id has not been seen on this
    /// subscription before.
    fn first_sighting(&self, id: EventId) -> bool {
        self.seen.lock().expect("seen lock poisoned").insert(id)
    }

    fn emit(&self, event: Event) {
        let guard = self.events_tx.lock().expect("events lock poisoned");
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Whether every chosen relay has EOSEd or terminated.
    fn all_settled(&self) -> bool {
        let relays = self.relays.lock().expect("relays lock poisoned");
        let eosed = self.eosed_relays.lock().expect("eose lock poisoned");
        let terminal = self.terminal_relays.lock().expect("terminal lock poisoned");
        !relays.is_empty()
            && relays
                .iter()
                .all(|url| eosed.contains(url) || terminal.contains_key(url))
    }

    fn all_terminal(&self) -> bool {
        let relays = self.relays.lock().expect("relays lock poisoned");
        let terminal = self.terminal_relays.lock().expect("terminal lock poisoned");
        !relays.is_empty() && relays.iter().all(|url| terminal.contains_key(url))
    }

    fn terminal_reasons(&self) -> BTreeMap<RelayUrl, RelayClosedReason> {
        self.terminal_relays
            .lock()
            .expect("terminal lock poisoned")
            .iter()
            .map(|(url, reason)| (url.clone(), reason.clone()))
            .collect()
    }
}

/// A live subscription handle. Dropping it does not close the subscription;
/// call [`Subscription::close`].
#[derive(Debug)]
pub struct Subscription {
    state: Arc<SubscriptionState>,
    receiver: broadcast::Receiver<Event>,
    manager: SubscriptionManager,
}

impl Subscription {
    pub fn id(&self) -> &SubscriptionId {
        &self.state.id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.state.filters
    }

    /// The relays this subscription was fanned out to.
    pub fn relays(&self) -> Vec<RelayUrl> {
        self.state.relay_set().into_iter().collect()
    }

    pub fn lifecycle(&self) -> SubscriptionLifecycle {
        *self.state.lifecycle_tx.borrow()
    }

    pub fn lifecycle_watch(&self) -> watch::Receiver<SubscriptionLifecycle> {
        self.state.lifecycle_tx.subscribe()
    }

    /// True once every active relay has EOSEd or terminated.
    pub fn eosed(&self) -> bool {
        matches!(self.lifecycle(), SubscriptionLifecycle::Eosed)
    }

    /// Events lost to backpressure on this subscription's stream.
    pub fn dropped_events(&self) -> u64 {
        self.state.dropped_events.load(Ordering::Relaxed)
    }

    pub fn close_reason(&self) -> Option<SubscriptionCloseReason> {
        self.state
            .close_reason
            .lock()
            .expect("reason lock poisoned")
            .clone()
    }

    /// Per-relay `CLOSED` reasons seen so far. Populated as relays
    /// terminate, even while other relays keep the subscription alive.
    pub fn relay_close_reasons(&self) -> BTreeMap<RelayUrl, RelayClosedReason> {
        self.state.terminal_reasons()
    }

    /// The next event, deduplicated across relays. `None` once the
    /// subscription is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if self.state.closed.load(Ordering::Acquire) {
                return None;
            }
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.state.dropped_events.fetch_add(count, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Close the subscription. Idempotent: the second close is
    /// indistinguishable from the first.
    pub async fn close(&self) {
        self.manager
            .close_with_reason(&self.state.id, SubscriptionCloseReason::ClientClosed)
            .await;
    }
}

#[derive(Debug)]
struct InnerManager {
    pool: RelayPool,
    cache: Arc<dyn CacheAdapter>,
    subscriptions: DashMap<SubscriptionId, Arc<SubscriptionState>>,
    outbox: outbox::OutboxConfig,
}

/// Creates subscriptions, routes relay traffic to them, and owns their
/// lifecycles. Subscriptions refer to relays by URL and relays refer to
/// subscriptions by id; this manager is the single owner of the states.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    inner: Arc<InnerManager>,
}

impl SubscriptionManager {
    pub fn new(pool: RelayPool, cache: Arc<dyn CacheAdapter>, outbox: outbox::OutboxConfig) -> Self {
        let manager = Self {
            inner: Arc::new(InnerManager {
                pool,
                cache,
                subscriptions: DashMap::new(),
                outbox,
            }),
        };
        tokio::spawn(manager.clone().route());
        manager
    }

    pub fn pool(&self) -> &RelayPool {
        &self.inner.pool
    }

    pub fn cache(&self) -> &Arc<dyn CacheAdapter> {
        &self.inner.cache
    }

    pub fn active_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Create a subscription: pick relays, prime from the cache, and fan
    /// out `REQ`.
    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        options: SubscribeOptions,
    ) -> Subscription {
        let relays = match &options.relays {
            Some(relays) => relays.clone(),
            None => {
                outbox::select_relays(
                    &self.inner.pool,
                    self.inner.cache.as_ref(),
                    &self.inner.outbox,
                    self,
                    &filters,
                )
                .await
            }
        };

        let mut id = SubscriptionId::generate();
        while self.inner.subscriptions.contains_key(&id) {
            id = SubscriptionId::generate();
        }

        let (events_tx, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (lifecycle_tx, _) = watch::channel(SubscriptionLifecycle::Active);
        let state = Arc::new(SubscriptionState {
            id: id.clone(),
            filters: filters.clone(),
            relays: std::sync::Mutex::new(relays.iter().cloned().collect()),
            seen: std::sync::Mutex::new(HashSet::new()),
            eosed_relays: std::sync::Mutex::new(HashSet::new()),
            terminal_relays: std::sync::Mutex::new(HashMap::new()),
            events_tx: std::sync::Mutex::new(Some(events_tx)),
            lifecycle_tx,
            dropped_events: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            close_on_eose: options.close_on_eose,
            close_reason: std::sync::Mutex::new(None),
        });
        self.inner.subscriptions.insert(id.clone(), state.clone());

        tracing::debug!(
            target: "driftnet::subscription::subscribe",
            "Subscription {} on {} relay(s)",
            id,
            relays.len()
        );

        // Cached results first, through the same dedup set, so callers see a
        // snapshot before network events arrive. Cache emits never set Eosed.
        self.prime_from_cache(&state).await;

        for url in &relays {
            let relay = match self.inner.pool.relay(url) {
                Some(relay) => relay,
                None => {
                    // Outbox-selected relay we are not persistently tracking:
                    // join it temporarily.
                    match self.inner.pool.temporary(url.as_str(), OUTBOX_RELAY_IDLE) {
                        Ok(relay) => relay,
                        Err(e) => {
                            tracing::warn!(
                                target: "driftnet::subscription::subscribe",
                                "Skipping relay {}: {}",
                                url,
                                e
                            );
                            continue;
                        }
                    }
                }
            };
            relay.connect();
            self.inner.pool.touch(url);
            let _ = relay.subscribe(id.clone(), filters.clone());
        }

        Subscription {
            state,
            receiver,
            manager: self.clone(),
        }
    }

    async fn prime_from_cache(&self, state: &Arc<SubscriptionState>) {
        for filter in &state.filters {
            match self.inner.cache.query(filter).await {
                Ok(events) => {
                    for event in events {
                        if state.first_sighting(event.id) {
                            state.emit(event);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: "driftnet::subscription::prime_from_cache",
                        "Cache query failed: {}",
                        e
                    );
                }
            }
        }
    }

    /// Close a subscription on behalf of the caller.
    pub async fn close(&self, id: &SubscriptionId) {
        self.close_with_reason(id, SubscriptionCloseReason::ClientClosed)
            .await;
    }

    async fn close_with_reason(&self, id: &SubscriptionId, reason: SubscriptionCloseReason) {
        let Some(state) = self
            .inner
            .subscriptions
            .get(id)
            .map(|entry| entry.value().clone())
        else {
            return;
        };
        if state.closed.swap(true, Ordering::AcqRel) {
            return; // second close: nothing left to do
        }
        *state
            .close_reason
            .lock()
            .expect("reason lock poisoned") = Some(reason);

        for url in state.relay_set() {
            if let Some(relay) = self.inner.pool.relay(&url) {
                relay.unsubscribe(id);
            }
        }

        // Dropping the sender completes the event stream.
        state
            .events_tx
            .lock()
            .expect("events lock poisoned")
            .take();
        state
            .lifecycle_tx
            .send_replace(SubscriptionLifecycle::Closed);
        self.inner.subscriptions.remove(id);

        tracing::debug!(
            target: "driftnet::subscription::close",
            "Subscription {} closed",
            id
        );
    }

    /// Close everything; used on engine shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<SubscriptionId> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.close_with_reason(&id, SubscriptionCloseReason::Shutdown)
                .await;
        }
    }

    /// The router: consumes the pool notification stream and feeds
    /// subscriptions.
    async fn route(self) {
        let mut notifications = self.inner.pool.notifications();
        loop {
            match notifications.recv().await {
                Ok(RelayPoolNotification::Event {
                    relay_url,
                    subscription_id,
                    event,
                }) => {
                    self.handle_event(relay_url, subscription_id, *event).await;
                }
                Ok(RelayPoolNotification::EndOfStoredEvents {
                    relay_url,
                    subscription_id,
                }) => {
                    self.handle_settled(&subscription_id, &relay_url, None).await;
                }
                Ok(RelayPoolNotification::SubscriptionClosed {
                    relay_url,
                    subscription_id,
                    message,
                }) => {
                    self.handle_settled(&subscription_id, &relay_url, Some(message))
                        .await;
                }
                Ok(RelayPoolNotification::RelayRemoved { relay_url }) => {
                    self.handle_relay_removed(&relay_url).await;
                }
                Ok(RelayPoolNotification::Shutdown) => {
                    self.close_all().await;
                    return;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!(
                        target: "driftnet::subscription::route",
                        "Router lagged, {} notification(s) lost",
                        count
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn handle_event(
        &self,
        relay_url: RelayUrl,
        subscription_id: SubscriptionId,
        event: Event,
    ) {
        let Some(state) = self
            .inner
            .subscriptions
            .get(&subscription_id)
            .map(|entry| entry.value().clone())
        else {
            // Late straggler after closure: dropped silently.
            return;
        };
        if state.closed.load(Ordering::Acquire) {
            return;
        }
        if !state
            .relays
            .lock()
            .expect("relays lock poisoned")
            .contains(&relay_url)
        {
            return;
        }

        let relay = self.inner.pool.relay(&relay_url);
        if state.first_sighting(event.id) {
            if let Some(relay) = &relay {
                relay.record_unique_event();
            }
            if let Err(e) = self.inner.cache.store(&event).await {
                tracing::warn!(
                    target: "driftnet::subscription::handle_event",
                    "Cache store failed for {}: {}",
                    event.id,
                    e
                );
            }
            self.inner.pool.touch(&relay_url);
            state.emit(event);
        } else if let Some(relay) = &relay {
            relay.record_duplicate_event();
        }
    }

    /// A relay finished (EOSE) or terminated (CLOSED) one subscription.
    async fn handle_settled(
        &self,
        subscription_id: &SubscriptionId,
        relay_url: &RelayUrl,
        closed_message: Option<String>,
    ) {
        let Some(state) = self
            .inner
            .subscriptions
            .get(subscription_id)
            .map(|entry| entry.value().clone())
        else {
            return;
        };

        match closed_message {
            None => {
                state
                    .eosed_relays
                    .lock()
                    .expect("eose lock poisoned")
                    .insert(relay_url.clone());
            }
            Some(message) => {
                tracing::debug!(
                    target: "driftnet::subscription::handle_settled",
                    "{} closed subscription {}: {}",
                    relay_url,
                    subscription_id,
                    message
                );
                state
                    .terminal_relays
                    .lock()
                    .expect("terminal lock poisoned")
                    .insert(relay_url.clone(), RelayClosedReason::new(message));
            }
        }

        if state.all_terminal() {
            let reasons = state.terminal_reasons();
            self.close_with_reason(
                subscription_id,
                SubscriptionCloseReason::AllRelaysClosed(reasons),
            )
            .await;
            return;
        }
        if state.all_settled() && !state.closed.load(Ordering::Acquire) {
            state
                .lifecycle_tx
                .send_replace(SubscriptionLifecycle::Eosed);
            if state.close_on_eose {
                self.close_with_reason(subscription_id, SubscriptionCloseReason::ClientClosed)
                    .await;
            }
        }
    }

    async fn handle_relay_removed(&self, relay_url: &RelayUrl) {
        let ids: Vec<SubscriptionId> = self
            .inner
            .subscriptions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .relays
                    .lock()
                    .expect("relays lock poisoned")
                    .contains(relay_url)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.handle_settled(&id, relay_url, Some("relay removed".to_string()))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::event::{Kind, Timestamp, UnsignedEvent};
    use crate::keys::Keys;
    use crate::signer::SignerCell;

    fn test_manager() -> SubscriptionManager {
        let pool = RelayPool::new(SignerCell::default());
        SubscriptionManager::new(
            pool,
            Arc::new(MemoryCache::new()),
            outbox::OutboxConfig::default(),
        )
    }

    fn note(keys: &Keys, created_at: u64, content: &str) -> Event {
        keys.sign_event(UnsignedEvent::new(
            keys.public_key(),
            Timestamp::from_secs(created_at),
            Kind::TEXT_NOTE,
            vec![],
            content,
        ))
    }

    #[tokio::test]
    async fn test_cache_priming_before_network() {
        let manager = test_manager();
        let keys = Keys::generate();
        let cached = note(&keys, 100, "from cache");
        manager.cache().store(&cached).await.unwrap();

        let mut subscription = manager
            .subscribe(
                vec![Filter::new().kind(Kind::TEXT_NOTE)],
                SubscribeOptions::default(),
            )
            .await;
        let event = subscription.recv().await.unwrap();
        assert_eq!(event, cached);
        // Cached emits never settle the subscription.
        assert_eq!(subscription.lifecycle(), SubscriptionLifecycle::Active);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_stream() {
        let manager = test_manager();
        let mut subscription = manager
            .subscribe(vec![Filter::new()], SubscribeOptions::default())
            .await;
        subscription.close().await;
        subscription.close().await;
        assert_eq!(subscription.lifecycle(), SubscriptionLifecycle::Closed);
        assert_eq!(
            subscription.close_reason(),
            Some(SubscriptionCloseReason::ClientClosed)
        );
        assert!(subscription.recv().await.is_none());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_router_dedups_across_relays() {
        let manager = test_manager();
        manager.pool().add("wss://a.example.com", false).unwrap();
        manager.pool().add("wss://b.example.com", false).unwrap();
        let relay_a = RelayUrl::parse("wss://a.example.com").unwrap();
        let relay_b = RelayUrl::parse("wss://b.example.com").unwrap();

        let mut subscription = manager
            .subscribe(
                vec![Filter::new()],
                SubscribeOptions {
                    relays: Some(vec![relay_a.clone(), relay_b.clone()]),
                    close_on_eose: false,
                },
            )
            .await;
        let id = subscription.id().clone();

        let keys = Keys::generate();
        let event = note(&keys, 100, "once");
        manager
            .handle_event(relay_a.clone(), id.clone(), event.clone())
            .await;
        manager
            .handle_event(relay_b.clone(), id.clone(), event.clone())
            .await;

        assert_eq!(subscription.recv().await.unwrap(), event);

        let stats_a = manager.pool().relay(&relay_a).unwrap().stats();
        let stats_b = manager.pool().relay(&relay_b).unwrap().stats();
        assert_eq!(stats_a.unique_events, 1);
        assert_eq!(stats_b.duplicate_events, 1);

        // And the event landed in the cache.
        let cached = manager.cache().get(&event.id).await.unwrap();
        assert_eq!(cached, Some(event));
    }

    #[tokio::test]
    async fn test_event_for_closed_subscription_dropped() {
        let manager = test_manager();
        manager.pool().add("wss://a.example.com", false).unwrap();
        let relay_a = RelayUrl::parse("wss://a.example.com").unwrap();

        let subscription = manager
            .subscribe(
                vec![Filter::new()],
                SubscribeOptions {
                    relays: Some(vec![relay_a.clone()]),
                    close_on_eose: false,
                },
            )
            .await;
        let id = subscription.id().clone();
        subscription.close().await;

        let keys = Keys::generate();
        let straggler = note(&keys, 100, "late");
        manager
            .handle_event(relay_a, id, straggler.clone())
            .await;

        // Dropped silently: never cached, no counters touched.
        assert_eq!(manager.cache().get(&straggler.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eose_from_every_relay_settles() {
        let manager = test_manager();
        manager.pool().add("wss://a.example.com", false).unwrap();
        manager.pool().add("wss://b.example.com", false).unwrap();
        let relay_a = RelayUrl::parse("wss://a.example.com").unwrap();
        let relay_b = RelayUrl::parse("wss://b.example.com").unwrap();

        let subscription = manager
            .subscribe(
                vec![Filter::new()],
                SubscribeOptions {
                    relays: Some(vec![relay_a.clone(), relay_b.clone()]),
                    close_on_eose: false,
                },
            )
            .await;
        let id = subscription.id().clone();

        manager.handle_settled(&id, &relay_a, None).await;
        assert!(!subscription.eosed());
        manager.handle_settled(&id, &relay_b, None).await;
        assert!(subscription.eosed());
    }

    #[tokio::test]
    async fn test_closed_from_every_relay_closes_subscription() {
        let manager = test_manager();
        manager.pool().add("wss://a.example.com", false).unwrap();
        let relay_a = RelayUrl::parse("wss://a.example.com").unwrap();

        let subscription = manager
            .subscribe(
                vec![Filter::new()],
                SubscribeOptions {
                    relays: Some(vec![relay_a.clone()]),
                    close_on_eose: false,
                },
            )
            .await;
        let id = subscription.id().clone();

        manager
            .handle_settled(&id, &relay_a, Some("auth-required: blocked".to_string()))
            .await;
        assert_eq!(subscription.lifecycle(), SubscriptionLifecycle::Closed);
        // The relay's reason survives on the close reason, prefix parsed.
        match subscription.close_reason() {
            Some(SubscriptionCloseReason::AllRelaysClosed(reasons)) => {
                let reason = reasons.get(&relay_a).unwrap();
                assert_eq!(reason.message, "auth-required: blocked");
                assert_eq!(reason.prefix, Some(MachineReadablePrefix::AuthRequired));
            }
            other => panic!("unexpected close reason: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mixed_eose_and_closed_settles_without_closing() {
        let manager = test_manager();
        manager.pool().add("wss://a.example.com", false).unwrap();
        manager.pool().add("wss://b.example.com", false).unwrap();
        let relay_a = RelayUrl::parse("wss://a.example.com").unwrap();
        let relay_b = RelayUrl::parse("wss://b.example.com").unwrap();

        let subscription = manager
            .subscribe(
                vec![Filter::new()],
                SubscribeOptions {
                    relays: Some(vec![relay_a.clone(), relay_b.clone()]),
                    close_on_eose: false,
                },
            )
            .await;
        let id = subscription.id().clone();

        manager.handle_settled(&id, &relay_a, None).await;
        manager
            .handle_settled(&id, &relay_b, Some("rate-limited: slow down".to_string()))
            .await;
        // One healthy relay remains: settled but still open, with the
        // terminated relay's reason already visible.
        assert_eq!(subscription.lifecycle(), SubscriptionLifecycle::Eosed);
        assert!(subscription.close_reason().is_none());
        let reasons = subscription.relay_close_reasons();
        assert!(!reasons.contains_key(&relay_a));
        let reason = reasons.get(&relay_b).unwrap();
        assert_eq!(reason.message, "rate-limited: slow down");
        assert_eq!(reason.prefix, Some(MachineReadablePrefix::RateLimited));
    }
}
