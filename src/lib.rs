//! Driftnet: a Nostr relay-pool engine.
//!
//! The [`Driftnet`] facade ties together the relay pool, the subscription
//! manager, the publisher, the cache, and the active signer. Multiple
//! facades may coexist in one process; nothing here is global except the
//! tracing bootstrap.

pub use crate::error::{DriftnetError, Result};
pub use crate::event::{
    Event, EventError, EventId, Kind, PublicKey, Signature, Tag, Timestamp, UnsignedEvent,
};
pub use crate::filter::Filter;
pub use crate::keys::Keys;
pub use crate::message::MachineReadablePrefix;
pub use crate::profile::{Metadata, UserHandle, UserResolver};
pub use crate::publisher::{PublishError, PublishHandle, PublishOutcome, Rejection};
pub use crate::relay::{Relay, RelayInformationDocument, RelayStatsSnapshot, RelayStatus};
pub use crate::signer::{LocalSigner, NostrSigner, SharedSigner, SignerError};
pub use crate::subscription::{
    RelayClosedReason, SubscribeOptions, Subscription, SubscriptionCloseReason,
    SubscriptionLifecycle,
};
pub use crate::types::{RelayUrl, SubscriptionId};

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::sync::{broadcast, watch};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

use crate::cache::{CacheAdapter, MemoryCache};
use crate::pool::{RelayPool, RelayPoolNotification};
use crate::publisher::{DEFAULT_PUBLISH_DEADLINE, Publisher};
use crate::signer::SignerCell;
use crate::subscription::SubscriptionManager;
use crate::subscription::outbox::OutboxConfig;

pub mod cache;
pub mod error;
pub mod event;
pub mod filter;
pub mod keys;
pub mod message;
pub mod nip19;
pub mod parser;
pub mod pool;
pub mod profile;
pub mod publisher;
pub mod relay;
pub mod signer;
pub mod subscription;
pub mod types;

static TRACING_GUARD: OnceCell<Option<WorkerGuard>> = OnceCell::new();

fn init_tracing(logs_dir: Option<&std::path::Path>) {
    TRACING_GUARD.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        match logs_dir {
            Some(logs_dir) => {
                let file_appender = tracing_appender::rolling::daily(logs_dir, "driftnet.log");
                let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
                let file_layer = Layer::new().with_writer(non_blocking_file).with_ansi(false);
                let stdout_layer = Layer::new().with_ansi(true);
                let _ = Registry::default()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer)
                    .try_init();
                Some(guard)
            }
            None => {
                let _ = Registry::default()
                    .with(env_filter)
                    .with(Layer::new().with_ansi(true))
                    .try_init();
                None
            }
        }
    });
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DriftnetConfig {
    /// Relays joined (and connected) at startup.
    pub default_relays: Vec<String>,
    /// Small relay set used only to look up kind-10002 relay lists for
    /// authors the outbox model has not seen yet.
    pub discovery_relays: Vec<String>,
    /// Route author-constrained queries to the authors' write relays.
    pub outbox_enabled: bool,
    /// Write relays taken per author during outbox selection.
    pub relay_goal_per_author: usize,
    /// Deadline for collecting per-relay `OK` confirmations.
    pub publish_deadline: Duration,
    /// Deadline for one-shot profile/contact/relay-list fetches.
    pub fetch_timeout: Duration,
    /// When set, tracing also writes daily-rotated files here.
    pub logs_dir: Option<PathBuf>,
}

impl Default for DriftnetConfig {
    fn default() -> Self {
        let mut default_relays = vec![];
        let mut discovery_relays = vec![];
        if cfg!(debug_assertions) {
            default_relays.push("ws://localhost:8080".to_string());
            default_relays.push("ws://localhost:7777".to_string());
            discovery_relays.push("wss://purplepag.es".to_string());
        } else {
            default_relays.push("wss://relay.damus.io".to_string());
            default_relays.push("wss://relay.primal.net".to_string());
            default_relays.push("wss://nos.lol".to_string());
            discovery_relays.push("wss://purplepag.es".to_string());
            discovery_relays.push("wss://indexer.coracle.social".to_string());
        }

        Self {
            default_relays,
            discovery_relays,
            outbox_enabled: true,
            relay_goal_per_author: 2,
            publish_deadline: DEFAULT_PUBLISH_DEADLINE,
            fetch_timeout: Duration::from_secs(10),
            logs_dir: None,
        }
    }
}

/// The engine facade: subscribe, publish, connect, resolve users.
#[derive(Clone)]
pub struct Driftnet {
    pub config: DriftnetConfig,
    pool: RelayPool,
    cache: Arc<dyn CacheAdapter>,
    subscriptions: SubscriptionManager,
    publisher: Publisher,
    resolver: UserResolver,
    signer: SignerCell,
    current_user: watch::Sender<Option<PublicKey>>,
}

impl Driftnet {
    /// Build a fully wired engine with the in-memory cache.
    pub async fn initialize(config: DriftnetConfig) -> Result<Self> {
        Self::initialize_with_cache(config, Arc::new(MemoryCache::new())).await
    }

    /// Build the engine on a caller-provided cache backend.
    pub async fn initialize_with_cache(
        config: DriftnetConfig,
        cache: Arc<dyn CacheAdapter>,
    ) -> Result<Self> {
        if let Some(logs_dir) = &config.logs_dir {
            std::fs::create_dir_all(logs_dir)?;
        }
        init_tracing(config.logs_dir.as_deref());

        let signer: SignerCell = SignerCell::default();
        let pool = RelayPool::new(signer.clone());

        let discovery_relays = config
            .discovery_relays
            .iter()
            .filter_map(|url| RelayUrl::parse(url).ok())
            .collect();
        let outbox = OutboxConfig {
            enabled: config.outbox_enabled,
            discovery_relays,
            relay_goal_per_author: config.relay_goal_per_author,
        };

        let subscriptions = SubscriptionManager::new(pool.clone(), cache.clone(), outbox);
        let publisher = Publisher::new(pool.clone(), signer.clone(), config.publish_deadline);
        let resolver = UserResolver::new(subscriptions.clone(), config.fetch_timeout);

        for url in &config.default_relays {
            if let Err(e) = pool.add(url, true) {
                tracing::warn!(
                    target: "driftnet::initialize",
                    "Skipping default relay {}: {}",
                    url,
                    e
                );
            }
        }

        let (current_user, _) = watch::channel(None);

        Ok(Self {
            config,
            pool,
            cache,
            subscriptions,
            publisher,
            resolver,
            signer,
            current_user,
        })
    }

    // -- relays -----------------------------------------------------------

    /// Add a relay to the pool (idempotent) and start connecting it.
    pub fn add_relay(&self, url: &str) -> Result<Relay> {
        Ok(self.pool.add(url, true)?)
    }

    /// Add a relay that is evicted after `idle` of no activity.
    pub fn temporary_relay(&self, url: &str, idle: Duration) -> Result<Relay> {
        Ok(self.pool.temporary(url, idle)?)
    }

    /// Remove a relay; terminates its subscriptions and pending work.
    pub fn remove_relay(&self, url: &str) -> Result<()> {
        Ok(self.pool.remove(url)?)
    }

    pub fn relay(&self, url: &str) -> Option<Relay> {
        self.pool.get(url)
    }

    pub fn relays(&self) -> Vec<RelayUrl> {
        self.pool.urls()
    }

    pub fn connected_relays(&self) -> Vec<RelayUrl> {
        self.pool.connected_urls()
    }

    /// Observable set of relays in the pool.
    pub fn relays_watch(&self) -> watch::Receiver<BTreeSet<RelayUrl>> {
        self.pool.available_watch()
    }

    /// Observable subset of currently connected relays.
    pub fn connected_relays_watch(&self) -> watch::Receiver<BTreeSet<RelayUrl>> {
        self.pool.connected_watch()
    }

    /// Ask every relay in the pool to connect.
    pub fn connect(&self) {
        self.pool.connect();
    }

    /// The pool's notification stream (events, EOSE, notices, lifecycle).
    pub fn notifications(&self) -> broadcast::Receiver<RelayPoolNotification> {
        self.pool.notifications()
    }

    // -- subscriptions ----------------------------------------------------

    /// Subscribe with automatic relay selection (outbox model when the
    /// filters constrain authors).
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Subscription {
        self.subscriptions
            .subscribe(filters, SubscribeOptions::default())
            .await
    }

    /// Subscribe with explicit options.
    pub async fn subscribe_with(
        &self,
        filters: Vec<Filter>,
        options: SubscribeOptions,
    ) -> Subscription {
        self.subscriptions.subscribe(filters, options).await
    }

    // -- publishing -------------------------------------------------------

    /// Sign an unsigned event with the active signer and publish it to the
    /// connected pool relays.
    pub async fn publish(
        &self,
        unsigned: UnsignedEvent,
    ) -> core::result::Result<PublishHandle, PublishError> {
        self.publisher.sign_and_publish(unsigned, None).await
    }

    /// Publish an already signed event.
    pub async fn publish_event(
        &self,
        event: Event,
    ) -> core::result::Result<PublishHandle, PublishError> {
        self.publisher.publish(event, None).await
    }

    /// Publish an already signed event to an explicit relay set.
    pub async fn publish_event_to(
        &self,
        event: Event,
        relays: Vec<RelayUrl>,
    ) -> core::result::Result<PublishHandle, PublishError> {
        self.publisher.publish(event, Some(relays)).await
    }

    // -- signer & current user -------------------------------------------

    /// Install the active signer. The current-user cell follows it.
    pub async fn set_signer(&self, signer: SharedSigner) -> Result<PublicKey> {
        let public_key = signer.public_key().await?;
        *self.signer.write().await = Some(signer);
        self.current_user.send_replace(Some(public_key));
        tracing::debug!(
            target: "driftnet::set_signer",
            "Active signer set to {}",
            public_key
        );
        Ok(public_key)
    }

    pub async fn unset_signer(&self) {
        *self.signer.write().await = None;
        self.current_user.send_replace(None);
    }

    pub async fn has_signer(&self) -> bool {
        self.signer.read().await.is_some()
    }

    /// The active signer's public key, if one is installed.
    pub fn current_user(&self) -> Option<PublicKey> {
        *self.current_user.borrow()
    }

    /// Observable current-user cell.
    pub fn current_user_watch(&self) -> watch::Receiver<Option<PublicKey>> {
        self.current_user.subscribe()
    }

    // -- users & cache ----------------------------------------------------

    /// A handle on one user's profile/contacts/relay-list state. Accepts
    /// hex or `npub`.
    pub fn user(&self, public_key: &str) -> Result<UserHandle> {
        let public_key = PublicKey::parse(public_key)?;
        Ok(self.resolver.user(public_key))
    }

    pub fn user_by_key(&self, public_key: PublicKey) -> UserHandle {
        self.resolver.user(public_key)
    }

    pub fn cache(&self) -> &Arc<dyn CacheAdapter> {
        &self.cache
    }

    // -- lifecycle --------------------------------------------------------

    /// Close every subscription, disconnect every relay, and emit the
    /// terminal notification.
    pub async fn shutdown(&self) {
        tracing::debug!(target: "driftnet::shutdown", "Shutting down engine");
        self.subscriptions.close_all().await;
        self.pool.shutdown();
    }
}

impl std::fmt::Debug for Driftnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driftnet")
            .field("config", &self.config)
            .field("relays", &self.pool.len())
            .field("subscriptions", &self.subscriptions.active_count())
            .field("signer", &"<REDACTED>")
            .finish()
    }
}
