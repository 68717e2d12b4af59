//! A single relay connection: WebSocket lifecycle, the NIP-01 message
//! codec, reconnection with flap detection, publish confirmation, and
//! trust-based verification sampling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use futures::{Sink, SinkExt, StreamExt};
use dashmap::DashMap;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::event::{Event, EventId, Kind, Tag, Timestamp, UnsignedEvent};
use crate::filter::Filter;
use crate::message::{ClientMessage, MachineReadablePrefix, MessageError, RelayMessage};
use crate::pool::RelayPoolNotification;
use crate::signer::SignerCell;
use crate::types::{RelayUrl, SubscriptionId};

pub mod limits;
pub mod sampler;
pub mod stats;

pub use limits::{Limitation, Nip11Client, Nip11Error, RelayInformationDocument};
pub use sampler::VerificationSampler;
pub use stats::{RelayStats, RelayStatsSnapshot};

/// Ceiling for the exponential reconnect backoff, and the fixed backoff
/// while flapping.
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// A connection that stays up for less than this is a flap.
const FLAP_THRESHOLD: Duration = Duration::from_secs(1);
/// Consecutive flaps before the relay enters the `Flapping` state.
const FLAP_LIMIT: u32 = 3;
/// A connection that stays up for longer than this clears the flap counter.
const HEALTHY_THRESHOLD: Duration = Duration::from_secs(60);
/// Idle time before we ping the relay ourselves.
const IDLE_PING: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The connection driver is gone; the relay was removed or the engine
    /// shut down.
    #[error("relay has shut down")]
    Shutdown,
}

/// Connection state of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayStatus {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Reconnecting,
    Flapping,
}

impl RelayStatus {
    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Authenticating | Self::Authenticated
        )
    }
}

/// The per-relay outcome of publishing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    /// The relay sent `OK(id, true, _)`.
    Accepted { message: String },
    /// The relay sent `OK(id, false, reason)`. The machine-readable prefix
    /// is parsed off the reason when the relay supplied one.
    Rejected {
        message: String,
        prefix: Option<MachineReadablePrefix>,
    },
    /// No `OK` arrived before the deadline.
    TimedOut,
    /// The socket closed while the confirmation was pending.
    Disconnected,
    /// The relay was disconnected or removed by the caller.
    Cancelled,
}

/// Why a connection attempt or session ended. Internal to the driver.
#[derive(Debug)]
enum CloseReason {
    /// `disconnect()` was called or the relay was dropped.
    Local,
    /// The relay closed the socket or the stream ended.
    Remote,
    /// Read or write error on the socket.
    Io(String),
    /// Malformed JSON or wrong message arity from the relay.
    Protocol(String),
    /// The relay stopped answering pings.
    PingTimeout,
}

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub(crate) struct InnerRelay {
    url: RelayUrl,
    status_tx: watch::Sender<RelayStatus>,
    desired_tx: watch::Sender<bool>,
    out_tx: mpsc::UnboundedSender<ClientMessage>,
    subscriptions: DashMap<SubscriptionId, Vec<Filter>>,
    ok_pending: DashMap<EventId, oneshot::Sender<PublishStatus>>,
    count_pending: DashMap<SubscriptionId, oneshot::Sender<u64>>,
    pub(crate) stats: RelayStats,
    sampler: VerificationSampler,
    signer: SignerCell,
    notifications: broadcast::Sender<RelayPoolNotification>,
    nip11: Arc<Nip11Client>,
    flap_count: AtomicU32,
    auth_pending: std::sync::Mutex<Option<EventId>>,
    auth_challenge: std::sync::Mutex<Option<String>>,
}

/// A handle to one relay connection. Cheap to clone; all clones drive the
/// same underlying connection.
#[derive(Debug, Clone)]
pub struct Relay {
    inner: Arc<InnerRelay>,
}

impl Relay {
    pub(crate) fn new(
        url: RelayUrl,
        signer: SignerCell,
        notifications: broadcast::Sender<RelayPoolNotification>,
        nip11: Arc<Nip11Client>,
    ) -> Self {
        let (status_tx, _) = watch::channel(RelayStatus::Disconnected);
        let (desired_tx, _) = watch::channel(false);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(InnerRelay {
            url,
            status_tx,
            desired_tx,
            out_tx,
            subscriptions: DashMap::new(),
            ok_pending: DashMap::new(),
            count_pending: DashMap::new(),
            stats: RelayStats::default(),
            sampler: VerificationSampler::new(),
            signer,
            notifications,
            nip11,
            flap_count: AtomicU32::new(0),
            auth_pending: std::sync::Mutex::new(None),
            auth_challenge: std::sync::Mutex::new(None),
        });

        tokio::spawn(InnerRelay::driver(inner.clone(), out_rx));

        Self { inner }
    }

    pub fn url(&self) -> &RelayUrl {
        &self.inner.url
    }

    pub fn status(&self) -> RelayStatus {
        *self.inner.status_tx.borrow()
    }

    /// A watch on state transitions, for callers that track relay health.
    pub fn status_watch(&self) -> watch::Receiver<RelayStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Ask the driver to open (and keep open) the connection.
    pub fn connect(&self) {
        self.inner.desired_tx.send_replace(true);
    }

    /// Close the connection and stay closed. Pending publish confirmations
    /// complete with [`PublishStatus::Cancelled`].
    pub fn disconnect(&self) {
        self.inner.desired_tx.send_replace(false);
        self.inner.drain_pending(PublishStatus::Cancelled);
    }

    /// Wait until the socket is open, up to `timeout`.
    pub async fn wait_for_connected(&self, timeout: Duration) -> bool {
        let mut status_rx = self.inner.status_tx.subscribe();
        if status_rx.borrow().is_connected() {
            return true;
        }
        tokio::time::timeout(timeout, async {
            while status_rx.changed().await.is_ok() {
                if status_rx.borrow().is_connected() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    /// Open a subscription on this relay. The filters are remembered and
    /// resubmitted after every reconnect until [`Relay::unsubscribe`].
    pub fn subscribe(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
    ) -> Result<(), RelayError> {
        self.inner.subscriptions.insert(id.clone(), filters.clone());
        self.inner.send(ClientMessage::Req {
            subscription_id: id,
            filters,
        })
    }

    /// Close a subscription on this relay.
    pub fn unsubscribe(&self, id: &SubscriptionId) {
        if self.inner.subscriptions.remove(id).is_some() {
            let _ = self.inner.send(ClientMessage::Close(id.clone()));
        }
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.inner
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub(crate) fn has_activity(&self) -> bool {
        !self.inner.subscriptions.is_empty() || !self.inner.ok_pending.is_empty()
    }

    /// Send `["EVENT", …]` and wait for the matching `OK`, the deadline, or
    /// a disconnect, whichever comes first.
    pub async fn publish(&self, event: &Event, deadline: Duration) -> PublishStatus {
        let (tx, rx) = oneshot::channel();
        self.inner.ok_pending.insert(event.id, tx);
        if self
            .inner
            .send(ClientMessage::Event(Box::new(event.clone())))
            .is_err()
        {
            self.inner.ok_pending.remove(&event.id);
            return PublishStatus::Cancelled;
        }
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => PublishStatus::Cancelled,
            Err(_) => {
                self.inner.ok_pending.remove(&event.id);
                PublishStatus::TimedOut
            }
        }
    }

    /// `["COUNT", …]` round-trip (NIP-45). `None` when the relay does not
    /// answer before the deadline.
    pub async fn count(&self, filters: Vec<Filter>, deadline: Duration) -> Option<u64> {
        let id = SubscriptionId::generate();
        let (tx, rx) = oneshot::channel();
        self.inner.count_pending.insert(id.clone(), tx);
        if self
            .inner
            .send(ClientMessage::Count {
                subscription_id: id.clone(),
                filters,
            })
            .is_err()
        {
            self.inner.count_pending.remove(&id);
            return None;
        }
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(count)) => Some(count),
            _ => {
                self.inner.count_pending.remove(&id);
                None
            }
        }
    }

    /// An event on this relay surfaced first here. Kept by the
    /// subscription router, which is the layer that knows dedup outcomes.
    pub(crate) fn record_unique_event(&self) {
        self.inner.stats.unique_events.fetch_add(1, Ordering::Relaxed);
    }

    /// An event on this relay had already been surfaced by another relay.
    pub(crate) fn record_duplicate_event(&self) {
        self.inner
            .stats
            .duplicate_events
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.inner
            .stats
            .snapshot(self.inner.subscriptions.len(), self.inner.sampler.rate())
    }

    pub fn sampling_rate(&self) -> f64 {
        self.inner.sampler.rate()
    }

    /// Fetch (or return the cached) NIP-11 information document.
    pub async fn information_document(&self) -> Result<RelayInformationDocument, Nip11Error> {
        self.inner.nip11.fetch(&self.inner.url).await
    }

    /// The most recent NIP-42 challenge this relay issued, if any. Kept so
    /// a signer installed after the challenge can still authenticate.
    pub fn last_auth_challenge(&self) -> Option<String> {
        self.inner
            .auth_challenge
            .lock()
            .expect("auth lock poisoned")
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn sampler(&self) -> &VerificationSampler {
        &self.inner.sampler
    }
}

impl InnerRelay {
    fn set_status(&self, status: RelayStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!(
                target: "driftnet::relay::status",
                "{}: {:?} -> {:?}",
                self.url,
                previous,
                status
            );
        }
    }

    fn notify(&self, notification: RelayPoolNotification) {
        // Lagging or absent receivers are not our problem here.
        let _ = self.notifications.send(notification);
    }

    fn send(&self, message: ClientMessage) -> Result<(), RelayError> {
        self.out_tx.send(message).map_err(|_| RelayError::Shutdown)
    }

    fn drain_pending(&self, status: PublishStatus) {
        let ids: Vec<EventId> = self.ok_pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.ok_pending.remove(&id) {
                let _ = tx.send(status.clone());
            }
        }
        self.count_pending.clear();
    }

    /// The connection driver: one task per relay, owning the socket for its
    /// whole lifetime. Reconnects with exponential backoff and flap
    /// detection until the relay is dropped.
    async fn driver(self: Arc<Self>, mut out_rx: mpsc::UnboundedReceiver<ClientMessage>) {
        let mut desired_rx = self.desired_tx.subscribe();
        loop {
            while !*desired_rx.borrow_and_update() {
                self.set_status(RelayStatus::Disconnected);
                if desired_rx.changed().await.is_err() {
                    return;
                }
            }

            self.stats.connection_attempts.fetch_add(1, Ordering::Relaxed);
            self.set_status(RelayStatus::Connecting);

            match connect_async(self.url.as_str()).await {
                Ok((socket, _response)) => {
                    self.stats.connection_attempts.store(0, Ordering::Relaxed);
                    self.stats.record_connected();
                    self.set_status(RelayStatus::Connected);
                    self.notify(RelayPoolNotification::RelayConnected {
                        relay_url: self.url.clone(),
                    });
                    self.resubscribe();

                    let started = Instant::now();
                    let reason = self.run(socket, &mut out_rx).await;
                    let lifetime = started.elapsed();

                    tracing::debug!(
                        target: "driftnet::relay::driver",
                        "{} closed after {:?}: {:?}",
                        self.url,
                        lifetime,
                        reason
                    );

                    self.drain_pending(PublishStatus::Disconnected);
                    self.notify(RelayPoolNotification::RelayDisconnected {
                        relay_url: self.url.clone(),
                    });

                    if lifetime < FLAP_THRESHOLD {
                        self.flap_count.fetch_add(1, Ordering::Relaxed);
                    } else if lifetime > HEALTHY_THRESHOLD {
                        self.flap_count.store(0, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: "driftnet::relay::driver",
                        "{}: connection failed: {}",
                        self.url,
                        e
                    );
                }
            }

            if !*desired_rx.borrow_and_update() {
                continue;
            }

            let delay = if self.flap_count.load(Ordering::Relaxed) >= FLAP_LIMIT {
                self.set_status(RelayStatus::Flapping);
                MAX_BACKOFF
            } else {
                self.set_status(RelayStatus::Reconnecting);
                let attempts = self.stats.connection_attempts.load(Ordering::Relaxed);
                backoff_delay(attempts as u32)
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = desired_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Resend `REQ` for every subscription still active on this relay.
    fn resubscribe(&self) {
        for entry in self.subscriptions.iter() {
            let _ = self.send(ClientMessage::Req {
                subscription_id: entry.key().clone(),
                filters: entry.value().clone(),
            });
        }
    }

    /// One connected session. Returns why the session ended.
    async fn run(
        self: &Arc<Self>,
        socket: WsConnection,
        out_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    ) -> CloseReason {
        let (mut sink, mut stream) = socket.split();
        let mut desired_rx = self.desired_tx.subscribe();
        let mut ping_timer = tokio::time::interval(IDLE_PING);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.reset();
        let mut awaiting_pong = false;
        // EVENT/REQ sends are held back while a NIP-42 handshake is pending.
        let mut held_back: VecDeque<ClientMessage> = VecDeque::new();

        loop {
            let paused = matches!(*self.status_tx.borrow(), RelayStatus::Authenticating);
            if !paused {
                while let Some(message) = held_back.pop_front() {
                    if let Err(e) = self.write(&mut sink, message).await {
                        return e;
                    }
                }
            }

            tokio::select! {
                changed = desired_rx.changed() => {
                    if changed.is_err() || !*desired_rx.borrow() {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return CloseReason::Local;
                    }
                }
                outgoing = out_rx.recv() => {
                    match outgoing {
                        Some(message) if paused => held_back.push_back(message),
                        Some(message) => {
                            if let Err(e) = self.write(&mut sink, message).await {
                                return e;
                            }
                        }
                        None => {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            return CloseReason::Local;
                        }
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            ping_timer.reset();
                            self.stats.record_message_in(text.len());
                            if let Some(reason) = self.handle_text(&text, &mut sink).await {
                                return reason;
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if sink.send(WsMessage::Pong(payload)).await.is_err() {
                                return CloseReason::Io("pong send failed".into());
                            }
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            awaiting_pong = false;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return CloseReason::Remote;
                        }
                        Some(Ok(_)) => {
                            // Binary and raw frames are not part of the protocol.
                        }
                        Some(Err(e)) => {
                            return CloseReason::Io(e.to_string());
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    if awaiting_pong {
                        return CloseReason::PingTimeout;
                    }
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        return CloseReason::Io("ping send failed".into());
                    }
                    awaiting_pong = true;
                }
            }
        }
    }

    async fn write(
        &self,
        sink: &mut (impl Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
        message: ClientMessage,
    ) -> Result<(), CloseReason> {
        let text = message.as_json();
        self.stats.record_message_out(text.len());
        sink.send(WsMessage::Text(text))
            .await
            .map_err(|e| CloseReason::Io(e.to_string()))
    }

    /// Handle one text frame. `Some(reason)` closes the connection.
    async fn handle_text(
        self: &Arc<Self>,
        text: &str,
        sink: &mut (impl Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ) -> Option<CloseReason> {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(MessageError::UnknownType(message_type)) => {
                tracing::debug!(
                    target: "driftnet::relay::handle_text",
                    "{}: dropping unknown message type {}",
                    self.url,
                    message_type
                );
                return None;
            }
            Err(MessageError::MalformedEvent(e)) => {
                tracing::warn!(
                    target: "driftnet::relay::handle_text",
                    "{}: dropping malformed event: {}",
                    self.url,
                    e
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    target: "driftnet::relay::handle_text",
                    "{}: protocol error: {}",
                    self.url,
                    e
                );
                return Some(CloseReason::Protocol(e.to_string()));
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                self.stats.events_in.fetch_add(1, Ordering::Relaxed);
                if !self.subscriptions.contains_key(&subscription_id) {
                    // Late straggler for a subscription this relay already
                    // terminated: dropped.
                    tracing::trace!(
                        target: "driftnet::relay::handle_text",
                        "{}: event for inactive subscription {}",
                        self.url,
                        subscription_id
                    );
                    return None;
                }
                if self.sampler.should_verify() {
                    let to_verify = (*event).clone();
                    let verified =
                        tokio::task::spawn_blocking(move || to_verify.verify()).await;
                    match verified {
                        Ok(Ok(())) => {
                            self.stats.validated_events.fetch_add(1, Ordering::Relaxed);
                            self.sampler.record_success();
                        }
                        Ok(Err(e)) => {
                            self.sampler.record_failure();
                            tracing::warn!(
                                target: "driftnet::relay::handle_text",
                                "{}: dropping event {}: {}",
                                self.url,
                                event.id,
                                e
                            );
                            self.notify(RelayPoolNotification::RelayMisbehaving {
                                relay_url: self.url.clone(),
                                reason: e.to_string(),
                            });
                            return None;
                        }
                        Err(join_error) => {
                            tracing::error!(
                                target: "driftnet::relay::handle_text",
                                "verification task failed: {}",
                                join_error
                            );
                            return None;
                        }
                    }
                } else {
                    self.stats
                        .non_validated_events
                        .fetch_add(1, Ordering::Relaxed);
                }
                self.notify(RelayPoolNotification::Event {
                    relay_url: self.url.clone(),
                    subscription_id,
                    event,
                });
            }
            RelayMessage::EndOfStoredEvents(subscription_id) => {
                self.stats.eose_count.fetch_add(1, Ordering::Relaxed);
                self.notify(RelayPoolNotification::EndOfStoredEvents {
                    relay_url: self.url.clone(),
                    subscription_id,
                });
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                let auth_pending = *self.auth_pending.lock().expect("auth lock poisoned");
                if auth_pending == Some(event_id) {
                    *self.auth_pending.lock().expect("auth lock poisoned") = None;
                    if accepted {
                        self.set_status(RelayStatus::Authenticated);
                    } else {
                        tracing::warn!(
                            target: "driftnet::relay::handle_text",
                            "{}: auth rejected: {}",
                            self.url,
                            message
                        );
                        self.set_status(RelayStatus::Connected);
                    }
                    return None;
                }
                match self.ok_pending.remove(&event_id) {
                    Some((_, tx)) => {
                        let status = if accepted {
                            PublishStatus::Accepted { message }
                        } else {
                            PublishStatus::Rejected {
                                prefix: MachineReadablePrefix::parse(&message),
                                message,
                            }
                        };
                        let _ = tx.send(status);
                    }
                    None => {
                        // Either a duplicate OK or one past its deadline.
                        tracing::debug!(
                            target: "driftnet::relay::handle_text",
                            "{}: unsolicited OK for {}",
                            self.url,
                            event_id
                        );
                    }
                }
            }
            RelayMessage::Notice(message) => {
                tracing::debug!(
                    target: "driftnet::relay::handle_text",
                    "{}: NOTICE {}",
                    self.url,
                    message
                );
                self.notify(RelayPoolNotification::Notice {
                    relay_url: self.url.clone(),
                    message,
                });
            }
            RelayMessage::Auth { challenge } => {
                *self.auth_challenge.lock().expect("auth lock poisoned") =
                    Some(challenge.clone());
                if let Some(reason) = self.answer_auth_challenge(&challenge, sink).await {
                    return Some(reason);
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                self.subscriptions.remove(&subscription_id);
                self.notify(RelayPoolNotification::SubscriptionClosed {
                    relay_url: self.url.clone(),
                    subscription_id,
                    message,
                });
            }
            RelayMessage::Count {
                subscription_id,
                count,
            } => {
                if let Some((_, tx)) = self.count_pending.remove(&subscription_id) {
                    let _ = tx.send(count);
                }
            }
        }
        None
    }

    /// Answer a NIP-42 challenge with a signed kind-22242 event. Without a
    /// signer the challenge is remembered and the connection stays as it is.
    async fn answer_auth_challenge(
        &self,
        challenge: &str,
        sink: &mut (impl Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ) -> Option<CloseReason> {
        let signer = self.signer.read().await.clone();
        let Some(signer) = signer else {
            tracing::debug!(
                target: "driftnet::relay::auth",
                "{}: auth challenge received with no signer installed",
                self.url
            );
            return None;
        };
        let public_key = match signer.public_key().await {
            Ok(public_key) => public_key,
            Err(e) => {
                tracing::warn!(target: "driftnet::relay::auth", "{}: {}", self.url, e);
                return None;
            }
        };
        let unsigned = UnsignedEvent::new(
            public_key,
            Timestamp::now(),
            Kind::AUTH,
            vec![
                Tag::custom("relay", [self.url.to_string()]),
                Tag::custom("challenge", [challenge.to_string()]),
            ],
            "",
        );
        let event = match signer.sign_event(unsigned).await {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(target: "driftnet::relay::auth", "{}: signing failed: {}", self.url, e);
                return None;
            }
        };
        *self.auth_pending.lock().expect("auth lock poisoned") = Some(event.id);
        self.set_status(RelayStatus::Authenticating);

        let text = ClientMessage::Auth(Box::new(event)).as_json();
        self.stats.record_message_out(text.len());
        if let Err(e) = sink.send(WsMessage::Text(text)).await {
            return Some(CloseReason::Io(e.to_string()));
        }
        None
    }
}

fn backoff_delay(attempts: u32) -> Duration {
    let exp = attempts.min(6); // 2^6 = 64 s, already past the ceiling
    Duration::from_secs(1u64 << exp).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(32));
        assert_eq!(backoff_delay(6), Duration::from_secs(60));
        assert_eq!(backoff_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_status_connected_classes() {
        assert!(RelayStatus::Connected.is_connected());
        assert!(RelayStatus::Authenticating.is_connected());
        assert!(RelayStatus::Authenticated.is_connected());
        assert!(!RelayStatus::Reconnecting.is_connected());
        assert!(!RelayStatus::Flapping.is_connected());
        assert!(!RelayStatus::Disconnected.is_connected());
    }
}
