//! Event publishing with per-relay confirmation.
//!
//! `EVENT` goes out to every target relay; `OK` responses are collected
//! until the deadline. The publish call resolves as soon as one relay
//! accepts, and keeps aggregating the rest in the background for callers
//! that await the full outcome.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::event::{Event, EventId, UnsignedEvent};
use crate::message::MachineReadablePrefix;
use crate::pool::RelayPool;
use crate::relay::PublishStatus;
use crate::signer::{SignerCell, SignerError};
use crate::types::RelayUrl;

pub const DEFAULT_PUBLISH_DEADLINE: Duration = Duration::from_secs(10);

/// Idle eviction for relays joined only to publish one event.
const PUBLISH_RELAY_IDLE: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum PublishError {
    /// The event was unsigned and no signer is installed.
    #[error("no signer installed")]
    NoSigner,
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    /// Neither the caller nor the pool provided any target relay.
    #[error("no relays available to publish to")]
    NoRelaysAvailable,
    /// Every target relay rejected, timed out, or dropped the event.
    #[error("no relay accepted the event")]
    NoRelayAccepted(Box<PublishOutcome>),
}

/// Why a relay refused an event. The machine-readable prefix is parsed off
/// the relay's reason when one is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub message: String,
    pub prefix: Option<MachineReadablePrefix>,
}

impl Rejection {
    fn synthetic(message: &str) -> Self {
        Self {
            message: message.to_string(),
            prefix: None,
        }
    }
}

/// Aggregated per-relay publish results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Relays that confirmed with `OK(id, true, _)`.
    pub accepted: BTreeSet<RelayUrl>,
    /// Relays that refused, with their reason. Relays that dropped the
    /// connection before confirming land here too.
    pub rejected: BTreeMap<RelayUrl, Rejection>,
    /// Relays that never answered before the deadline.
    pub timed_out: BTreeSet<RelayUrl>,
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        !self.accepted.is_empty()
    }

    fn record(&mut self, relay_url: RelayUrl, status: PublishStatus) {
        match status {
            PublishStatus::Accepted { .. } => {
                self.accepted.insert(relay_url);
            }
            PublishStatus::Rejected { message, prefix } => {
                self.rejected.insert(relay_url, Rejection { message, prefix });
            }
            PublishStatus::TimedOut => {
                self.timed_out.insert(relay_url);
            }
            PublishStatus::Disconnected => {
                self.rejected.insert(
                    relay_url,
                    Rejection::synthetic("connection closed before confirmation"),
                );
            }
            PublishStatus::Cancelled => {
                self.rejected
                    .insert(relay_url, Rejection::synthetic("cancelled"));
            }
        }
    }
}

/// A publish in flight. The initiating call already saw the first
/// acceptance; this handle resolves the rest.
#[derive(Debug)]
pub struct PublishHandle {
    pub event_id: EventId,
    /// The first relay that accepted.
    pub first_accepted: RelayUrl,
    outcome_rx: oneshot::Receiver<PublishOutcome>,
}

impl PublishHandle {
    /// Await the full per-relay outcome (bounded by the publish deadline).
    pub async fn outcome(self) -> PublishOutcome {
        self.outcome_rx.await.unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Publisher {
    pool: RelayPool,
    signer: SignerCell,
    deadline: Duration,
}

impl Publisher {
    pub fn new(pool: RelayPool, signer: SignerCell, deadline: Duration) -> Self {
        Self {
            pool,
            signer,
            deadline,
        }
    }

    /// Sign with the active signer, then publish. Refuses with
    /// [`PublishError::NoSigner`] when no signer is installed.
    pub async fn sign_and_publish(
        &self,
        unsigned: UnsignedEvent,
        relays: Option<Vec<RelayUrl>>,
    ) -> Result<PublishHandle, PublishError> {
        let signer = self
            .signer
            .read()
            .await
            .clone()
            .ok_or(PublishError::NoSigner)?;
        let event = signer.sign_event(unsigned).await?;
        self.publish(event, relays).await
    }

    /// Publish a signed event with the configured deadline.
    ///
    /// Resolves `Ok` as soon as one relay accepts; collection continues in
    /// the background until the deadline and the returned handle exposes
    /// the aggregate. Resolves `Err(NoRelayAccepted)` when every relay has
    /// answered (or the deadline passed) without a single acceptance.
    pub async fn publish(
        &self,
        event: Event,
        relays: Option<Vec<RelayUrl>>,
    ) -> Result<PublishHandle, PublishError> {
        self.publish_with_deadline(event, relays, self.deadline).await
    }

    /// Publish with an explicit per-call deadline.
    pub async fn publish_with_deadline(
        &self,
        event: Event,
        relays: Option<Vec<RelayUrl>>,
        deadline: Duration,
    ) -> Result<PublishHandle, PublishError> {
        let targets = self.targets(relays)?;
        let event_id = event.id;

        tracing::debug!(
            target: "driftnet::publisher::publish",
            "Publishing {} to {} relay(s)",
            event_id,
            targets.len()
        );

        let (result_tx, result_rx) = mpsc::channel(targets.len());
        for url in &targets {
            let relay = match self.pool.relay(url) {
                Some(relay) => relay,
                None => match self.pool.temporary(url.as_str(), PUBLISH_RELAY_IDLE) {
                    Ok(relay) => relay,
                    Err(e) => {
                        tracing::warn!(
                            target: "driftnet::publisher::publish",
                            "Skipping relay {}: {}",
                            url,
                            e
                        );
                        continue;
                    }
                },
            };
            relay.connect();
            self.pool.touch(url);

            let url = url.clone();
            let event = event.clone();
            let result_tx = result_tx.clone();
            tokio::spawn(async move {
                let status = relay.publish(&event, deadline).await;
                let _ = result_tx.send((url, status)).await;
            });
        }
        drop(result_tx);

        let (first_tx, first_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(aggregate(result_rx, first_tx, outcome_tx));

        match first_rx.await {
            Ok(first_accepted) => Ok(PublishHandle {
                event_id,
                first_accepted,
                outcome_rx,
            }),
            Err(_) => {
                let outcome = outcome_rx.await.unwrap_or_default();
                Err(PublishError::NoRelayAccepted(Box::new(outcome)))
            }
        }
    }

    fn targets(&self, relays: Option<Vec<RelayUrl>>) -> Result<Vec<RelayUrl>, PublishError> {
        let targets = match relays {
            Some(relays) if !relays.is_empty() => relays,
            Some(_) | None => {
                let connected = self.pool.connected_urls();
                if connected.is_empty() {
                    self.pool.urls()
                } else {
                    connected
                }
            }
        };
        if targets.is_empty() {
            return Err(PublishError::NoRelaysAvailable);
        }
        Ok(targets)
    }
}

/// Collects per-relay results; signals the first acceptance immediately and
/// the aggregate once every relay has reported.
async fn aggregate(
    mut result_rx: mpsc::Receiver<(RelayUrl, PublishStatus)>,
    first_tx: oneshot::Sender<RelayUrl>,
    outcome_tx: oneshot::Sender<PublishOutcome>,
) {
    let mut outcome = PublishOutcome::default();
    let mut first_tx = Some(first_tx);
    while let Some((relay_url, status)) = result_rx.recv().await {
        let is_accept = matches!(status, PublishStatus::Accepted { .. });
        outcome.record(relay_url.clone(), status);
        if is_accept {
            if let Some(tx) = first_tx.take() {
                let _ = tx.send(relay_url);
            }
        }
    }
    // Dropping an unfired first_tx tells the caller no relay accepted.
    drop(first_tx);
    let _ = outcome_tx.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Kind, Timestamp};
    use crate::keys::Keys;
    use crate::signer::{LocalSigner, SharedSigner};
    use std::sync::Arc;

    fn unsigned(keys: &Keys) -> UnsignedEvent {
        UnsignedEvent::new(
            keys.public_key(),
            Timestamp::from_secs(1700000000),
            Kind::TEXT_NOTE,
            vec![],
            "hello",
        )
    }

    #[tokio::test]
    async fn test_publish_without_relays_refused() {
        let pool = RelayPool::new(SignerCell::default());
        let publisher = Publisher::new(pool, SignerCell::default(), Duration::from_secs(1));
        let keys = Keys::generate();
        let event = keys.sign_event(unsigned(&keys));
        assert!(matches!(
            publisher.publish(event, None).await,
            Err(PublishError::NoRelaysAvailable)
        ));
    }

    #[tokio::test]
    async fn test_sign_and_publish_without_signer_refused() {
        let pool = RelayPool::new(SignerCell::default());
        let publisher = Publisher::new(pool, SignerCell::default(), Duration::from_secs(1));
        let keys = Keys::generate();
        assert!(matches!(
            publisher.sign_and_publish(unsigned(&keys), None).await,
            Err(PublishError::NoSigner)
        ));
    }

    #[tokio::test]
    async fn test_sign_and_publish_signs_with_active_signer() {
        let pool = RelayPool::new(SignerCell::default());
        let signer_cell = SignerCell::default();
        let signer: SharedSigner = Arc::new(LocalSigner::generate());
        *signer_cell.write().await = Some(signer);

        let publisher = Publisher::new(pool, signer_cell, Duration::from_secs(1));
        let keys = Keys::generate();
        // Signing succeeds, but there are no relays: the error proves we got
        // past the signer stage.
        assert!(matches!(
            publisher.sign_and_publish(unsigned(&keys), None).await,
            Err(PublishError::NoRelaysAvailable)
        ));
    }

    #[tokio::test]
    async fn test_outcome_record_classification() {
        let url = |s: &str| RelayUrl::parse(s).unwrap();
        let mut outcome = PublishOutcome::default();
        outcome.record(
            url("wss://a.example.com"),
            PublishStatus::Accepted {
                message: String::new(),
            },
        );
        outcome.record(
            url("wss://b.example.com"),
            PublishStatus::Rejected {
                message: "blocked: spam".into(),
                prefix: MachineReadablePrefix::parse("blocked: spam"),
            },
        );
        outcome.record(url("wss://c.example.com"), PublishStatus::TimedOut);
        outcome.record(url("wss://d.example.com"), PublishStatus::Disconnected);

        assert!(outcome.is_success());
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.timed_out.len(), 1);
        let rejection = outcome.rejected.get(&url("wss://b.example.com")).unwrap();
        assert_eq!(rejection.message, "blocked: spam");
        assert_eq!(rejection.prefix, Some(MachineReadablePrefix::Blocked));
        let disconnected = outcome.rejected.get(&url("wss://d.example.com")).unwrap();
        assert!(disconnected.prefix.is_none());
    }

    #[tokio::test]
    async fn test_aggregate_signals_first_accept_then_outcome() {
        let (result_tx, result_rx) = mpsc::channel(4);
        let (first_tx, first_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(aggregate(result_rx, first_tx, outcome_tx));

        let a = RelayUrl::parse("wss://a.example.com").unwrap();
        let b = RelayUrl::parse("wss://b.example.com").unwrap();
        result_tx
            .send((
                a.clone(),
                PublishStatus::Rejected {
                    message: "no".into(),
                    prefix: None,
                },
            ))
            .await
            .unwrap();
        result_tx
            .send((b.clone(), PublishStatus::Accepted { message: String::new() }))
            .await
            .unwrap();
        drop(result_tx);

        assert_eq!(first_rx.await.unwrap(), b);
        let outcome = outcome_rx.await.unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_without_accept_drops_first_signal() {
        let (result_tx, result_rx) = mpsc::channel(4);
        let (first_tx, first_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(aggregate(result_rx, first_tx, outcome_tx));

        let a = RelayUrl::parse("wss://a.example.com").unwrap();
        result_tx.send((a, PublishStatus::TimedOut)).await.unwrap();
        drop(result_tx);

        assert!(first_rx.await.is_err());
        let outcome = outcome_rx.await.unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.timed_out.len(), 1);
    }
}
