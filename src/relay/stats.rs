//! Per-relay traffic and verification counters.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::event::Timestamp;

#[derive(Debug, Default)]
pub struct RelayStats {
    pub(crate) messages_in: AtomicU64,
    pub(crate) messages_out: AtomicU64,
    pub(crate) bytes_in: AtomicU64,
    pub(crate) bytes_out: AtomicU64,
    pub(crate) events_in: AtomicU64,
    pub(crate) eose_count: AtomicU64,
    pub(crate) unique_events: AtomicU64,
    pub(crate) duplicate_events: AtomicU64,
    pub(crate) validated_events: AtomicU64,
    pub(crate) non_validated_events: AtomicU64,
    pub(crate) connection_attempts: AtomicU64,
    pub(crate) last_connected_at: Mutex<Option<Timestamp>>,
}

impl RelayStats {
    pub(crate) fn record_message_in(&self, bytes: usize) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_message_out(&self, bytes: usize) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_connected(&self) {
        *self.last_connected_at.lock().expect("stats lock poisoned") = Some(Timestamp::now());
    }

    pub fn last_connected_at(&self) -> Option<Timestamp> {
        *self.last_connected_at.lock().expect("stats lock poisoned")
    }
}

/// A read-only copy of a relay's counters at one point in time.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RelayStatsSnapshot {
    pub messages_in: u64,
    pub messages_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub events_in: u64,
    pub eose_count: u64,
    pub active_subscriptions: usize,
    pub unique_events: u64,
    pub duplicate_events: u64,
    pub validated_events: u64,
    pub non_validated_events: u64,
    pub sampling_rate: f64,
    pub last_connected_at: Option<Timestamp>,
    pub connection_attempts: u64,
}

impl RelayStats {
    pub(crate) fn snapshot(&self, active_subscriptions: usize, sampling_rate: f64) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            events_in: self.events_in.load(Ordering::Relaxed),
            eose_count: self.eose_count.load(Ordering::Relaxed),
            active_subscriptions,
            unique_events: self.unique_events.load(Ordering::Relaxed),
            duplicate_events: self.duplicate_events.load(Ordering::Relaxed),
            validated_events: self.validated_events.load(Ordering::Relaxed),
            non_validated_events: self.non_validated_events.load(Ordering::Relaxed),
            sampling_rate,
            last_connected_at: self.last_connected_at(),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
        }
    }
}
