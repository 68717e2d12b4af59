//! In-memory reference cache.
//!
//! Two maps: the primary `id -> event` store and a `dedup key -> id` index for
//! replaceable/addressable kinds. Mutations are serialised per dedup key by
//! the index's shard locks; queries snapshot matching events and sort
//! outside any lock so long reads never block writers.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::event::{DedupKey, Event, EventId};
use crate::filter::Filter;

use super::{CacheAdapter, Result};

#[derive(Debug, Default)]
pub struct MemoryCache {
    events: DashMap<EventId, Event>,
    dedup_index: DashMap<String, EventId>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl CacheAdapter for MemoryCache {
    async fn store(&self, event: &Event) -> Result<bool> {
        if event.kind.is_ephemeral() {
            return Ok(false);
        }

        match event.dedup_key() {
            DedupKey::Id(id) => {
                self.events.insert(id, event.clone());
                Ok(true)
            }
            DedupKey::Coordinate(coordinate) => {
                // The entry guard holds the shard lock for this key, so the
                // compare-and-swap below is atomic per coordinate.
                let mut entry = self.dedup_index.entry(coordinate).or_insert(event.id);
                let current_id = *entry.value();
                if current_id == event.id {
                    // First observer of this coordinate, or an exact re-send.
                    self.events.insert(event.id, event.clone());
                    return Ok(true);
                }
                let superseded = match self.events.get(&current_id) {
                    Some(current) => event.created_at > current.created_at,
                    None => true,
                };
                if !superseded {
                    return Ok(false);
                }
                // Install the new event before switching the pointer so a
                // concurrent get_by_dedup never sees a dangling id.
                self.events.insert(event.id, event.clone());
                *entry.value_mut() = event.id;
                drop(entry);
                self.events.remove(&current_id);
                Ok(true)
            }
        }
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>> {
        let mut matches: Vec<Event> = self
            .events
            .iter()
            .filter(|entry| filter.match_event(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        // Newest first; ties broken by id for a stable order.
        matches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn get(&self, id: &EventId) -> Result<Option<Event>> {
        Ok(self.events.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &EventId) -> Result<()> {
        if let Some((_, event)) = self.events.remove(id) {
            if let DedupKey::Coordinate(coordinate) = event.dedup_key() {
                self.dedup_index
                    .remove_if(&coordinate, |_, current| *current == event.id);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.events.clear();
        self.dedup_index.clear();
        Ok(())
    }

    async fn get_by_dedup(&self, key: &str) -> Result<Option<Event>> {
        let Some(id) = self.dedup_index.get(key).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.events.get(&id).map(|entry| entry.value().clone()))
    }
}
