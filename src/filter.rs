//! Subscription filters and event matching.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::event::{Event, EventId, Kind, PublicKey, Timestamp};

/// A query filter, serialised to the NIP-01 JSON object shape.
///
/// An event matches when it satisfies every present constraint: id in `ids`,
/// pubkey in `authors`, kind in `kinds`, `since <= created_at <= until`, and
/// for each tag entry at least one tag with that name whose first value is
/// in the set. `search` is relay-interpreted and never matched locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<BTreeSet<EventId>>,
    pub authors: Option<BTreeSet<PublicKey>>,
    pub kinds: Option<BTreeSet<Kind>>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
    pub search: Option<String>,
    /// Single-letter tag name -> set of accepted first values.
    pub tags: BTreeMap<char, BTreeSet<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: EventId) -> Self {
        self.ids.get_or_insert_with(BTreeSet::new).insert(id);
        self
    }

    pub fn ids<I: IntoIterator<Item = EventId>>(mut self, ids: I) -> Self {
        self.ids.get_or_insert_with(BTreeSet::new).extend(ids);
        self
    }

    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.get_or_insert_with(BTreeSet::new).insert(author);
        self
    }

    pub fn authors<I: IntoIterator<Item = PublicKey>>(mut self, authors: I) -> Self {
        self.authors.get_or_insert_with(BTreeSet::new).extend(authors);
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).insert(kind);
        self
    }

    pub fn kinds<I: IntoIterator<Item = Kind>>(mut self, kinds: I) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    /// Require at least one tag named `letter` whose first value is `value`.
    pub fn tag_value(mut self, letter: char, value: impl Into<String>) -> Self {
        self.tags.entry(letter).or_default().insert(value.into());
        self
    }

    pub fn tag_values<I, V>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.tags
            .entry(letter)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Whether any `authors` constraint is present (used by outbox routing).
    pub fn has_authors(&self) -> bool {
        self.authors.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Local match. `limit` and `search` are not per-event predicates and
    /// are ignored here.
    pub fn match_event(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (letter, values) in &self.tags {
            let hit = event.tags.iter().any(|tag| {
                tag.single_letter() == Some(*letter)
                    && tag.content().is_some_and(|first| values.contains(first))
            });
            if !hit {
                return false;
            }
        }
        true
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ids) = &self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(authors) = &self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(kinds) = &self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        for (letter, values) in &self.tags {
            map.serialize_entry(&format!("#{}", letter), values)?;
        }
        if let Some(since) = &self.since {
            map.serialize_entry("since", since)?;
        }
        if let Some(until) = &self.until {
            map.serialize_entry("until", until)?;
        }
        if let Some(limit) = &self.limit {
            map.serialize_entry("limit", limit)?;
        }
        if let Some(search) = &self.search {
            map.serialize_entry("search", search)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| DeError::custom("filter must be a JSON object"))?;

        let mut filter = Filter::new();
        for (key, value) in object {
            match key.as_str() {
                "ids" => {
                    filter.ids =
                        Some(serde_json::from_value(value.clone()).map_err(DeError::custom)?)
                }
                "authors" => {
                    filter.authors =
                        Some(serde_json::from_value(value.clone()).map_err(DeError::custom)?)
                }
                "kinds" => {
                    filter.kinds =
                        Some(serde_json::from_value(value.clone()).map_err(DeError::custom)?)
                }
                "since" => {
                    filter.since =
                        Some(serde_json::from_value(value.clone()).map_err(DeError::custom)?)
                }
                "until" => {
                    filter.until =
                        Some(serde_json::from_value(value.clone()).map_err(DeError::custom)?)
                }
                "limit" => {
                    filter.limit =
                        Some(serde_json::from_value(value.clone()).map_err(DeError::custom)?)
                }
                "search" => {
                    filter.search =
                        Some(serde_json::from_value(value.clone()).map_err(DeError::custom)?)
                }
                key => {
                    // "#e", "#p", ... - single-letter tag filters. Anything
                    // else is an extension we ignore.
                    if let Some(letter) = key.strip_prefix('#') {
                        let mut chars = letter.chars();
                        if let (Some(c), None) = (chars.next(), chars.next()) {
                            let values: BTreeSet<String> =
                                serde_json::from_value(value.clone()).map_err(DeError::custom)?;
                            filter.tags.insert(c, values);
                        }
                    }
                }
            }
        }
        Ok(filter)
    }
}
