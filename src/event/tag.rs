//! Event tags: a name followed by zero or more string values.

use serde::{Deserialize, Serialize};

/// A single tag entry on an event.
///
/// The first element is the tag name, the rest are its values. Serialises
/// as a plain JSON array of strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    pub fn new(entries: Vec<String>) -> Self {
        Self(entries)
    }

    /// Build a tag from a name and its values.
    pub fn custom<S, I, V>(name: S, values: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut entries = vec![name.into()];
        entries.extend(values.into_iter().map(Into::into));
        Self(entries)
    }

    /// An `e` tag referencing an event id.
    pub fn event(id_hex: impl Into<String>) -> Self {
        Self::custom("e", [id_hex.into()])
    }

    /// A `p` tag referencing a public key.
    pub fn public_key(pubkey_hex: impl Into<String>) -> Self {
        Self::custom("p", [pubkey_hex.into()])
    }

    /// A `d` tag carrying an addressable-event identifier.
    pub fn identifier(d: impl Into<String>) -> Self {
        Self::custom("d", [d.into()])
    }

    /// An `r` tag carrying a relay URL, optionally marked `read` or `write`.
    pub fn relay(url: impl Into<String>, marker: Option<&str>) -> Self {
        match marker {
            Some(m) => Self::custom("r", [url.into(), m.to_string()]),
            None => Self::custom("r", [url.into()]),
        }
    }

    pub fn name(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    /// The tag's first value, if any.
    pub fn content(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    pub fn values(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The tag name as a single letter, when it is one (`e`, `p`, `d`, ...).
    /// Tag filters in queries only apply to these.
    pub fn single_letter(&self) -> Option<char> {
        let name = self.name();
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Some(c),
            _ => None,
        }
    }
}

impl From<Vec<String>> for Tag {
    fn from(entries: Vec<String>) -> Self {
        Self(entries)
    }
}
