//! Key-value tag sets.
//!
//! A [`TagSet`] is a snapshot of the tags on one resource as of one
//! observation (or one declaration). Keys are unique, case-sensitive and
//! non-empty; values are strings and may be empty.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::TagError;

/// An immutable-by-convention mapping from tag key to tag value.
///
/// Iteration is sorted by key so output and fingerprints are stable, but
/// ordering carries no meaning: two sets are equal iff they hold the same
/// key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Creates an empty tag set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tags: BTreeMap::new(),
        }
    }

    /// Builds a tag set from loosely typed values.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::InvalidTagKind`] if a value is not a string and
    /// [`TagError::InvalidTagKey`] if a key is empty.
    pub fn from_mapping<K, I>(mapping: I) -> Result<Self, TagError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, serde_json::Value)>,
    {
        let mut tags = BTreeMap::new();

        for (key, value) in mapping {
            let key = key.into();
            if key.is_empty() {
                return Err(TagError::InvalidTagKey);
            }

            let value = match value {
                serde_json::Value::String(s) => s,
                other => {
                    return Err(TagError::InvalidTagKind {
                        key,
                        kind: value_kind(&other),
                    });
                }
            };

            tags.insert(key, value);
        }

        Ok(Self { tags })
    }

    /// Builds a tag set from string pairs.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::InvalidTagKey`] if a key is empty.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self, TagError>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut tags = BTreeMap::new();

        for (key, value) in pairs {
            let key = key.into();
            if key.is_empty() {
                return Err(TagError::InvalidTagKey);
            }
            tags.insert(key, value.into());
        }

        Ok(Self { tags })
    }

    /// Returns the tags as a plain map.
    #[must_use]
    pub fn to_mapping(&self) -> HashMap<String, String> {
        self.tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns the set of keys.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        self.tags.keys().cloned().collect()
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns true if there are no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterates over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Tags present in `self` whose key is absent from `new`.
    #[must_use]
    pub fn removed(&self, new: &Self) -> Self {
        self.retain(|k, _| !new.has_key(k))
    }

    /// Tags in `new` that are absent from `self` or carry a different value.
    #[must_use]
    pub fn updated(&self, new: &Self) -> Self {
        new.retain(|k, v| self.get(k) != Some(v))
    }

    /// Merges `other` over `self`; values from `other` win.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut tags = self.tags.clone();
        tags.extend(other.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { tags }
    }

    /// Drops the given keys.
    #[must_use]
    pub fn ignore_keys<S: AsRef<str>>(&self, keys: &[S]) -> Self {
        self.retain(|k, _| !keys.iter().any(|key| key.as_ref() == k))
    }

    /// Drops every key starting with one of the given prefixes.
    #[must_use]
    pub fn ignore_prefixes<S: AsRef<str>>(&self, prefixes: &[S]) -> Self {
        self.retain(|k, _| !prefixes.iter().any(|p| k.starts_with(p.as_ref())))
    }

    /// Keeps only the given keys.
    #[must_use]
    pub fn only_keys<S: AsRef<str>>(&self, keys: &[S]) -> Self {
        self.retain(|k, _| keys.iter().any(|key| key.as_ref() == k))
    }

    /// Returns the tags without the given keys.
    #[must_use]
    pub fn without(&self, keys: &BTreeSet<String>) -> Self {
        self.retain(|k, _| !keys.contains(k))
    }

    /// Computes a SHA-256 fingerprint of the sorted key/value pairs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        for (key, value) in &self.tags {
            // Length prefixes keep ("ab","c") and ("a","bc") apart.
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Returns a new set with the pairs matching the predicate.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&str, &str) -> bool) -> Self {
        Self {
            tags: self
                .tags
                .iter()
                .filter(|(k, v)| keep(k.as_str(), v.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Names the JSON kind of a rejected value.
const fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "map",
    }
}

impl TryFrom<BTreeMap<String, String>> for TagSet {
    type Error = TagError;

    fn try_from(tags: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        if tags.keys().any(String::is_empty) {
            return Err(TagError::InvalidTagKey);
        }
        Ok(Self { tags })
    }
}

impl From<TagSet> for BTreeMap<String, String> {
    fn from(set: TagSet) -> Self {
        set.tags
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.tags.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value:?}")?;
        }
        write!(f, "}}")
    }
}
