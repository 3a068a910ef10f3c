//! System tag policy and user ignore rules.
//!
//! Vendors attach tags of their own to resources (lineage tags, stack
//! membership, console names). Those keys must never be removed or
//! overwritten by the engine, whatever the declared state says. The
//! [`SystemTagPolicy`] holds these reserved patterns, globally and per
//! service prefix, and filters them out of tag sets at the reconciler
//! boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::set::TagSet;

/// Key prefix reserved by the vendor on every service.
pub const AWS_RESERVED_PREFIX: &str = "aws:";

/// A reserved key pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservedPattern {
    /// Matches keys starting with the prefix.
    Prefix(String),
    /// Matches exactly this key.
    Exact(String),
}

impl ReservedPattern {
    /// Returns true if the key matches this pattern.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Exact(exact) => key == exact.as_str(),
        }
    }
}

/// Reserved tag patterns, global and per service prefix.
///
/// Built once at startup and read-only afterwards, so a single policy can
/// be shared between concurrent reconciliations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemTagPolicy {
    /// Patterns that apply to every service.
    global: Vec<ReservedPattern>,
    /// Patterns that apply to one service prefix only.
    per_service: HashMap<String, Vec<ReservedPattern>>,
}

impl SystemTagPolicy {
    /// Creates a policy that reserves nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates the built-in policy.
    ///
    /// `aws:` is reserved everywhere; Elastic Beanstalk also manages its
    /// own `elasticbeanstalk:` prefix and the `Name` tag.
    #[must_use]
    pub fn new() -> Self {
        Self::empty()
            .with_global(ReservedPattern::Prefix(AWS_RESERVED_PREFIX.to_string()))
            .with_service(
                "elasticbeanstalk",
                ReservedPattern::Prefix(String::from("elasticbeanstalk:")),
            )
            .with_service("elasticbeanstalk", ReservedPattern::Exact(String::from("Name")))
    }

    /// Adds a pattern that applies to every service.
    #[must_use]
    pub fn with_global(mut self, pattern: ReservedPattern) -> Self {
        self.global.push(pattern);
        self
    }

    /// Adds a pattern for one service prefix.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>, pattern: ReservedPattern) -> Self {
        self.per_service.entry(service.into()).or_default().push(pattern);
        self
    }

    /// Returns true if `key` is reserved for `service_prefix`.
    #[must_use]
    pub fn is_system_tag(&self, key: &str, service_prefix: &str) -> bool {
        self.global.iter().any(|p| p.matches(key))
            || self
                .per_service
                .get(service_prefix)
                .is_some_and(|patterns| patterns.iter().any(|p| p.matches(key)))
    }

    /// Returns `tags` without any system tags.
    #[must_use]
    pub fn filter(&self, tags: &TagSet, service_prefix: &str) -> TagSet {
        tags.retain(|key, _| !self.is_system_tag(key, service_prefix))
    }
}

/// Keys and key prefixes the user never wants managed or reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Exact keys to ignore.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Key prefixes to ignore.
    #[serde(default)]
    pub key_prefixes: Vec<String>,
}

impl IgnoreConfig {
    /// Returns true if nothing is ignored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.key_prefixes.is_empty()
    }

    /// Returns true if the key is ignored.
    #[must_use]
    pub fn ignores(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
            || self.key_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Returns `tags` without ignored keys.
    #[must_use]
    pub fn apply(&self, tags: &TagSet) -> TagSet {
        if self.is_empty() {
            return tags.clone();
        }
        tags.ignore_keys(&self.keys).ignore_prefixes(&self.key_prefixes)
    }
}
