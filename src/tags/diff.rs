//! Diffing of declared vs. observed tag sets.
//!
//! The differ is a pure function: it knows nothing about system tags,
//! clients or contexts. Vendor policy is applied afterwards with
//! [`TagDiff::filter_system`].

use serde::Serialize;
use std::fmt;

use super::policy::SystemTagPolicy;
use super::set::TagSet;

/// What has to change to turn one tag set into another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagDiff {
    /// Tags whose key is gone from the new set.
    pub removed: TagSet,
    /// Tags that are new or carry a new value.
    pub updated: TagSet,
}

/// Computes the diff between `old` and `new`.
///
/// A key dropped from `new` lands in `removed` whatever its value was; a
/// key whose value changed lands in `updated` only. Unchanged pairs appear
/// in neither, so `removed` and `updated` never share a key.
#[must_use]
pub fn diff(old: &TagSet, new: &TagSet) -> TagDiff {
    TagDiff {
        removed: old.removed(new),
        updated: old.updated(new),
    }
}

impl TagDiff {
    /// Returns true if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.updated.is_empty()
    }

    /// Total number of keys touched.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.removed.len() + self.updated.len()
    }

    /// Drops reserved keys from both subsets.
    #[must_use]
    pub fn filter_system(&self, policy: &SystemTagPolicy, service_prefix: &str) -> Self {
        Self {
            removed: policy.filter(&self.removed, service_prefix),
            updated: policy.filter(&self.updated, service_prefix),
        }
    }

    /// Applies the diff to `old`: removals first, then upserts.
    #[must_use]
    pub fn apply_to(&self, old: &TagSet) -> TagSet {
        old.without(&self.removed.keys()).merge(&self.updated)
    }
}

impl fmt::Display for TagDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no changes");
        }

        let mut first = true;
        for (key, _) in self.removed.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "-{key}")?;
            first = false;
        }
        for (key, value) in self.updated.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "+{key}={value:?}")?;
            first = false;
        }
        Ok(())
    }
}
