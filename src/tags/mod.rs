//! Tag data types and pure tag logic.
//!
//! This module holds everything that can be reasoned about without I/O:
//! - [`TagSet`]: a snapshot of key/value tags
//! - [`SystemTagPolicy`] and [`IgnoreConfig`]: which keys the engine must leave alone
//! - [`diff()`]: the declared-vs-observed differ

mod diff;
mod policy;
mod set;

pub use diff::{diff, TagDiff};
pub use policy::{IgnoreConfig, ReservedPattern, SystemTagPolicy, AWS_RESERVED_PREFIX};
pub use set::TagSet;
