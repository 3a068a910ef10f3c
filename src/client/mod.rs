//! Remote tagging backends.
//!
//! The reconciler talks to remote tag storage only through the
//! [`RemoteTagClient`] trait. Each backend is a thin adapter from the three
//! capabilities (list, remove keys, upsert) to one concrete API:
//! - [`LocalTagStore`]: JSON file, for local development and tests
//! - [`HttpTagClient`]: generic REST tagging endpoint
//! - [`S3BucketTagClient`]: AWS S3 bucket tagging

mod http;
mod local;
mod s3;

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::context::ReconciliationContext;
use crate::error::RemoteResult;
use crate::tags::TagSet;

pub use http::{HttpTagClient, DEFAULT_TIMEOUT_SECS};
pub use local::{LocalTagStore, DEFAULT_STORE_DIR};
pub use s3::S3BucketTagClient;

/// Capability interface of a remote tag store.
///
/// `identifier` is an opaque resource handle (commonly an ARN); its format
/// is the backend's concern. Implementations own any retry policy; the
/// reconciler never retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteTagClient: Send + Sync {
    /// Lists the tags currently stored on the resource.
    async fn list_tags(&self, ctx: &ReconciliationContext, identifier: &str)
    -> RemoteResult<TagSet>;

    /// Removes the given keys from the resource.
    async fn remove_tags(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()>;

    /// Adds the given tags, overwriting values of existing keys.
    async fn add_or_update_tags(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
        tags: &TagSet,
    ) -> RemoteResult<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl RemoteTagClient for Box<dyn RemoteTagClient> {
    async fn list_tags(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
    ) -> RemoteResult<TagSet> {
        (**self).list_tags(ctx, identifier).await
    }

    async fn remove_tags(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        (**self).remove_tags(ctx, identifier, keys).await
    }

    async fn add_or_update_tags(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
        tags: &TagSet,
    ) -> RemoteResult<()> {
        (**self).add_or_update_tags(ctx, identifier, tags).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
