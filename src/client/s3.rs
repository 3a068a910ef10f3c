//! AWS S3 bucket tagging backend.
//!
//! S3 has no per-key tag operations: the whole tag set of a bucket is
//! replaced on every write. Removal and upsert are therefore implemented
//! as read-modify-write cycles over `GetBucketTagging`/`PutBucketTagging`.

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{Tag, Tagging};
use aws_sdk_s3::Client;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::context::ReconciliationContext;
use crate::error::{RemoteError, RemoteResult};
use crate::tags::{TagSet, AWS_RESERVED_PREFIX};

use super::RemoteTagClient;

/// Error code returned when a bucket has no tags at all.
const NO_SUCH_TAG_SET: &str = "NoSuchTagSet";

/// Error code returned for unknown buckets.
const NO_SUCH_BUCKET: &str = "NoSuchBucket";

/// S3 bucket tagging client.
#[derive(Debug, Clone)]
pub struct S3BucketTagClient {
    /// S3 client.
    client: Client,
}

impl S3BucketTagClient {
    /// Creates a new client from the ambient AWS configuration.
    pub async fn new(region: Option<&str>) -> Self {
        let loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        let config = if let Some(region_str) = region {
            loader
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            loader.load().await
        };

        Self {
            client: Client::new(&config),
        }
    }

    /// Creates a client around an existing SDK client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Reads the bucket's full tag set, system tags included.
    async fn read_tags(&self, identifier: &str) -> RemoteResult<TagSet> {
        let bucket = bucket_name(identifier);
        debug!("Reading tags of s3://{bucket}");

        let result = self
            .client
            .get_bucket_tagging()
            .bucket(bucket)
            .send()
            .await;

        match result {
            Ok(output) => TagSet::from_pairs(
                output
                    .tag_set()
                    .iter()
                    .map(|tag| (tag.key().to_string(), tag.value().to_string())),
            )
            .map_err(|e| RemoteError::InvalidResponse {
                message: format!("S3 returned an invalid tag: {e}"),
            }),
            Err(sdk_err) => match sdk_err.code() {
                Some(NO_SUCH_TAG_SET) => Ok(TagSet::new()),
                Some(NO_SUCH_BUCKET) => Err(RemoteError::ResourceNotFound {
                    identifier: identifier.to_string(),
                }),
                _ => Err(sdk_error("get tagging", &sdk_err)),
            },
        }
    }

    /// Replaces the bucket's tag set.
    ///
    /// Reserved `aws:` keys are taken from `current` as they are, never from
    /// `desired`, so a write can neither drop nor alter them. The tag set is
    /// only deleted when nothing, reserved keys included, would remain.
    async fn write_tags(
        &self,
        identifier: &str,
        current: &TagSet,
        desired: &TagSet,
    ) -> RemoteResult<()> {
        let bucket = bucket_name(identifier);

        let reserved = current.retain(|k, _| k.starts_with(AWS_RESERVED_PREFIX));
        let tags = desired
            .ignore_prefixes(&[AWS_RESERVED_PREFIX])
            .merge(&reserved);

        if tags.is_empty() {
            debug!("Deleting tag set of s3://{bucket}");
            self.client
                .delete_bucket_tagging()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| sdk_error("delete tagging", &e))?;
            return Ok(());
        }

        let tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RemoteError::InvalidResponse {
                message: format!("Failed to build S3 tag: {e}"),
            })?;

        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| RemoteError::InvalidResponse {
                message: format!("Failed to build S3 tagging: {e}"),
            })?;

        debug!("Writing {} tag(s) to s3://{bucket}", tags.len());
        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| sdk_error("put tagging", &e))?;

        Ok(())
    }
}

/// Maps an SDK failure, keeping the HTTP status when there was a response.
fn sdk_error<E>(operation: &str, err: &SdkError<E, HttpResponse>) -> RemoteError
where
    E: std::error::Error + 'static,
{
    let message = format!("S3 {operation} error: {}", DisplayErrorContext(err));
    match err.raw_response() {
        Some(response) => RemoteError::api_error(response.status().as_u16(), message),
        None => RemoteError::network(message),
    }
}

/// Extracts the bucket name from a bucket name or an S3 bucket ARN.
fn bucket_name(identifier: &str) -> &str {
    if identifier.starts_with("arn:") {
        identifier
            .rsplit_once(":::")
            .map_or(identifier, |(_, bucket)| bucket)
    } else {
        identifier
    }
}

#[async_trait]
impl RemoteTagClient for S3BucketTagClient {
    async fn list_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
    ) -> RemoteResult<TagSet> {
        self.read_tags(identifier).await
    }

    async fn remove_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        info!("Removing {} tag(s) from s3://{}", keys.len(), bucket_name(identifier));
        let current = self.read_tags(identifier).await?;
        self.write_tags(identifier, &current, &current.without(keys))
            .await
    }

    async fn add_or_update_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
        tags: &TagSet,
    ) -> RemoteResult<()> {
        info!("Writing {} tag(s) to s3://{}", tags.len(), bucket_name(identifier));
        let current = self.read_tags(identifier).await?;
        self.write_tags(identifier, &current, &current.merge(tags))
            .await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
