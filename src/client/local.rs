//! Local file-based tag store.
//!
//! Keeps the tags of every resource in a single JSON document keyed by
//! identifier. Useful for local development, dry runs against a snapshot,
//! and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::context::ReconciliationContext;
use crate::error::{RemoteError, RemoteResult};
use crate::tags::TagSet;

use super::RemoteTagClient;

/// Default store directory name.
pub const DEFAULT_STORE_DIR: &str = ".tagsync";

/// Store file name.
const STORE_FILE: &str = "tags.json";

/// Current version of the store format.
const STORE_VERSION: &str = "1";

/// Local file-based tag store.
#[derive(Debug)]
pub struct LocalTagStore {
    /// Path to the store file.
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

/// On-disk document.
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: String,
    #[serde(default)]
    resources: BTreeMap<String, StoredResource>,
}

/// Tags of one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredResource {
    tags: TagSet,
    updated_at: DateTime<Utc>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION.to_string(),
            resources: BTreeMap::new(),
        }
    }
}

impl LocalTagStore {
    /// Creates a store in `tags.json` under the given directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self::with_path(base_dir.as_ref().join(STORE_FILE))
    }

    /// Creates a store backed by a specific file.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, or an empty one if the file does not exist yet.
    async fn read(&self) -> RemoteResult<StoreDocument> {
        if !self.path.exists() {
            debug!("Tag store does not exist yet: {}", self.path.display());
            return Ok(StoreDocument::default());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| RemoteError::storage(format!("Failed to read tag store: {e}")))?;

        let document: StoreDocument = serde_json::from_str(&content)
            .map_err(|e| RemoteError::storage(format!("Failed to parse tag store: {e}")))?;

        if document.version != STORE_VERSION {
            return Err(RemoteError::storage(format!(
                "Tag store version mismatch: expected {STORE_VERSION}, found {}",
                document.version
            )));
        }

        Ok(document)
    }

    /// Writes the document atomically.
    async fn write(&self, document: &StoreDocument) -> RemoteResult<()> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent.filter(|p| !p.exists()) {
            debug!("Creating tag store directory: {}", parent.display());
            fs::create_dir_all(parent).await.map_err(|e| {
                RemoteError::storage(format!("Failed to create store directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(document)
            .map_err(|e| RemoteError::storage(format!("Failed to serialize tag store: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| RemoteError::storage(format!("Failed to create temp store file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| RemoteError::storage(format!("Failed to write store file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| RemoteError::storage(format!("Failed to sync store file: {e}")))?;

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| RemoteError::storage(format!("Failed to rename store file: {e}")))?;

        Ok(())
    }

    /// Applies `change` to one resource's tags and persists the result.
    async fn modify(
        &self,
        identifier: &str,
        change: impl FnOnce(&TagSet) -> TagSet + Send,
    ) -> RemoteResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.read().await?;
        let current = document
            .resources
            .get(identifier)
            .map(|r| r.tags.clone())
            .unwrap_or_default();

        document.resources.insert(
            identifier.to_string(),
            StoredResource {
                tags: change(&current),
                updated_at: Utc::now(),
            },
        );

        self.write(&document).await
    }
}

#[async_trait]
impl RemoteTagClient for LocalTagStore {
    async fn list_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
    ) -> RemoteResult<TagSet> {
        let document = self.read().await?;
        Ok(document
            .resources
            .get(identifier)
            .map(|r| r.tags.clone())
            .unwrap_or_default())
    }

    async fn remove_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        info!("Removing {} tag(s) from {identifier} in {}", keys.len(), self.path.display());
        self.modify(identifier, |current| current.without(keys)).await
    }

    async fn add_or_update_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
        tags: &TagSet,
    ) -> RemoteResult<()> {
        info!("Writing {} tag(s) to {identifier} in {}", tags.len(), self.path.display());
        self.modify(identifier, |current| current.merge(tags)).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
