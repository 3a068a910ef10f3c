//! Configuration types for tagsync.
//!
//! This module defines the structs that map to the `tagsync.yaml` file: the
//! backend to talk to, extra reserved tag patterns, the ignore list, default
//! tags, and the resources whose tags are managed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, Result, TagError};
use crate::tags::{IgnoreConfig, ReservedPattern, SystemTagPolicy, TagSet};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TagSyncConfig {
    /// Remote tagging backend.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Extra reserved tag patterns.
    #[serde(default)]
    pub system_tags: Vec<SystemTagRule>,
    /// Keys the engine never manages or reports.
    #[serde(default)]
    pub ignore_tags: IgnoreConfig,
    /// Tags merged under every resource's own tags.
    #[serde(default)]
    pub default_tags: BTreeMap<String, serde_json::Value>,
    /// Managed resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend type.
    #[serde(rename = "type", default)]
    pub kind: BackendKind,
    /// Store file path (local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// Base URL of the tagging API (http backend).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Request timeout in seconds (http backend).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// AWS region (s3 backend, uses the AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// Backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local JSON file.
    #[default]
    Local,
    /// REST tagging API.
    Http,
    /// AWS S3 bucket tagging.
    S3,
}

/// Extra reserved patterns for one service, or for all services when
/// `service` is omitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemTagRule {
    /// Service prefix the rule applies to.
    #[serde(default)]
    pub service: Option<String>,
    /// Reserved key prefixes.
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Reserved exact keys.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// A managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Opaque resource identifier, commonly an ARN.
    pub identifier: String,
    /// Service prefix used to look up reserved keys.
    pub service: String,
    /// Declared tags. Values must be strings.
    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Http => write!(f, "http"),
            Self::S3 => write!(f, "s3"),
        }
    }
}

impl SystemTagRule {
    /// Patterns described by this rule.
    pub fn patterns(&self) -> impl Iterator<Item = ReservedPattern> + '_ {
        self.prefixes
            .iter()
            .map(|p| ReservedPattern::Prefix(p.clone()))
            .chain(self.keys.iter().map(|k| ReservedPattern::Exact(k.clone())))
    }
}

impl TagSyncConfig {
    /// Builds the reserved tag policy: built-in defaults plus configured rules.
    #[must_use]
    pub fn build_policy(&self) -> SystemTagPolicy {
        self.system_tags
            .iter()
            .fold(SystemTagPolicy::new(), |policy, rule| {
                rule.patterns().fold(policy, |policy, pattern| match &rule.service {
                    Some(service) => policy.with_service(service.clone(), pattern),
                    None => policy.with_global(pattern),
                })
            })
    }

    /// Parses the default tags.
    ///
    /// # Errors
    ///
    /// Returns an error if a default tag has a non-string value.
    pub fn default_tag_set(&self) -> std::result::Result<TagSet, TagError> {
        TagSet::from_mapping(self.default_tags.clone())
    }

    /// Tags a resource should carry: defaults, overridden by the resource's
    /// own tags, minus ignored keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a tag has a non-string value.
    pub fn declared_tags(
        &self,
        resource: &ResourceConfig,
    ) -> std::result::Result<TagSet, TagError> {
        let own = TagSet::from_mapping(resource.tags.clone())?;
        let merged = self.default_tag_set()?.merge(&own);
        Ok(self.ignore_tags.apply(&merged))
    }

    /// Looks up a resource by identifier.
    #[must_use]
    pub fn find_resource(&self, identifier: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.identifier == identifier)
    }

    /// Selects one resource by identifier, or all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested identifier is not configured.
    pub fn select_resources(&self, identifier: Option<&str>) -> Result<Vec<&ResourceConfig>> {
        match identifier {
            Some(id) => self
                .find_resource(id)
                .map(|r| vec![r])
                .ok_or_else(|| {
                    ConfigError::UnknownResource {
                        identifier: id.to_string(),
                    }
                    .into()
                }),
            None => Ok(self.resources.iter().collect()),
        }
    }
}
