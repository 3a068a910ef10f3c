//! Tag plan types and construction.
//!
//! A [`TagPlan`] holds, for every selected resource, the tags it should
//! carry, the tags it currently carries, and the filtered changes needed to
//! get from one to the other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::client::RemoteTagClient;
use crate::config::{ResourceConfig, TagSyncConfig};
use crate::context::ReconciliationContext;
use crate::error::Result;
use crate::reconciler::Reconciler;
use crate::tags::{SystemTagPolicy, TagDiff, TagSet};

/// A complete tag plan.
#[derive(Debug, Clone, Serialize)]
pub struct TagPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// One entry per selected resource, in configuration order.
    pub resources: Vec<ResourcePlan>,
}

/// Planned changes for one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourcePlan {
    /// Resource identifier.
    pub identifier: String,
    /// Service prefix.
    pub service: String,
    /// Tags the resource should carry.
    pub declared: TagSet,
    /// Tags the resource carries now.
    pub observed: TagSet,
    /// Changes left after reserved and ignored keys were dropped.
    pub changes: TagDiff,
}

impl TagPlan {
    /// Builds a plan by listing the current tags of every selected resource.
    ///
    /// Each listing runs in its own context.
    ///
    /// # Errors
    ///
    /// Returns an error if declared tags are invalid or a listing fails.
    pub async fn build<C: RemoteTagClient + ?Sized>(
        config: &TagSyncConfig,
        client: &C,
        policy: &SystemTagPolicy,
        selected: &[&ResourceConfig],
    ) -> Result<Self> {
        info!("Planning {} resource(s)", selected.len());
        let mut resources = Vec::with_capacity(selected.len());

        for resource in selected {
            let reconciler = Reconciler::new(client, policy, resource.service.as_str())
                .with_ignore_config(config.ignore_tags.clone());

            let declared = config.declared_tags(resource)?;
            let observed = reconciler
                .list_tags(&ReconciliationContext::new(), &resource.identifier)
                .await?;
            let changes = reconciler.plan(&observed, &declared);

            debug!("{}: {changes}", resource.identifier);
            resources.push(ResourcePlan {
                identifier: resource.identifier.clone(),
                service: resource.service.clone(),
                declared,
                observed,
                changes,
            });
        }

        Ok(Self {
            created_at: Utc::now(),
            resources,
        })
    }

    /// Returns true if no resource needs changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.iter().all(ResourcePlan::is_converged)
    }

    /// Total number of tag changes across all resources.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.resources.iter().map(ResourcePlan::change_count).sum()
    }

    /// Resources that need changes.
    #[must_use]
    pub fn pending(&self) -> Vec<&ResourcePlan> {
        self.resources.iter().filter(|r| !r.is_converged()).collect()
    }
}

impl ResourcePlan {
    /// Returns true if the resource already carries its declared tags.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of tag changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.changes.change_count()
    }

    /// Number of keys that will be added.
    #[must_use]
    pub fn added_count(&self) -> usize {
        self.changes
            .updated
            .iter()
            .filter(|(k, _)| !self.observed.has_key(k))
            .count()
    }

    /// Number of existing keys whose value will change.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.changes.updated.len() - self.added_count()
    }

    /// Number of keys that will be removed.
    #[must_use]
    pub fn removed_count(&self) -> usize {
        self.changes.removed.len()
    }
}

impl std::fmt::Display for ResourcePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.identifier, self.service, self.changes)
    }
}

impl std::fmt::Display for TagPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.pending();
        if pending.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Tag Plan ({} resource(s) to update):", pending.len())?;
        for (i, resource) in pending.iter().enumerate() {
            writeln!(f, "  {i}. {resource}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRemoteTagClient;
    use crate::config::ConfigParser;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(pairs.iter().copied()).expect("valid tags")
    }

    fn config() -> TagSyncConfig {
        ConfigParser::new()
            .parse_yaml(
                r"
default_tags:
  owner: platform
resources:
  - identifier: res-a
    service: directconnect
    tags:
      env: staging
  - identifier: res-b
    service: directconnect
    tags:
      env: prod
",
                None,
            )
            .expect("valid config")
    }

    #[tokio::test]
    async fn test_build_plan() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_list_tags()
            .withf(|_, id| id == "res-a")
            .times(1)
            .returning(|_, _| {
                Ok(tags(&[
                    ("env", "prod"),
                    ("team", "x"),
                    ("aws:cloudformation:stack-name", "s"),
                ]))
            });
        client
            .expect_list_tags()
            .withf(|_, id| id == "res-b")
            .times(1)
            .returning(|_, _| Ok(tags(&[("env", "prod"), ("owner", "platform")])));

        let config = config();
        let policy = config.build_policy();
        let selected = config.select_resources(None).expect("resources");

        let plan = TagPlan::build(&config, &client, &policy, &selected)
            .await
            .expect("plan");

        assert_eq!(plan.resources.len(), 2);
        assert_eq!(plan.pending().len(), 1);

        let first = &plan.resources[0];
        assert_eq!(first.changes.removed, tags(&[("team", "x")]));
        assert_eq!(
            first.changes.updated,
            tags(&[("env", "staging"), ("owner", "platform")])
        );
        assert_eq!(first.added_count(), 1);
        assert_eq!(first.changed_count(), 1);
        assert_eq!(first.removed_count(), 1);
        assert_eq!(plan.change_count(), 3);

        assert!(plan.resources[1].is_converged());
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_plan() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_list_tags()
            .times(1)
            .returning(|_, _| Err(crate::error::RemoteError::network("unreachable")));

        let config = config();
        let policy = config.build_policy();
        let selected = config.select_resources(Some("res-a")).expect("resource");

        let result = TagPlan::build(&config, &client, &policy, &selected).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_plan_display() {
        let plan = TagPlan {
            created_at: Utc::now(),
            resources: vec![],
        };

        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No changes required");
    }
}
