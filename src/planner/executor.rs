//! Plan executor for applying tag plans.
//!
//! Every resource is reconciled in its own context and re-listed after a
//! successful reconcile, so the reported tags are what the backend actually
//! stores.

use std::time::Duration;
use tracing::{error, info, warn};

use crate::client::RemoteTagClient;
use crate::context::ReconciliationContext;
use crate::error::{Phase, Result};
use crate::reconciler::Reconciler;
use crate::tags::{IgnoreConfig, SystemTagPolicy, TagSet};

use super::plan::{ResourcePlan, TagPlan};

/// Executor for tag plans.
pub struct PlanExecutor<'a, C: RemoteTagClient + ?Sized> {
    /// Remote tagging backend.
    client: &'a C,
    /// Reserved key policy.
    policy: &'a SystemTagPolicy,
    /// Keys the user never wants managed.
    ignore: IgnoreConfig,
    /// Whether to continue with the next resource after a failure.
    continue_on_error: bool,
    /// Per-resource deadline.
    timeout: Option<Duration>,
}

/// Outcome for one resource.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceResult {
    /// Resource identifier.
    pub identifier: String,
    /// Outcome.
    pub status: ResourceStatus,
    /// Number of tag changes pushed.
    pub applied: usize,
    /// Phase that failed, if any.
    pub phase: Option<Phase>,
    /// Error message (if failed).
    pub error: Option<String>,
    /// Tags listed after a successful reconcile.
    pub observed: Option<TagSet>,
}

/// Outcome kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Changes were applied.
    Applied,
    /// Nothing to do.
    Unchanged,
    /// A remote call failed.
    Failed,
    /// Not attempted because an earlier resource failed.
    Skipped,
}

/// Result of executing a whole plan.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionResult {
    /// Individual resource results.
    pub results: Vec<ResourceResult>,
    /// Number of resources changed.
    pub applied: usize,
    /// Number of resources already converged.
    pub unchanged: usize,
    /// Number of failed resources.
    pub failed: usize,
    /// Number of skipped resources.
    pub skipped: usize,
    /// Whether every resource converged.
    pub success: bool,
}

impl<'a, C: RemoteTagClient + ?Sized> PlanExecutor<'a, C> {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(client: &'a C, policy: &'a SystemTagPolicy) -> Self {
        Self {
            client,
            policy,
            ignore: IgnoreConfig::default(),
            continue_on_error: false,
            timeout: None,
        }
    }

    /// Sets the ignore list used when re-listing.
    #[must_use]
    pub fn with_ignore_config(mut self, ignore: IgnoreConfig) -> Self {
        self.ignore = ignore;
        self
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Bounds the remote calls of each resource.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Executes a tag plan.
    ///
    /// Failures are reported per resource in the result, never as an error.
    pub async fn execute(&self, plan: &TagPlan) -> ExecutionResult {
        info!("Executing tag plan for {} resource(s)", plan.resources.len());

        let mut results = Vec::with_capacity(plan.resources.len());
        let mut halted = false;

        for resource in &plan.resources {
            if halted {
                results.push(ResourceResult::skipped(&resource.identifier));
                continue;
            }

            let result = self.execute_resource(resource).await;
            if result.status == ResourceStatus::Failed && !self.continue_on_error {
                warn!("Stopping after failure on {}", resource.identifier);
                halted = true;
            }
            results.push(result);
        }

        ExecutionResult::from_results(results)
    }

    async fn execute_resource(&self, resource: &ResourcePlan) -> ResourceResult {
        if resource.is_converged() {
            return ResourceResult {
                identifier: resource.identifier.clone(),
                status: ResourceStatus::Unchanged,
                applied: 0,
                phase: None,
                error: None,
                observed: Some(resource.observed.clone()),
            };
        }

        let reconciler = Reconciler::new(self.client, self.policy, resource.service.as_str())
            .with_ignore_config(self.ignore.clone());

        let root = ReconciliationContext::new();
        let ctx = match self.timeout {
            Some(timeout) => root.with_timeout(timeout),
            None => root,
        }
        .with_declared_tags(resource.declared.clone());

        match self.apply(&reconciler, &ctx, resource).await {
            Ok(observed) => ResourceResult {
                identifier: resource.identifier.clone(),
                status: ResourceStatus::Applied,
                applied: resource.change_count(),
                phase: None,
                error: None,
                observed: Some(observed),
            },
            Err(e) => {
                error!("Failed to reconcile {}: {e}", resource.identifier);
                let phase = e.phase();
                // Removals already went through when the upsert is refused.
                let applied = if phase == Some(Phase::Upsert) {
                    resource.removed_count()
                } else {
                    0
                };
                ResourceResult {
                    identifier: resource.identifier.clone(),
                    status: ResourceStatus::Failed,
                    applied,
                    phase,
                    error: Some(e.to_string()),
                    observed: None,
                }
            }
        }
    }

    /// Reconciles one resource, then re-lists it.
    async fn apply(
        &self,
        reconciler: &Reconciler<'_, C>,
        ctx: &ReconciliationContext,
        resource: &ResourcePlan,
    ) -> Result<TagSet> {
        reconciler
            .reconcile(ctx, &resource.identifier, &resource.observed, &resource.declared)
            .await?;

        let observed = reconciler.list_tags(ctx, &resource.identifier).await?;
        if !reconciler.plan(&observed, &resource.declared).is_empty() {
            warn!(
                "{} still differs from its declared tags after apply",
                resource.identifier
            );
        }

        Ok(observed)
    }
}

impl ResourceResult {
    fn skipped(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: ResourceStatus::Skipped,
            applied: 0,
            phase: None,
            error: Some(String::from("Skipped after an earlier failure")),
            observed: None,
        }
    }
}

impl ExecutionResult {
    fn from_results(results: Vec<ResourceResult>) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let applied = count(ResourceStatus::Applied);
        let unchanged = count(ResourceStatus::Unchanged);
        let failed = count(ResourceStatus::Failed);
        let skipped = count(ResourceStatus::Skipped);

        Self {
            applied,
            unchanged,
            failed,
            skipped,
            success: failed == 0 && skipped == 0,
            results,
        }
    }

    /// Total number of tag changes pushed.
    #[must_use]
    pub fn changes_applied(&self) -> usize {
        self.results.iter().map(|r| r.applied).sum()
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} applied, {} unchanged, {} failed, {} skipped",
            self.applied, self.unchanged, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRemoteTagClient;
    use crate::error::RemoteError;
    use crate::tags::diff;
    use chrono::Utc;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(pairs.iter().copied()).expect("valid tags")
    }

    fn resource(identifier: &str, observed: TagSet, declared: TagSet) -> ResourcePlan {
        ResourcePlan {
            identifier: identifier.to_string(),
            service: String::from("directconnect"),
            changes: diff(&observed, &declared),
            declared,
            observed,
        }
    }

    fn plan() -> TagPlan {
        TagPlan {
            created_at: Utc::now(),
            resources: vec![
                resource("a", tags(&[("team", "x")]), tags(&[("env", "prod")])),
                resource("b", TagSet::new(), tags(&[("env", "dev")])),
                resource("c", tags(&[("env", "qa")]), tags(&[("env", "qa")])),
            ],
        }
    }

    #[tokio::test]
    async fn test_execute_all_succeed() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .times(1)
            .returning(|_, _, _| Ok(()));
        client
            .expect_add_or_update_tags()
            .times(2)
            .returning(|_, _, _| Ok(()));
        client
            .expect_list_tags()
            .times(2)
            .returning(|_, id| {
                Ok(if id == "a" {
                    tags(&[("env", "prod")])
                } else {
                    tags(&[("env", "dev")])
                })
            });

        let policy = SystemTagPolicy::new();
        let result = PlanExecutor::new(&client, &policy).execute(&plan()).await;

        assert!(result.success);
        assert_eq!(result.applied, 2);
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.changes_applied(), 3);
        assert_eq!(result.results[0].observed, Some(tags(&[("env", "prod")])));
    }

    #[tokio::test]
    async fn test_stop_on_first_failure() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .times(1)
            .returning(|_, _, _| Err(RemoteError::network("reset")));
        client.expect_add_or_update_tags().times(0);
        client.expect_list_tags().times(0);

        let policy = SystemTagPolicy::new();
        let result = PlanExecutor::new(&client, &policy).execute(&plan()).await;

        assert!(!result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.results[0].phase, Some(Phase::Remove));
        assert_eq!(result.results[1].status, ResourceStatus::Skipped);
    }

    #[tokio::test]
    async fn test_continue_on_error() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .times(1)
            .returning(|_, _, _| Err(RemoteError::network("reset")));
        client
            .expect_add_or_update_tags()
            .times(1)
            .returning(|_, _, _| Ok(()));
        client
            .expect_list_tags()
            .times(1)
            .returning(|_, _| Ok(tags(&[("env", "dev")])));

        let policy = SystemTagPolicy::new();
        let result = PlanExecutor::new(&client, &policy)
            .with_continue_on_error(true)
            .execute(&plan())
            .await;

        assert!(!result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.applied, 1);
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(
            result.to_string(),
            "1 applied, 1 unchanged, 1 failed, 0 skipped"
        );
    }

    #[tokio::test]
    async fn test_upsert_failure_counts_removals() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .times(1)
            .returning(|_, _, _| Ok(()));
        client
            .expect_add_or_update_tags()
            .times(1)
            .returning(|_, _, _| Err(RemoteError::network("reset")));
        client.expect_list_tags().times(0);

        let plan = TagPlan {
            created_at: Utc::now(),
            resources: vec![resource(
                "a",
                tags(&[("team", "x"), ("cost", "1")]),
                tags(&[("env", "prod")]),
            )],
        };

        let policy = SystemTagPolicy::new();
        let result = PlanExecutor::new(&client, &policy).execute(&plan).await;

        assert_eq!(result.failed, 1);
        assert_eq!(result.results[0].phase, Some(Phase::Upsert));
        assert_eq!(result.results[0].applied, 2);
        assert_eq!(result.changes_applied(), 2);
    }
}
