//! Reconciler for resource tags.
//!
//! Given the tags currently on a resource and the tags it should carry, the
//! reconciler computes the difference, drops every key the system policy
//! reserves for the service, and issues at most two remote calls: a removal
//! of the keys that went away, then an upsert of new or changed tags.
//!
//! The removal always runs first. If it fails the upsert is never attempted;
//! if the upsert fails the removal has already gone through and the resource
//! is partially converged. Callers re-list the resource for the
//! authoritative state. Nothing is retried here.

use tracing::{debug, error, info, info_span, Instrument};

use crate::client::RemoteTagClient;
use crate::context::ReconciliationContext;
use crate::error::{Phase, ReconcileError, RemoteError, Result, TagSyncError};
use crate::tags::{diff, IgnoreConfig, SystemTagPolicy, TagDiff, TagSet};

/// Tag reconciler bound to one client and one service.
pub struct Reconciler<'a, C: RemoteTagClient + ?Sized> {
    /// Remote tagging backend.
    client: &'a C,
    /// Reserved key policy.
    policy: &'a SystemTagPolicy,
    /// Service prefix the policy is evaluated for.
    service_prefix: String,
    /// Keys the user never wants managed.
    ignore: IgnoreConfig,
}

impl<'a, C: RemoteTagClient + ?Sized> Reconciler<'a, C> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        client: &'a C,
        policy: &'a SystemTagPolicy,
        service_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            policy,
            service_prefix: service_prefix.into(),
            ignore: IgnoreConfig::default(),
        }
    }

    /// Sets the user-level ignore list.
    #[must_use]
    pub fn with_ignore_config(mut self, ignore: IgnoreConfig) -> Self {
        self.ignore = ignore;
        self
    }

    /// Service prefix this reconciler works for.
    #[must_use]
    pub fn service_prefix(&self) -> &str {
        &self.service_prefix
    }

    /// Computes the changes `reconcile` would push, without any I/O.
    #[must_use]
    pub fn plan(&self, old: &TagSet, new: &TagSet) -> TagDiff {
        let planned = diff(old, new).filter_system(self.policy, &self.service_prefix);
        if self.ignore.is_empty() {
            return planned;
        }

        TagDiff {
            removed: self.ignore.apply(&planned.removed),
            updated: self.ignore.apply(&planned.updated),
        }
    }

    /// Converges the resource's tags from `old` to `new`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::RemoteCallFailed`] naming the phase whose
    /// remote call failed. A failed removal means nothing was changed; a
    /// failed upsert means removals were already applied.
    pub async fn reconcile(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
        old: &TagSet,
        new: &TagSet,
    ) -> Result<()> {
        let span = info_span!(
            "reconcile",
            operation_id = %ctx.operation_id(),
            identifier,
            service = %self.service_prefix,
        );

        self.apply(ctx, identifier, self.plan(old, new))
            .instrument(span)
            .await
    }

    /// Creates `tags` on a resource that has none to remove.
    ///
    /// Does nothing when `tags` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn create_tags(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
        tags: &TagSet,
    ) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }

        self.reconcile(ctx, identifier, &TagSet::new(), tags).await
    }

    /// Creates whatever tags the context declares.
    ///
    /// Does nothing when the context declares no tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn create_tags_from_context(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
    ) -> Result<()> {
        match ctx.declared_tags() {
            Some(tags) => self.create_tags(ctx, identifier, tags).await,
            None => {
                debug!("No declared tags in context for {identifier}");
                Ok(())
            }
        }
    }

    /// Lists the resource's tags and records them as the context's observed
    /// tags. Keys on the ignore list are dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote listing fails.
    pub async fn list_tags(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
    ) -> Result<TagSet> {
        let listed = ctx
            .guard(|| self.client.list_tags(ctx, identifier))
            .await?;

        let tags = self.ignore.apply(&listed);
        debug!(
            "Listed {} tag(s) on {identifier} ({} ignored)",
            tags.len(),
            listed.len() - tags.len()
        );

        ctx.set_observed_tags(tags.clone());
        Ok(tags)
    }

    async fn apply(
        &self,
        ctx: &ReconciliationContext,
        identifier: &str,
        planned: TagDiff,
    ) -> Result<()> {
        if planned.is_empty() {
            debug!("Tags already converged");
            return Ok(());
        }

        if !planned.removed.is_empty() {
            let keys = planned.removed.keys();
            info!("Removing {} tag(s): {planned}", keys.len());

            ctx.guard(|| self.client.remove_tags(ctx, identifier, &keys))
                .await
                .map_err(|cause| call_failed(Phase::Remove, identifier, cause))?;
        }

        if !planned.updated.is_empty() {
            info!("Writing {} tag(s)", planned.updated.len());

            ctx.guard(|| {
                self.client
                    .add_or_update_tags(ctx, identifier, &planned.updated)
            })
            .await
            .map_err(|cause| call_failed(Phase::Upsert, identifier, cause))?;
        }

        info!("Reconciled {} change(s)", planned.change_count());
        Ok(())
    }
}

fn call_failed(phase: Phase, identifier: &str, cause: RemoteError) -> TagSyncError {
    error!(%phase, "Remote call failed: {cause}");
    TagSyncError::Reconcile(ReconcileError::RemoteCallFailed {
        phase,
        identifier: identifier.to_string(),
        cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LocalTagStore, MockRemoteTagClient};
    use mockall::Sequence;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const ID: &str = "arn:aws:directconnect:us-east-1:123456789012:dxcon/dxcon-fg5678gh";
    const SERVICE: &str = "directconnect";

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(pairs.iter().copied()).expect("valid tags")
    }

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|k| (*k).to_string()).collect()
    }

    #[tokio::test]
    async fn test_converged_state_issues_no_calls() {
        let mut client = MockRemoteTagClient::new();
        client.expect_remove_tags().times(0);
        client.expect_add_or_update_tags().times(0);

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);
        let current = tags(&[("env", "prod"), ("team", "x")]);

        reconciler
            .reconcile(&ReconciliationContext::new(), ID, &current, &current)
            .await
            .expect("no-op reconcile");
    }

    #[tokio::test]
    async fn test_new_tags_are_upserted_only() {
        let mut client = MockRemoteTagClient::new();
        client.expect_remove_tags().times(0);
        client
            .expect_add_or_update_tags()
            .withf(|_, id, t| id == ID && *t == tags(&[("env", "prod")]))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);

        reconciler
            .reconcile(
                &ReconciliationContext::new(),
                ID,
                &TagSet::new(),
                &tags(&[("env", "prod")]),
            )
            .await
            .expect("reconcile");
    }

    #[tokio::test]
    async fn test_remove_runs_before_upsert() {
        let mut seq = Sequence::new();
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .withf(|_, id, k| id == ID && *k == keys(&["team"]))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        client
            .expect_add_or_update_tags()
            .withf(|_, id, t| id == ID && *t == tags(&[("env", "staging")]))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);

        reconciler
            .reconcile(
                &ReconciliationContext::new(),
                ID,
                &tags(&[("env", "prod"), ("team", "x")]),
                &tags(&[("env", "staging")]),
            )
            .await
            .expect("reconcile");
    }

    #[tokio::test]
    async fn test_reserved_keys_are_never_touched() {
        let mut client = MockRemoteTagClient::new();
        client.expect_remove_tags().times(0);
        client.expect_add_or_update_tags().times(0);

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);

        reconciler
            .reconcile(
                &ReconciliationContext::new(),
                ID,
                &tags(&[("aws:createdBy", "system")]),
                &TagSet::new(),
            )
            .await
            .expect("reserved keys only");
    }

    #[tokio::test]
    async fn test_service_specific_reserved_keys() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .withf(|_, _, k| *k == keys(&["owner"]))
            .times(1)
            .returning(|_, _, _| Ok(()));
        client.expect_add_or_update_tags().times(0);

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, "elasticbeanstalk");

        reconciler
            .reconcile(
                &ReconciliationContext::new(),
                ID,
                &tags(&[
                    ("Name", "env-1"),
                    ("elasticbeanstalk:environment-id", "e-123"),
                    ("owner", "ops"),
                ]),
                &TagSet::new(),
            )
            .await
            .expect("reconcile");
    }

    #[tokio::test]
    async fn test_remove_failure_skips_upsert() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .times(1)
            .returning(|_, _, _| Err(RemoteError::network("connection reset")));
        client.expect_add_or_update_tags().times(0);

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);

        let err = reconciler
            .reconcile(
                &ReconciliationContext::new(),
                ID,
                &tags(&[("team", "x")]),
                &tags(&[("env", "prod")]),
            )
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Remove));
        match err {
            TagSyncError::Reconcile(ReconcileError::RemoteCallFailed {
                identifier, cause, ..
            }) => {
                assert_eq!(identifier, ID);
                assert!(matches!(cause, RemoteError::NetworkError { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_upsert_failure_reports_upsert_phase() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .times(1)
            .returning(|_, _, _| Ok(()));
        client
            .expect_add_or_update_tags()
            .times(1)
            .returning(|_, _, _| Err(RemoteError::api_error(400, "too many tags")));

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);

        let err = reconciler
            .reconcile(
                &ReconciliationContext::new(),
                ID,
                &tags(&[("team", "x")]),
                &tags(&[("env", "prod")]),
            )
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Upsert));
        assert!(err.to_string().contains("tagging failed for resource"));
    }

    #[tokio::test]
    async fn test_cancelled_context_issues_no_calls() {
        let mut client = MockRemoteTagClient::new();
        client.expect_remove_tags().times(0);
        client.expect_add_or_update_tags().times(0);

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);
        let ctx = ReconciliationContext::new();
        ctx.cancel();

        let err = reconciler
            .reconcile(&ctx, ID, &tags(&[("team", "x")]), &tags(&[("env", "prod")]))
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Remove));
    }

    #[tokio::test]
    async fn test_cancel_after_remove_skips_upsert() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_remove_tags()
            .times(1)
            .returning(|ctx, _, _| {
                ctx.cancel();
                Ok(())
            });
        client.expect_add_or_update_tags().times(0);

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);

        let err = reconciler
            .reconcile(
                &ReconciliationContext::new(),
                ID,
                &tags(&[("team", "x")]),
                &tags(&[("env", "prod")]),
            )
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Upsert));
    }

    #[tokio::test]
    async fn test_create_tags_empty_is_noop() {
        let mut client = MockRemoteTagClient::new();
        client.expect_remove_tags().times(0);
        client.expect_add_or_update_tags().times(0);

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);
        let ctx = ReconciliationContext::new();

        reconciler
            .create_tags(&ctx, ID, &TagSet::new())
            .await
            .expect("empty create");
        reconciler
            .create_tags_from_context(&ctx, ID)
            .await
            .expect("nothing declared");
    }

    #[tokio::test]
    async fn test_create_tags_from_context() {
        let mut client = MockRemoteTagClient::new();
        client.expect_remove_tags().times(0);
        client
            .expect_add_or_update_tags()
            .withf(|_, _, t| *t == tags(&[("env", "prod")]))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&client, &policy, SERVICE);
        let ctx = ReconciliationContext::new().with_declared_tags(tags(&[("env", "prod")]));

        reconciler
            .create_tags_from_context(&ctx, ID)
            .await
            .expect("create from context");
    }

    #[tokio::test]
    async fn test_list_tags_records_observed() {
        let mut client = MockRemoteTagClient::new();
        client
            .expect_list_tags()
            .times(1)
            .returning(|_, _| Ok(tags(&[("env", "prod"), ("scratch:build", "42")])));

        let policy = SystemTagPolicy::new();
        let ignore = IgnoreConfig {
            keys: vec![],
            key_prefixes: vec![String::from("scratch:")],
        };
        let reconciler = Reconciler::new(&client, &policy, SERVICE).with_ignore_config(ignore);
        let root = ReconciliationContext::new();
        let child = root.with_declared_tags(TagSet::new());

        let listed = reconciler.list_tags(&child, ID).await.expect("list");

        assert_eq!(listed, tags(&[("env", "prod")]));
        assert_eq!(root.observed_tags(), Some(tags(&[("env", "prod")])));
        assert_eq!(root.observed_writes(), 1);
    }

    #[test]
    fn test_plan_respects_ignore_config() {
        let client = MockRemoteTagClient::new();
        let policy = SystemTagPolicy::new();
        let ignore = IgnoreConfig {
            keys: vec![String::from("CostCenter")],
            key_prefixes: vec![],
        };
        let reconciler = Reconciler::new(&client, &policy, SERVICE).with_ignore_config(ignore);

        let planned = reconciler.plan(
            &tags(&[("CostCenter", "1"), ("aws:x", "y"), ("team", "a")]),
            &tags(&[("team", "b")]),
        );

        assert!(planned.removed.is_empty());
        assert_eq!(planned.updated, tags(&[("team", "b")]));
    }

    #[tokio::test]
    async fn test_converges_against_local_store() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalTagStore::with_base_dir(temp_dir.path());
        let policy = SystemTagPolicy::new();
        let reconciler = Reconciler::new(&store, &policy, SERVICE);
        let ctx = ReconciliationContext::new();

        let old = tags(&[("env", "prod"), ("team", "x")]);
        let new = tags(&[("env", "staging"), ("owner", "ops")]);

        reconciler.create_tags(&ctx, ID, &old).await.expect("create");
        reconciler.reconcile(&ctx, ID, &old, &new).await.expect("reconcile");

        let listed = reconciler.list_tags(&ctx, ID).await.expect("list");
        assert_eq!(listed, new);
        assert!(reconciler.plan(&listed, &new).is_empty());
    }
}
