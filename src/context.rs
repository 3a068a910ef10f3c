//! Request-scoped reconciliation context.
//!
//! A [`ReconciliationContext`] is created once per top-level operation. It
//! carries the tags the caller wants applied ("in") down into the engine
//! and the tags the engine observed ("out") back up to the caller, without
//! threading them through every signature. It also carries the operation's
//! cancellation flag and deadline, which the reconciler honors before and
//! around each remote call.
//!
//! Derived contexts share the observed slot and the cancellation flag with
//! their parent, so a value recorded deep in a call tree is visible at the
//! root. Contexts must not be shared between concurrent operations.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::error::{RemoteError, RemoteResult};
use crate::tags::TagSet;

/// Carrier for declared and observed tags of one operation.
#[derive(Debug, Clone)]
pub struct ReconciliationContext {
    /// Identifier of the top-level operation, shared by derived contexts.
    operation_id: Uuid,
    /// Tags the caller intends to push.
    declared: Option<TagSet>,
    /// Tags observed by the engine.
    observed: Arc<ObservedSlot>,
    /// Cancellation flag.
    cancelled: Arc<AtomicBool>,
    /// Deadline for remote calls.
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct ObservedSlot {
    tags: Mutex<Option<TagSet>>,
    writes: AtomicUsize,
}

impl ReconciliationContext {
    /// Creates a root context for a new operation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            declared: None,
            observed: Arc::new(ObservedSlot::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Returns a derived context carrying `tags` as the declared tags.
    ///
    /// The receiver is left untouched.
    #[must_use]
    pub fn with_declared_tags(&self, tags: TagSet) -> Self {
        Self {
            declared: Some(tags),
            ..self.clone()
        }
    }

    /// Returns a derived context whose remote calls must finish within
    /// `timeout`. An earlier deadline inherited from the parent is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            ..self.clone()
        }
    }

    /// Identifier of the operation this context belongs to.
    #[must_use]
    pub const fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Tags the caller intends to push, if any.
    #[must_use]
    pub const fn declared_tags(&self) -> Option<&TagSet> {
        self.declared.as_ref()
    }

    /// Tags recorded by [`set_observed_tags`](Self::set_observed_tags).
    #[must_use]
    pub fn observed_tags(&self) -> Option<TagSet> {
        self.observed
            .tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the tags the engine observed.
    ///
    /// The last write wins. Writing more than once per operation is a
    /// caller bug; it is logged and counted, not prevented.
    pub fn set_observed_tags(&self, tags: TagSet) {
        let previous = self.observed.writes.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            warn!(
                operation_id = %self.operation_id,
                writes = previous + 1,
                "Observed tags set more than once in one operation"
            );
        }

        *self
            .observed
            .tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tags);
    }

    /// Number of times observed tags were recorded in this operation.
    #[must_use]
    pub fn observed_writes(&self) -> usize {
        self.observed.writes.load(Ordering::SeqCst)
    }

    /// Cancels the operation. Remote calls not yet started are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Deadline for remote calls, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Runs a remote call under this context's cancellation and deadline.
    ///
    /// `call` is not invoked at all when the context is already cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Cancelled`] if the context was cancelled
    /// before the call started, [`RemoteError::DeadlineExceeded`] if the
    /// deadline passed, or whatever the call itself returned.
    pub async fn guard<T, F, Fut>(&self, call: F) -> RemoteResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        if self.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call())
                .await
                .map_err(|_| RemoteError::DeadlineExceeded)?,
            None => call().await,
        }
    }
}

impl Default for ReconciliationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(pairs.iter().copied()).expect("valid tags")
    }

    #[test]
    fn test_declared_tags_do_not_leak_to_parent() {
        let root = ReconciliationContext::new();
        let child = root.with_declared_tags(tags(&[("env", "prod")]));

        assert!(root.declared_tags().is_none());
        assert_eq!(child.declared_tags(), Some(&tags(&[("env", "prod")])));
        assert_eq!(child.operation_id(), root.operation_id());
    }

    #[test]
    fn test_observed_absent_until_set() {
        let ctx = ReconciliationContext::new();
        assert!(ctx.observed_tags().is_none());
        assert_eq!(ctx.observed_writes(), 0);
    }

    #[test]
    fn test_observed_visible_to_ancestors() {
        let root = ReconciliationContext::new();
        let child = root.with_declared_tags(TagSet::new());
        let grandchild = child.with_declared_tags(tags(&[("a", "1")]));

        grandchild.set_observed_tags(tags(&[("env", "prod")]));

        assert_eq!(root.observed_tags(), Some(tags(&[("env", "prod")])));
        assert_eq!(child.observed_tags(), Some(tags(&[("env", "prod")])));
    }

    #[test]
    fn test_repeated_observed_write_is_flagged() {
        let ctx = ReconciliationContext::new();

        ctx.set_observed_tags(tags(&[("v", "1")]));
        ctx.set_observed_tags(tags(&[("v", "2")]));

        // Last writer wins, but the double write is visible to the caller.
        assert_eq!(ctx.observed_tags(), Some(tags(&[("v", "2")])));
        assert_eq!(ctx.observed_writes(), 2);
    }

    #[test]
    fn test_separate_operations_do_not_share_state() {
        let a = ReconciliationContext::new();
        let b = ReconciliationContext::new();

        a.set_observed_tags(tags(&[("x", "1")]));
        a.cancel();

        assert!(b.observed_tags().is_none());
        assert!(!b.is_cancelled());
        assert_ne!(a.operation_id(), b.operation_id());
    }

    #[test]
    fn test_timeout_keeps_earlier_deadline() {
        let ctx = ReconciliationContext::new().with_timeout(Duration::from_secs(1));
        let relaxed = ctx.with_timeout(Duration::from_secs(60));

        assert_eq!(relaxed.deadline(), ctx.deadline());
    }

    #[tokio::test]
    async fn test_guard_cancelled() {
        let ctx = ReconciliationContext::new();
        let child = ctx.with_declared_tags(TagSet::new());
        ctx.cancel();

        let result = child.guard(|| async { Ok::<_, RemoteError>(()) }).await;
        assert!(matches!(result, Err(RemoteError::Cancelled)));
    }

    #[tokio::test]
    async fn test_guard_deadline() {
        let ctx = ReconciliationContext::new().with_timeout(Duration::from_millis(10));

        let result = ctx
            .guard(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, RemoteError>(())
            })
            .await;
        assert!(matches!(result, Err(RemoteError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_guard_passes_through() {
        let ctx = ReconciliationContext::new().with_timeout(Duration::from_secs(5));

        let ok = ctx.guard(|| async { Ok::<_, RemoteError>(7) }).await;
        assert_eq!(ok.ok(), Some(7));

        let err = ctx
            .guard(|| async { Err::<(), _>(RemoteError::network("reset")) })
            .await;
        assert!(matches!(err, Err(RemoteError::NetworkError { .. })));
    }
}
