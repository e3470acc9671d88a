use async_trait::async_trait;
use oneiric_domain::{ActivityRecord, Domain, Key};
use uuid::Uuid;

use crate::error::StoreError;
use crate::records::{TaskRecord, WorkflowCheckpoint};

/// Durable runtime state: per-key activity, applied-manifest digests,
/// scheduled tasks and workflow checkpoints.
///
/// Writes must be crash-consistent (observable after an unclean restart).
/// No cross-key transactions are required; activity writes are
/// linearizable per key.
#[async_trait]
pub trait RuntimeStore: Send + Sync + 'static {
    // ── Activity ──────────────────────────────────────────────────────────────

    async fn set_activity(&self, record: &ActivityRecord) -> Result<(), StoreError>;

    async fn get_activity(
        &self,
        domain: Domain,
        key: &Key,
    ) -> Result<Option<ActivityRecord>, StoreError>;

    async fn activity_snapshot(&self) -> Result<Vec<ActivityRecord>, StoreError>;

    /// Remove records the predicate rejects. Returns how many were removed.
    async fn prune_activity(
        &self,
        keep: &(dyn for<'a> Fn(&'a ActivityRecord) -> bool + Send + Sync),
    ) -> Result<usize, StoreError>;

    // ── Remote manifests ──────────────────────────────────────────────────────

    async fn set_manifest_digest(&self, url: &str, digest: &str) -> Result<(), StoreError>;

    async fn get_manifest_digest(&self, url: &str) -> Result<Option<String>, StoreError>;

    // ── Scheduled tasks ───────────────────────────────────────────────────────

    async fn put_task(&self, task: &TaskRecord) -> Result<(), StoreError>;

    async fn get_task(&self, key: &Key) -> Result<Option<TaskRecord>, StoreError>;

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StoreError>;

    async fn delete_task(&self, key: &Key) -> Result<bool, StoreError>;

    // ── Workflow checkpoints ──────────────────────────────────────────────────

    async fn put_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StoreError>;

    async fn get_checkpoint(&self, run_id: Uuid) -> Result<Option<WorkflowCheckpoint>, StoreError>;

    async fn list_checkpoints(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError>;

    async fn delete_checkpoint(&self, run_id: Uuid) -> Result<(), StoreError>;

    // ── Workflow idempotency ──────────────────────────────────────────────────

    /// Remember the run id accepted for an idempotency key; repeated
    /// submissions with the same key return the same run.
    async fn set_workflow_idempotency(&self, idem_key: &str, run_id: Uuid)
        -> Result<(), StoreError>;

    async fn get_workflow_idempotency(&self, idem_key: &str) -> Result<Option<Uuid>, StoreError>;
}
