use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use oneiric_domain::{ActivityRecord, Domain, Key};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::records::{TaskRecord, WorkflowCheckpoint};
use crate::store::RuntimeStore;

#[derive(Debug, Default)]
struct Inner {
    activity: HashMap<(Domain, Key), ActivityRecord>,
    manifest_digests: HashMap<String, String>,
    tasks: HashMap<Key, TaskRecord>,
    checkpoints: HashMap<Uuid, WorkflowCheckpoint>,
    idempotency: HashMap<String, Uuid>,
}

/// In-memory implementation of [`RuntimeStore`].
///
/// All data is lost on process exit. Suitable for tests and ephemeral runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeStore for InMemoryStore {
    async fn set_activity(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .activity
            .insert((record.domain, record.key.clone()), record.clone());
        Ok(())
    }

    async fn get_activity(
        &self,
        domain: Domain,
        key: &Key,
    ) -> Result<Option<ActivityRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.activity.get(&(domain, key.clone())).cloned())
    }

    async fn activity_snapshot(&self) -> Result<Vec<ActivityRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.activity.values().cloned().collect())
    }

    async fn prune_activity(
        &self,
        keep: &(dyn for<'a> Fn(&'a ActivityRecord) -> bool + Send + Sync),
    ) -> Result<usize, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.activity.len();
        guard.activity.retain(|_, r| keep(r));
        Ok(before - guard.activity.len())
    }

    async fn set_manifest_digest(&self, url: &str, digest: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.manifest_digests.insert(url.to_string(), digest.to_string());
        Ok(())
    }

    async fn get_manifest_digest(&self, url: &str) -> Result<Option<String>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.manifest_digests.get(url).cloned())
    }

    async fn put_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.tasks.insert(task.key.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, key: &Key) -> Result<Option<TaskRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.tasks.get(key).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.tasks.values().cloned().collect())
    }

    async fn delete_task(&self, key: &Key) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.tasks.remove(key).is_some())
    }

    async fn put_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.checkpoints.insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        run_id: Uuid,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.checkpoints.get(&run_id).cloned())
    }

    async fn list_checkpoints(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.checkpoints.values().cloned().collect())
    }

    async fn delete_checkpoint(&self, run_id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.checkpoints.remove(&run_id);
        Ok(())
    }

    async fn set_workflow_idempotency(
        &self,
        idem_key: &str,
        run_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.idempotency.insert(idem_key.to_string(), run_id);
        Ok(())
    }

    async fn get_workflow_idempotency(&self, idem_key: &str) -> Result<Option<Uuid>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.idempotency.get(idem_key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oneiric_domain::ActivityState;

    #[tokio::test]
    async fn activity_set_get_prune() {
        let store = InMemoryStore::new();
        store
            .set_activity(&ActivityRecord {
                domain: Domain::Adapter,
                key: Key::new("cache"),
                state: ActivityState::Draining,
                since: Utc::now(),
                reason: None,
            })
            .await
            .unwrap();

        let got = store
            .get_activity(Domain::Adapter, &Key::new("cache"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.state, ActivityState::Draining);

        let removed = store.prune_activity(&|_| false).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.activity_snapshot().await.unwrap().is_empty());
    }
}
