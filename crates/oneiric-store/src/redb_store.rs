use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use oneiric_domain::{ActivityRecord, Domain, Key};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::StoreError;
use crate::records::{TaskRecord, WorkflowCheckpoint};
use crate::store::RuntimeStore;

const ACTIVITY: TableDefinition<&str, &[u8]> = TableDefinition::new("activity");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");
const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
const CHECKPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoints");

/// Persistent runtime store backed by a single redb database file.
///
/// redb commits are durable (fsync) by default, so activity state written
/// before a crash is observed on the next start.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

fn internal(e: impl std::fmt::Display) -> StoreError {
    StoreError::Internal(e.to_string())
}

fn activity_key(domain: Domain, key: &Key) -> String {
    format!("{}/{}", domain, key)
}

impl RedbStore {
    /// Open (or create) a redb database at `path`.
    ///
    /// Parent directories are created automatically.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;

        // Ensure tables exist
        {
            let wtxn = db.begin_write().map_err(internal)?;
            wtxn.open_table(ACTIVITY).map_err(internal)?;
            wtxn.open_table(META).map_err(internal)?;
            wtxn.open_table(TASKS).map_err(internal)?;
            wtxn.open_table(CHECKPOINTS).map_err(internal)?;
            wtxn.commit().map_err(internal)?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    fn put_bytes(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut t = wtxn.open_table(table).map_err(internal)?;
            t.insert(key, bytes).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    fn get_bytes(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let t = rtxn.open_table(table).map_err(internal)?;
        Ok(t.get(key).map_err(internal)?.map(|g| g.value().to_vec()))
    }

    fn remove(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<bool, StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let removed = {
            let mut t = wtxn.open_table(table).map_err(internal)?;
            let existed = t.remove(key).map_err(internal)?.is_some();
            existed
        };
        wtxn.commit().map_err(internal)?;
        Ok(removed)
    }
}

#[async_trait]
impl RuntimeStore for RedbStore {
    async fn set_activity(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.put_bytes(ACTIVITY, &activity_key(record.domain, &record.key), &bytes)
    }

    async fn get_activity(
        &self,
        domain: Domain,
        key: &Key,
    ) -> Result<Option<ActivityRecord>, StoreError> {
        match self.get_bytes(ACTIVITY, &activity_key(domain, key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn activity_snapshot(&self) -> Result<Vec<ActivityRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(ACTIVITY).map_err(internal)?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            records.push(serde_json::from_slice(v.value())?);
        }
        Ok(records)
    }

    async fn prune_activity(
        &self,
        keep: &(dyn for<'a> Fn(&'a ActivityRecord) -> bool + Send + Sync),
    ) -> Result<usize, StoreError> {
        let snapshot = self.activity_snapshot().await?;
        let doomed: Vec<ActivityRecord> = snapshot.into_iter().filter(|r| !keep(r)).collect();

        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(ACTIVITY).map_err(internal)?;
            for record in &doomed {
                table
                    .remove(activity_key(record.domain, &record.key).as_str())
                    .map_err(internal)?;
            }
        }
        wtxn.commit().map_err(internal)?;
        Ok(doomed.len())
    }

    async fn set_manifest_digest(&self, url: &str, digest: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut t = wtxn.open_table(META).map_err(internal)?;
            t.insert(format!("manifest/{url}").as_str(), digest)
                .map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn get_manifest_digest(&self, url: &str) -> Result<Option<String>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let t = rtxn.open_table(META).map_err(internal)?;
        Ok(t.get(format!("manifest/{url}").as_str())
            .map_err(internal)?
            .map(|g| g.value().to_string()))
    }

    async fn put_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(task)?;
        self.put_bytes(TASKS, task.key.as_str(), &bytes)
    }

    async fn get_task(&self, key: &Key) -> Result<Option<TaskRecord>, StoreError> {
        match self.get_bytes(TASKS, key.as_str())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(TASKS).map_err(internal)?;
        let mut tasks = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            tasks.push(serde_json::from_slice(v.value())?);
        }
        Ok(tasks)
    }

    async fn delete_task(&self, key: &Key) -> Result<bool, StoreError> {
        self.remove(TASKS, key.as_str())
    }

    async fn put_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(checkpoint)?;
        self.put_bytes(CHECKPOINTS, &checkpoint.run_id.to_string(), &bytes)
    }

    async fn get_checkpoint(
        &self,
        run_id: Uuid,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        match self.get_bytes(CHECKPOINTS, &run_id.to_string())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_checkpoints(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(CHECKPOINTS).map_err(internal)?;
        let mut checkpoints = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            checkpoints.push(serde_json::from_slice(v.value())?);
        }
        Ok(checkpoints)
    }

    async fn delete_checkpoint(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.remove(CHECKPOINTS, &run_id.to_string())?;
        Ok(())
    }

    async fn set_workflow_idempotency(
        &self,
        idem_key: &str,
        run_id: Uuid,
    ) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut t = wtxn.open_table(META).map_err(internal)?;
            t.insert(format!("idem/{idem_key}").as_str(), run_id.to_string().as_str())
                .map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn get_workflow_idempotency(&self, idem_key: &str) -> Result<Option<Uuid>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let t = rtxn.open_table(META).map_err(internal)?;
        let raw = t
            .get(format!("idem/{idem_key}").as_str())
            .map_err(internal)?
            .map(|g| g.value().to_string());
        match raw {
            Some(s) => Uuid::parse_str(&s)
                .map(Some)
                .map_err(|e| StoreError::Internal(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oneiric_domain::ActivityState;
    use tempfile::TempDir;

    use crate::records::TaskSchedule;

    fn open_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(&dir.path().join("state.redb")).unwrap()
    }

    fn paused(key: &str) -> ActivityRecord {
        ActivityRecord {
            domain: Domain::Adapter,
            key: Key::new(key),
            state: ActivityState::Paused,
            since: Utc::now(),
            reason: Some("maintenance".to_string()),
        }
    }

    #[tokio::test]
    async fn activity_set_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.set_activity(&paused("cache")).await.unwrap();

        let got = store
            .get_activity(Domain::Adapter, &Key::new("cache"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.state, ActivityState::Paused);
        assert_eq!(got.reason.as_deref(), Some("maintenance"));
    }

    #[tokio::test]
    async fn activity_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store.set_activity(&paused("cache")).await.unwrap();
        }

        {
            let store = RedbStore::open(&path).unwrap();
            let got = store
                .get_activity(Domain::Adapter, &Key::new("cache"))
                .await
                .unwrap();
            assert!(got.is_some(), "activity should survive store reopen");
        }
    }

    #[tokio::test]
    async fn prune_removes_rejected_records() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.set_activity(&paused("a")).await.unwrap();
        store.set_activity(&paused("b")).await.unwrap();

        let removed = store
            .prune_activity(&|r| r.key.as_str() == "a")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_activity(Domain::Adapter, &Key::new("b")).await.unwrap().is_none());
        assert!(store.get_activity(Domain::Adapter, &Key::new("a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn manifest_digest_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let url = "https://example.com/manifest.json";
        assert!(store.get_manifest_digest(url).await.unwrap().is_none());
        store.set_manifest_digest(url, "abc123").await.unwrap();
        assert_eq!(store.get_manifest_digest(url).await.unwrap().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn tasks_round_trip_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let task = TaskRecord::new(
            Key::new("sweep"),
            TaskSchedule::Interval { seconds: 60 },
            serde_json::Value::Null,
            Utc::now(),
        );
        store.put_task(&task).await.unwrap();
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
        assert!(store.get_task(&Key::new("sweep")).await.unwrap().is_some());
        assert!(store.delete_task(&Key::new("sweep")).await.unwrap());
        assert!(!store.delete_task(&Key::new("sweep")).await.unwrap());
    }

    #[tokio::test]
    async fn checkpoints_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let run_id = Uuid::new_v4();
        let mut cp = WorkflowCheckpoint::new(
            run_id,
            Key::new("etl"),
            serde_json::json!({"n": 1}),
            Utc::now(),
        );
        cp.completed.push("extract".to_string());
        store.put_checkpoint(&cp).await.unwrap();

        let got = store.get_checkpoint(run_id).await.unwrap().unwrap();
        assert_eq!(got.completed, vec!["extract"]);

        store.delete_checkpoint(run_id).await.unwrap();
        assert!(store.get_checkpoint(run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idempotency_key_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let run_id = Uuid::new_v4();
        store.set_workflow_idempotency("req-1", run_id).await.unwrap();
        assert_eq!(store.get_workflow_idempotency("req-1").await.unwrap(), Some(run_id));
        assert!(store.get_workflow_idempotency("req-2").await.unwrap().is_none());
    }
}
