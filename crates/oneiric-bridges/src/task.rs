use std::sync::Arc;

use chrono::{DateTime, Utc};
use oneiric_domain::{Domain, Key};
use oneiric_lifecycle::{CancelToken, LifecycleManager};
use oneiric_store::{RuntimeStore, TaskRecord, TaskSchedule};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::activity::check_activity;
use crate::error::BridgeError;

/// Task facade: a persisted interval/daily planner. Schedules survive
/// restarts; the supervisor calls [`run_due`](Self::run_due) on a timer.
#[derive(Clone)]
pub struct TaskBridge {
    lifecycle: Arc<LifecycleManager>,
    store: Arc<dyn RuntimeStore>,
    cancel: CancelToken,
}

impl TaskBridge {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        store: Arc<dyn RuntimeStore>,
        cancel: CancelToken,
    ) -> Self {
        Self { lifecycle, store, cancel }
    }

    /// Persist a schedule for a task key. Re-scheduling an existing key
    /// replaces its plan.
    pub async fn schedule(
        &self,
        key: Key,
        schedule: TaskSchedule,
        payload: Value,
    ) -> Result<TaskRecord, BridgeError> {
        check_activity(&self.store, Domain::Task, &key).await?;
        let record = TaskRecord::new(key, schedule, payload, Utc::now());
        self.store.put_task(&record).await?;
        info!(key = %record.key, next_run = %record.next_run, "task scheduled");
        Ok(record)
    }

    /// Remove a schedule. Returns whether one existed.
    pub async fn cancel(&self, key: &Key) -> Result<bool, BridgeError> {
        let removed = self.store.delete_task(key).await?;
        if removed {
            info!(key = %key, "task cancelled");
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<TaskRecord>, BridgeError> {
        Ok(self.store.list_tasks().await?)
    }

    /// Enabled tasks whose `next_run` has passed.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, BridgeError> {
        Ok(self
            .store
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| t.enabled && t.next_run <= now)
            .collect())
    }

    /// Run every due task once. Paused/draining tasks are skipped with a
    /// notice; a failing task run is logged and its schedule still
    /// advances, so one bad run cannot wedge the planner.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize, BridgeError> {
        let mut ran = 0;
        for mut record in self.due(now).await? {
            if let Err(e) = check_activity(&self.store, Domain::Task, &record.key).await {
                debug!(key = %record.key, reason = %e, "skipping task");
                continue;
            }

            let outcome = async {
                let instance = self
                    .lifecycle
                    .ensure_ready(Domain::Task, &record.key, &self.cancel)
                    .await?;
                instance
                    .invoke("run", record.payload.clone())
                    .await
                    .map_err(|e| BridgeError::InvokeFailed {
                        key: record.key.clone(),
                        op: "run".to_string(),
                        reason: e.to_string(),
                    })
            }
            .await;

            match outcome {
                Ok(_) => {
                    debug!(key = %record.key, "task ran");
                    ran += 1;
                }
                Err(e) => warn!(key = %record.key, error = %e, "task run failed"),
            }

            record.mark_ran(now);
            self.store.put_task(&record).await?;
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;
    use oneiric_domain::{ActivityRecord, ActivityState, Candidate, Source};
    use oneiric_lifecycle::{
        FactoryRegistry, LifecycleConfig, LifecycleManager, ProviderInstance,
    };
    use oneiric_resolver::Resolver;
    use oneiric_security::FactoryAllowlist;
    use oneiric_store::InMemoryStore;
    use serde_json::json;

    struct CountingTask {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ProviderInstance for CountingTask {
        async fn invoke(
            &self,
            _op: &str,
            _args: Value,
        ) -> Result<Value, oneiric_lifecycle::BoxError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn fixture() -> (TaskBridge, Arc<InMemoryStore>, Arc<AtomicUsize>) {
        let resolver = Arc::new(Resolver::new());
        let factories = Arc::new(FactoryRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let run_counter = runs.clone();
        factories.register("oneiric.tasks.sweep:build", move |_| {
            let runs = run_counter.clone();
            async move { Ok(Arc::new(CountingTask { runs }) as Arc<dyn ProviderInstance>) }
        });

        resolver.register(Candidate {
            domain: Domain::Task,
            key: Key::new("sweep"),
            provider: "builtin".to_string(),
            factory: "oneiric.tasks.sweep:build".to_string(),
            priority: 0,
            stack_level: 0,
            source: Source::Inline,
            settings: Value::Null,
            capabilities: Default::default(),
            metadata: Default::default(),
        });

        let store = Arc::new(InMemoryStore::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            resolver,
            factories,
            Arc::new(FactoryAllowlist::builtin()),
            LifecycleConfig::default(),
        ));
        let bridge = TaskBridge::new(
            lifecycle,
            store.clone() as Arc<dyn RuntimeStore>,
            CancelToken::new(),
        );
        (bridge, store, runs)
    }

    #[tokio::test]
    async fn schedule_persists_and_cancel_removes() {
        let (bridge, store, _) = fixture();
        bridge
            .schedule(
                Key::new("sweep"),
                TaskSchedule::Interval { seconds: 60 },
                json!({"depth": 3}),
            )
            .await
            .unwrap();
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);

        assert!(bridge.cancel(&Key::new("sweep")).await.unwrap());
        assert!(!bridge.cancel(&Key::new("sweep")).await.unwrap());
    }

    #[tokio::test]
    async fn run_due_invokes_and_reschedules() {
        let (bridge, _, runs) = fixture();
        let record = bridge
            .schedule(Key::new("sweep"), TaskSchedule::Interval { seconds: 60 }, Value::Null)
            .await
            .unwrap();

        // Not yet due.
        assert_eq!(bridge.run_due(Utc::now()).await.unwrap(), 0);

        let later = record.next_run + ChronoDuration::seconds(1);
        assert_eq!(bridge.run_due(later).await.unwrap(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Rescheduled relative to the run time, so it is no longer due.
        assert_eq!(bridge.run_due(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn paused_task_not_run() {
        let (bridge, store, runs) = fixture();
        let record = bridge
            .schedule(Key::new("sweep"), TaskSchedule::Interval { seconds: 60 }, Value::Null)
            .await
            .unwrap();
        store
            .set_activity(&ActivityRecord {
                domain: Domain::Task,
                key: Key::new("sweep"),
                state: ActivityState::Paused,
                since: Utc::now(),
                reason: None,
            })
            .await
            .unwrap();

        let later = record.next_run + ChronoDuration::seconds(1);
        assert_eq!(bridge.run_due(later).await.unwrap(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
