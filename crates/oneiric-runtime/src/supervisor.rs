use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use oneiric_domain::LifecycleState;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::runtime::Runtime;
use crate::snapshot::HealthSnapshot;

/// Background caretaker: polls instance health, completes drains, runs
/// due tasks and writes the periodic health snapshot.
pub struct Supervisor;

impl Supervisor {
    pub fn spawn(runtime: Arc<Runtime>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let cancel = runtime.cancel().clone();
            let settings = runtime.settings().supervisor.clone();

            let mut health_tick = tokio::time::interval(settings.health_poll);
            let mut snapshot_tick = tokio::time::interval(settings.snapshot_interval);
            let mut task_tick = tokio::time::interval(Duration::from_secs(1));

            debug!("supervisor running");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = health_tick.tick() => {
                        Self::poll_health(&runtime).await;
                        runtime.sweep_drains().await;
                    }
                    _ = snapshot_tick.tick() => {
                        Self::write_snapshot(&runtime).await;
                    }
                    _ = task_tick.tick() => {
                        if let Err(e) = runtime.tasks().run_due(Utc::now()).await {
                            warn!(error = %e, "task sweep failed");
                        }
                    }
                }
            }
            debug!("supervisor stopped");
        })
    }

    async fn poll_health(runtime: &Arc<Runtime>) {
        for status in runtime.lifecycle().status_all().await {
            if status.state == LifecycleState::Ready {
                runtime
                    .lifecycle()
                    .poll_health(status.domain, &status.key)
                    .await;
            }
        }
    }

    async fn write_snapshot(runtime: &Arc<Runtime>) {
        let Some(path) = runtime.settings().supervisor.snapshot_path.clone() else {
            return;
        };
        let snapshot = HealthSnapshot::from_entries(&runtime.lifecycle().status_all().await);
        if let Err(e) = snapshot.write_atomic(&path).await {
            warn!(path = %path.display(), error = %e, "health snapshot write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oneiric_config::Settings;
    use oneiric_domain::{Domain, Key};
    use oneiric_store::InMemoryStore;

    #[tokio::test]
    async fn supervisor_starts_services_and_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("health.json");

        let mut settings = Settings::default();
        settings.watcher.enabled = false;
        settings.services = vec!["heartbeat".to_string()];
        settings.supervisor.snapshot_path = Some(snapshot_path.clone());
        settings.supervisor.snapshot_interval = Duration::from_millis(100);
        settings.supervisor.health_poll = Duration::from_millis(100);

        let runtime = Runtime::build_with_store(settings, Arc::new(InMemoryStore::new()));
        runtime.boot().await.unwrap();

        // The heartbeat service was started at boot.
        let status = runtime
            .lifecycle()
            .entry_status(Domain::Service, &Key::new("heartbeat"))
            .await
            .unwrap();
        assert_eq!(status.state, LifecycleState::Ready);

        // Wait for a snapshot write.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if snapshot_path.exists() {
                break;
            }
        }
        let snapshot: HealthSnapshot =
            serde_json::from_slice(&std::fs::read(&snapshot_path).unwrap()).unwrap();
        assert!(snapshot.ok);
        assert!(snapshot
            .components
            .iter()
            .any(|c| c.name == "service/heartbeat"));

        runtime.shutdown().await;
    }
}
