use std::path::Path;

use chrono::{DateTime, Utc};
use oneiric_domain::LifecycleState;
use oneiric_lifecycle::EntryStatus;
use serde::{Deserialize, Serialize};

/// Point-in-time health of every activated slot, written atomically to
/// the snapshot file and served by `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// `ok` or `degraded`.
    pub status: String,
    pub ok: bool,
    pub generated_at: DateTime<Utc>,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// `domain/key`.
    pub name: String,
    pub status: String,
    pub ok: bool,
    pub detail: String,
    pub since: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    /// Build from lifecycle entries. Idle slots are not activated and do
    /// not appear. Ready slots must have a passing last health check;
    /// paused and draining slots count as ok (resident and winding down by
    /// request), failed and mid-transition slots do not.
    pub fn from_entries(entries: &[EntryStatus]) -> Self {
        let components: Vec<ComponentHealth> = entries
            .iter()
            .filter(|e| e.state != LifecycleState::Idle)
            .map(|e| {
                let health_ok = e.last_health.as_ref().map_or(true, |h| h.ok);
                let ok = match e.state {
                    LifecycleState::Ready => health_ok,
                    LifecycleState::Paused | LifecycleState::Draining => true,
                    _ => false,
                };
                let detail = e
                    .last_error
                    .clone()
                    .or_else(|| e.last_health.as_ref().map(|h| h.detail.clone()))
                    .unwrap_or_default();
                ComponentHealth {
                    name: format!("{}/{}", e.domain, e.key),
                    status: e.state.to_string(),
                    ok,
                    detail,
                    since: e.last_health.as_ref().map(|h| h.at),
                }
            })
            .collect();

        let ok = components.iter().all(|c| c.ok);
        Self {
            status: if ok { "ok" } else { "degraded" }.to_string(),
            ok,
            generated_at: Utc::now(),
            components,
        }
    }

    /// Write-temp-then-rename so readers never observe a torn snapshot.
    pub async fn write_atomic(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oneiric_domain::{Domain, Key};
    use oneiric_lifecycle::HealthRecord;

    fn entry(state: LifecycleState, health_ok: Option<bool>) -> EntryStatus {
        EntryStatus {
            domain: Domain::Adapter,
            key: Key::new("cache"),
            state,
            provider: Some("memory".to_string()),
            last_health: health_ok.map(|ok| HealthRecord {
                ok,
                detail: String::new(),
                at: Utc::now(),
            }),
            last_swap: None,
            last_error: None,
        }
    }

    #[test]
    fn empty_snapshot_is_ok() {
        let snap = HealthSnapshot::from_entries(&[]);
        assert!(snap.ok);
        assert_eq!(snap.status, "ok");
    }

    #[test]
    fn idle_entries_excluded_failed_entries_degrade() {
        let snap = HealthSnapshot::from_entries(&[
            entry(LifecycleState::Idle, None),
            entry(LifecycleState::Ready, Some(true)),
        ]);
        assert!(snap.ok);
        assert_eq!(snap.components.len(), 1);

        let snap = HealthSnapshot::from_entries(&[entry(LifecycleState::Failed, None)]);
        assert!(!snap.ok);
        assert_eq!(snap.status, "degraded");
    }

    #[test]
    fn ready_with_failing_health_degrades() {
        let snap = HealthSnapshot::from_entries(&[entry(LifecycleState::Ready, Some(false))]);
        assert!(!snap.ok);
    }

    #[tokio::test]
    async fn atomic_write_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.json");
        let snap = HealthSnapshot::from_entries(&[entry(LifecycleState::Ready, Some(true))]);
        snap.write_atomic(&path).await.unwrap();

        let read: HealthSnapshot =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert!(read.ok);
        assert_eq!(read.components.len(), 1);
    }
}
