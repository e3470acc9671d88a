use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use oneiric_domain::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ── Task scheduling ───────────────────────────────────────────────────────────

/// When a scheduled task should fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSchedule {
    /// Fixed interval between runs.
    Interval { seconds: u64 },
    /// Once per day at the given UTC wall-clock time.
    Daily { hour: u32, minute: u32 },
}

impl TaskSchedule {
    /// The first fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TaskSchedule::Interval { seconds } => now + Duration::seconds(*seconds as i64),
            TaskSchedule::Daily { hour, minute } => {
                let today = now
                    .with_hour(*hour)
                    .and_then(|t| t.with_minute(*minute))
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(now);
                if today > now {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }
}

/// A persisted task registration. Survives restarts; the supervisor polls
/// for due tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task slot key in the `task` domain.
    pub key: Key,
    /// Provider override; `None` resolves normally.
    pub provider: Option<String>,
    pub schedule: TaskSchedule,
    /// Arguments handed to the task instance on each run.
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub enabled: bool,
}

impl TaskRecord {
    pub fn new(key: Key, schedule: TaskSchedule, payload: Value, now: DateTime<Utc>) -> Self {
        let next_run = schedule.next_after(now);
        Self {
            key,
            provider: None,
            schedule,
            payload,
            created_at: now,
            last_run: None,
            next_run,
            enabled: true,
        }
    }

    /// Record a completed run and advance `next_run`.
    pub fn mark_ran(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.next_run = self.schedule.next_after(now);
    }
}

// ── Workflow checkpoints ──────────────────────────────────────────────────────

/// Durable progress of one workflow run. Written after every completed
/// node so `resume` can skip finished work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub run_id: Uuid,
    pub workflow: Key,
    #[serde(default)]
    pub inputs: Value,
    /// Node ids that have completed, in execution order.
    pub completed: Vec<String>,
    /// Output value per completed node.
    pub node_outputs: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished: bool,
}

impl WorkflowCheckpoint {
    pub fn new(run_id: Uuid, workflow: Key, inputs: Value, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            workflow,
            inputs,
            completed: Vec::new(),
            node_outputs: BTreeMap::new(),
            started_at: now,
            updated_at: now,
            finished: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_next_after_adds_seconds() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let s = TaskSchedule::Interval { seconds: 300 };
        assert_eq!(s.next_after(now), now + Duration::seconds(300));
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_past() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let s = TaskSchedule::Daily { hour: 9, minute: 30 };
        let next = s.next_after(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap());

        let early = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(s.next_after(early), Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn mark_ran_advances_next_run() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut task = TaskRecord::new(
            Key::new("sweep"),
            TaskSchedule::Interval { seconds: 60 },
            Value::Null,
            now,
        );
        let later = now + Duration::seconds(61);
        task.mark_ran(later);
        assert_eq!(task.last_run, Some(later));
        assert_eq!(task.next_run, later + Duration::seconds(60));
    }
}
