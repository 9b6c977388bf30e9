use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// A `good_jobs` row. State is never stored directly; callers derive it
/// with [`Job::state`] from the timestamp/lock columns per spec §3.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub external_job_id: Uuid,

    pub job_class: String,
    pub queue_name: String,
    pub priority: Option<i32>,

    pub payload: Value,

    pub scheduled_at: Option<DateTime<Utc>>,
    pub performed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub locked_by_id: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,

    pub executions_count: i32,
    pub error: Option<String>,

    pub concurrency_key: Option<String>,
    pub labels: Option<Vec<String>>,

    pub cron_key: Option<String>,
    pub cron_at: Option<DateTime<Utc>>,

    pub batch_id: Option<Uuid>,
    pub retried_from_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived classification of a job row (spec §3 invariant 1, GLOSSARY
/// "State"). Never persisted — always recomputed from the row at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Scheduled,
    Queued,
    Running,
    Succeeded,
    Discarded,
    Retried,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Discarded => "discarded",
            JobState::Retried => "retried",
        }
    }
}

impl Job {
    pub fn state(&self, now: DateTime<Utc>) -> JobState {
        if self.finished_at.is_none() && self.retried_from_id.is_some() {
            return JobState::Retried;
        }
        if let Some(finished_at) = self.finished_at {
            let _ = finished_at;
            return if self.error.is_none() {
                JobState::Succeeded
            } else {
                JobState::Discarded
            };
        }
        if self.performed_at.is_some() && self.locked_by_id.is_some() {
            return JobState::Running;
        }
        if let Some(scheduled_at) = self.scheduled_at {
            if scheduled_at > now {
                return JobState::Scheduled;
            }
        }
        JobState::Queued
    }
}

/// Fields required to insert a new `good_jobs` row (spec §4.1 enqueue).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_class: String,
    pub queue_name: String,
    pub priority: Option<i32>,
    pub payload: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub concurrency_key: Option<String>,
    pub labels: Option<Vec<String>>,
    pub cron_key: Option<String>,
    pub cron_at: Option<DateTime<Utc>>,
    pub batch_id: Option<Uuid>,
}

impl NewJob {
    pub fn new(job_class: impl Into<String>, queue_name: impl Into<String>, payload: Value) -> Self {
        Self {
            job_class: job_class.into(),
            queue_name: queue_name.into(),
            priority: None,
            payload,
            scheduled_at: None,
            concurrency_key: None,
            labels: None,
            cron_key: None,
            cron_at: None,
            batch_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_job(now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            external_job_id: Uuid::new_v4(),
            job_class: "Echo".to_string(),
            queue_name: "default".to_string(),
            priority: None,
            payload: Value::Null,
            scheduled_at: None,
            performed_at: None,
            finished_at: None,
            locked_by_id: None,
            locked_at: None,
            executions_count: 0,
            error: None,
            concurrency_key: None,
            labels: None,
            cron_key: None,
            cron_at: None,
            batch_id: None,
            retried_from_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn classifies_scheduled_vs_queued() {
        let now = Utc::now();
        let mut job = base_job(now);
        job.scheduled_at = Some(now + Duration::seconds(60));
        assert_eq!(job.state(now), JobState::Scheduled);

        job.scheduled_at = Some(now - Duration::seconds(60));
        assert_eq!(job.state(now), JobState::Queued);
    }

    #[test]
    fn classifies_running() {
        let now = Utc::now();
        let mut job = base_job(now);
        job.performed_at = Some(now);
        job.locked_by_id = Some(Uuid::new_v4());
        assert_eq!(job.state(now), JobState::Running);
    }

    #[test]
    fn classifies_succeeded_and_discarded() {
        let now = Utc::now();
        let mut job = base_job(now);
        job.finished_at = Some(now);
        assert_eq!(job.state(now), JobState::Succeeded);

        job.error = Some("boom".to_string());
        assert_eq!(job.state(now), JobState::Discarded);
    }

    #[test]
    fn classifies_retried() {
        let now = Utc::now();
        let mut job = base_job(now);
        job.retried_from_id = Some(Uuid::new_v4());
        assert_eq!(job.state(now), JobState::Retried);
    }
}
