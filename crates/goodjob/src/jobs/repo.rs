use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{GoodJobError, Result};
use crate::jobs::model::{Job, JobState, NewJob};
use crate::notifier::CHANNEL;

/// All reads and writes to `good_jobs` go through this store (spec §3
/// "Store"). Every UPDATE is scoped with a `finished_at IS NULL` or
/// `locked_by_id = $n` guard so a lifeline rescue racing a normal
/// completion can never resurrect or overwrite a row that just finished.
#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

const CANONICAL_ORDER: &str =
    "priority ASC NULLS LAST, COALESCE(scheduled_at, created_at) ASC, created_at ASC, id ASC";

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn enqueue(&self, job: NewJob) -> Result<Job> {
        let mut tx = self.pool.begin().await.map_err(GoodJobError::Database)?;

        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO good_jobs (
                job_class, queue_name, priority, payload, scheduled_at,
                concurrency_key, labels, cron_key, cron_at, batch_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&job.job_class)
        .bind(&job.queue_name)
        .bind(job.priority)
        .bind(&job.payload)
        .bind(job.scheduled_at)
        .bind(&job.concurrency_key)
        .bind(&job.labels)
        .bind(&job.cron_key)
        .bind(job.cron_at)
        .bind(job.batch_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(GoodJobError::Database)?;

        notify(&mut *tx, &inserted).await?;
        tx.commit().await.map_err(GoodJobError::Database)?;
        Ok(inserted)
    }

    /// Enqueue, but silently no-op when `(cron_key, cron_at)` already
    /// exists (spec §4.7 cron dedup). Returns `None` when the firing was a
    /// duplicate.
    pub async fn enqueue_cron(&self, job: NewJob) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await.map_err(GoodJobError::Database)?;

        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO good_jobs (
                job_class, queue_name, priority, payload, scheduled_at,
                concurrency_key, labels, cron_key, cron_at, batch_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (cron_key, cron_at) WHERE cron_key IS NOT NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&job.job_class)
        .bind(&job.queue_name)
        .bind(job.priority)
        .bind(&job.payload)
        .bind(job.scheduled_at)
        .bind(&job.concurrency_key)
        .bind(&job.labels)
        .bind(&job.cron_key)
        .bind(job.cron_at)
        .bind(job.batch_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(GoodJobError::Database)?;

        if let Some(inserted) = &inserted {
            notify(&mut *tx, inserted).await?;
        }
        tx.commit().await.map_err(GoodJobError::Database)?;
        Ok(inserted)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM good_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(GoodJobError::Database)
    }

    pub async fn find_by_external_id(&self, external_job_id: Uuid) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM good_jobs WHERE external_job_id = $1")
            .bind(external_job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(GoodJobError::Database)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let res = sqlx::query("DELETE FROM good_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(GoodJobError::Database)?;
        Ok(res.rows_affected() > 0)
    }

    /// Materialize a retry as a brand-new row pointing back at `id`
    /// (spec's "retried-from" pattern, §4.1). The original row is left
    /// untouched — this is distinct from the ordinary in-place backoff
    /// retry the executor performs after a failed attempt.
    pub async fn retry(&self, id: Uuid) -> Result<Job> {
        let src = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| GoodJobError::JobFailure {
                reason: format!("job {id} not found"),
            })?;

        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO good_jobs (
                job_class, queue_name, priority, payload, scheduled_at,
                concurrency_key, labels, batch_id, retried_from_id
            )
            VALUES ($1, $2, $3, $4, now(), $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&src.job_class)
        .bind(&src.queue_name)
        .bind(src.priority)
        .bind(&src.payload)
        .bind(&src.concurrency_key)
        .bind(&src.labels)
        .bind(src.batch_id)
        .bind(src.id)
        .fetch_one(&self.pool)
        .await
        .map_err(GoodJobError::Database)
    }

    /// Unfinished rows eligible right now, in canonical dequeue order
    /// (spec §3 "Canonical ordering"), optionally restricted to a set of
    /// queues.
    pub async fn dequeueing_ordered(&self, queue_names: &[String], limit: i64) -> Result<Vec<Job>> {
        let query = format!(
            r#"
            SELECT * FROM good_jobs
            WHERE finished_at IS NULL
              AND performed_at IS NULL
              AND (scheduled_at IS NULL OR scheduled_at <= now())
              AND ($1::text[] IS NULL OR cardinality($1::text[]) = 0 OR queue_name = ANY($1))
            ORDER BY {CANONICAL_ORDER}
            LIMIT $2
            "#
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(queue_names)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(GoodJobError::Database)
    }

    pub async fn in_queue(&self, queue_name: &str) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM good_jobs WHERE queue_name = $1 AND finished_at IS NULL",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await
        .map_err(GoodJobError::Database)
    }

    pub async fn with_concurrency_key(&self, key: &str) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM good_jobs WHERE concurrency_key = $1 AND finished_at IS NULL",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(GoodJobError::Database)
    }

    pub async fn scheduled_before(&self, before: DateTime<Utc>) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM good_jobs
            WHERE finished_at IS NULL AND scheduled_at IS NOT NULL AND scheduled_at < $1
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(GoodJobError::Database)
    }

    /// Rows currently `running` whose advisory lock has gone stale — the
    /// candidate set the lifeline sweep (spec §4.9) double-checks against
    /// `pg_locks` before rescuing.
    pub async fn performing(&self) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM good_jobs
            WHERE finished_at IS NULL AND performed_at IS NOT NULL AND locked_by_id IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(GoodJobError::Database)
    }

    /// Rows in state `state` (computed against `now`), a thin wrapper
    /// around the other named query builders for callers (e.g. `stats()`)
    /// that want to go through one entry point.
    pub async fn in_state(&self, state: JobState) -> Result<Vec<Job>> {
        let now = Utc::now();
        let candidates: Vec<Job> = match state {
            JobState::Succeeded | JobState::Discarded => {
                sqlx::query_as::<_, Job>("SELECT * FROM good_jobs WHERE finished_at IS NOT NULL")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(GoodJobError::Database)?
            }
            _ => {
                sqlx::query_as::<_, Job>("SELECT * FROM good_jobs WHERE finished_at IS NULL")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(GoodJobError::Database)?
            }
        };
        Ok(candidates
            .into_iter()
            .filter(|j| j.state(now) == state)
            .collect())
    }
}

/// Publishes on the `good_job` channel (spec §4.4/§6.3) so any listening
/// worker — in this process or another, in this language or another — wakes
/// up immediately instead of waiting for its next poll.
async fn notify(tx: &mut sqlx::PgConnection, job: &Job) -> Result<()> {
    let payload = serde_json::json!({
        "queue_name": job.queue_name,
        "scheduled_at": job.scheduled_at,
    });
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANNEL)
        .bind(payload.to_string())
        .execute(tx)
        .await
        .map_err(GoodJobError::Database)?;
    Ok(())
}
