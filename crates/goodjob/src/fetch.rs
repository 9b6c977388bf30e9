//! Fetch-and-claim protocol (spec §4.2). Turns a batch of `queued`
//! candidates into at most one locked [`Job`] per call, using a dedicated
//! session-level advisory lock per row so two workers — in this process or
//! any cooperating one — can never both win the same job.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::advisory_lock::{self, job_lock_key};
use crate::concurrency::ConcurrencyLimiter;
use crate::error::Result;
use crate::jobs::JobsRepo;
use crate::pause::PauseRegistry;

/// Candidate window size multiplier over pool size, to absorb lock
/// contention losses (spec §4.2 step 1: "typically 2-5x").
const CANDIDATE_WINDOW_MULTIPLIER: i64 = 4;

/// A job claimed by this process: the row (already stamped) plus the live
/// advisory-lock connection that must be held until the executor finishes
/// and releases it.
pub struct ClaimedJob {
    pub job: crate::jobs::Job,
    lock_conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    lock_key: i64,
}

impl ClaimedJob {
    pub async fn release(mut self) -> Result<()> {
        advisory_lock::release_session(&mut self.lock_conn, self.lock_key).await
    }
}

pub struct Fetcher {
    pool: PgPool,
    jobs: JobsRepo,
    pauses: Arc<PauseRegistry>,
    limiter: Arc<ConcurrencyLimiter>,
    process_id: Uuid,
}

impl Fetcher {
    pub fn new(
        pool: PgPool,
        jobs: JobsRepo,
        pauses: Arc<PauseRegistry>,
        limiter: Arc<ConcurrencyLimiter>,
        process_id: Uuid,
    ) -> Self {
        Self {
            pool,
            jobs,
            pauses,
            limiter,
            process_id,
        }
    }

    /// Try to claim one job from `queue_names` (empty means "all queues")
    /// for a pool of size `pool_size`. Returns `None` if nothing is
    /// eligible or every candidate lost its lock race or was
    /// concurrency-blocked.
    pub async fn fetch_one(&self, queue_names: &[String], pool_size: i64) -> Result<Option<ClaimedJob>> {
        let window = (pool_size * CANDIDATE_WINDOW_MULTIPLIER).max(pool_size).max(1);
        let candidates = self.jobs.dequeueing_ordered(queue_names, window).await?;

        for candidate in candidates {
            if self.pauses.is_queue_paused(&candidate.queue_name).await?
                || self.pauses.is_job_class_paused(&candidate.job_class).await?
            {
                continue;
            }

            let lock_key = job_lock_key(candidate.id);
            let mut conn = self.pool.acquire().await.map_err(crate::error::GoodJobError::Database)?;
            if !advisory_lock::try_acquire_session(&mut conn, lock_key).await? {
                continue;
            }

            // Re-read to confirm another worker didn't finish it between
            // our candidate scan and winning the lock (spec §4.2 step 2).
            let Some(fresh) = self.jobs.find_by_id(candidate.id).await? else {
                advisory_lock::release_session(&mut conn, lock_key).await?;
                continue;
            };
            if fresh.finished_at.is_some() || fresh.performed_at.is_some() {
                advisory_lock::release_session(&mut conn, lock_key).await?;
                continue;
            }

            if let Some(key) = fresh.concurrency_key.as_deref() {
                if !self.limiter.allow_perform(&fresh.job_class, key).await? {
                    advisory_lock::release_session(&mut conn, lock_key).await?;
                    continue;
                }
            }

            let stamped = sqlx::query_as::<_, crate::jobs::Job>(
                r#"
                UPDATE good_jobs
                SET locked_by_id = $2,
                    locked_at = now(),
                    performed_at = now(),
                    executions_count = executions_count + 1,
                    payload = jsonb_set(payload, '{executions}', to_jsonb(executions_count + 1)),
                    updated_at = now()
                WHERE id = $1 AND finished_at IS NULL AND performed_at IS NULL
                RETURNING *
                "#,
            )
            .bind(fresh.id)
            .bind(self.process_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::GoodJobError::Database)?;

            match stamped {
                Some(job) => {
                    return Ok(Some(ClaimedJob {
                        job,
                        lock_conn: conn,
                        lock_key,
                    }));
                }
                None => {
                    advisory_lock::release_session(&mut conn, lock_key).await?;
                    continue;
                }
            }
        }

        Ok(None)
    }
}
