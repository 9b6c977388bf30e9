//! Cleanup: Pruner and Lifeline (spec §4.9). Both run on their own tick
//! loop and operate on tables shared with every other cooperating process,
//! so every statement here is defensive about rows that may have changed
//! underneath it since the candidate scan.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::advisory_lock;
use crate::error::{GoodJobError, Result};

pub struct Pruner {
    pool: PgPool,
    max_age: Duration,
    max_deletes_per_pass: i64,
}

impl Pruner {
    pub fn new(pool: PgPool, max_age: Duration, max_deletes_per_pass: i64) -> Self {
        Self {
            pool,
            max_age,
            max_deletes_per_pass,
        }
    }

    pub async fn run_once(&self) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::zero());

        let res = sqlx::query(
            r#"
            DELETE FROM good_jobs
            WHERE id IN (
                SELECT id FROM good_jobs
                WHERE finished_at IS NOT NULL AND finished_at < $1
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(self.max_deletes_per_pass)
        .execute(&self.pool)
        .await
        .map_err(GoodJobError::Database)?;

        if res.rows_affected() > 0 {
            info!(count = res.rows_affected(), "pruner deleted finished jobs");
        }
        Ok(res.rows_affected())
    }

    pub async fn run_forever(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "pruner pass failed");
            }
        }
    }
}

pub struct Lifeline {
    pool: PgPool,
    rescue_after: Duration,
}

impl Lifeline {
    pub fn new(pool: PgPool, rescue_after: Duration) -> Self {
        Self { pool, rescue_after }
    }

    /// Find rows stuck `performing` past `rescue_after` whose advisory
    /// lock isn't actually held by any live session, and return them to
    /// `queued`. A row whose lock is still held is left alone — its
    /// worker is presumably just slow.
    pub async fn run_once(&self) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.rescue_after).unwrap_or(chrono::Duration::zero());

        let rows: Vec<(uuid::Uuid, Option<uuid::Uuid>)> = sqlx::query_as(
            r#"
            SELECT id, locked_by_id
            FROM good_jobs
            WHERE finished_at IS NULL
              AND performed_at IS NOT NULL
              AND locked_at IS NOT NULL
              AND locked_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(GoodJobError::Database)?;

        let stuck: Vec<(uuid::Uuid, i64)> = rows
            .into_iter()
            .filter(|(_, locked_by)| locked_by.is_some())
            .map(|(id, _)| (id, advisory_lock::job_lock_key(id)))
            .collect();

        let mut rescued = 0u64;
        let mut conn = self.pool.acquire().await.map_err(GoodJobError::Database)?;
        for (job_id, lock_key) in stuck {
            if advisory_lock::is_held(&mut conn, lock_key).await? {
                continue;
            }

            let res = sqlx::query(
                r#"
                UPDATE good_jobs
                SET performed_at = NULL, locked_by_id = NULL, locked_at = NULL, updated_at = now()
                WHERE id = $1 AND finished_at IS NULL
                "#,
            )
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(GoodJobError::Database)?;

            if res.rows_affected() > 0 {
                rescued += 1;
                info!(job_id = %job_id, "lifeline rescued stuck job");
            }
        }

        Ok(rescued)
    }

    pub async fn run_forever(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "lifeline pass failed");
            }
        }
    }
}
