use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{GoodJobError, Result};

/// One row per attempt at running a job; append-only (spec §4.5 "one
/// execution record per attempt").
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Execution {
    pub id: Uuid,
    pub job_id: Uuid,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
    pub error_backtrace: Option<String>,
    pub process_id: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ExecutionsRepo {
    pool: PgPool,
}

impl ExecutionsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn start(&self, job_id: Uuid, process_id: &str) -> Result<Execution> {
        self.start_on(&self.pool, job_id, process_id).await
    }

    /// Same as [`start`](Self::start), but runs against whatever executor is
    /// passed in — a bare `&PgPool` or a transaction's `&mut PgConnection` —
    /// so callers that need the insert to commit atomically with other
    /// writes (e.g. the executor's outcome persistence) can join it to
    /// their own transaction.
    pub async fn start_on<'e, E>(&self, exec: E, job_id: Uuid, process_id: &str) -> Result<Execution>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Execution>(
            r#"
            INSERT INTO good_job_executions (job_id, process_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(process_id)
        .fetch_one(exec)
        .await
        .map_err(GoodJobError::Database)
    }

    pub async fn finish(
        &self,
        execution_id: Uuid,
        error: Option<&str>,
        error_backtrace: Option<&str>,
    ) -> Result<()> {
        self.finish_on(&self.pool, execution_id, error, error_backtrace).await
    }

    /// Same as [`finish`](Self::finish), joinable to a caller's transaction
    /// (see [`start_on`](Self::start_on)).
    pub async fn finish_on<'e, E>(
        &self,
        exec: E,
        execution_id: Uuid,
        error: Option<&str>,
        error_backtrace: Option<&str>,
    ) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE good_job_executions
            SET finished_at = now(), error = $2, error_backtrace = $3
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(error)
        .bind(error_backtrace)
        .execute(exec)
        .await
        .map_err(GoodJobError::Database)?;
        Ok(())
    }

    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<Execution>> {
        sqlx::query_as::<_, Execution>(
            "SELECT * FROM good_job_executions WHERE job_id = $1 ORDER BY started_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(GoodJobError::Database)
    }

    pub async fn count_started_since(&self, since: DateTime<Utc>) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM good_job_executions WHERE started_at >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(GoodJobError::Database)
    }

    pub async fn count_started_since_for_job(&self, job_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM good_job_executions WHERE job_id = $1 AND started_at >= $2",
        )
        .bind(job_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(GoodJobError::Database)
    }
}
