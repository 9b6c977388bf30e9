//! Pause registry (spec §4.8): operators can pause a whole queue or a
//! single job class without stopping worker processes. Checked by the
//! fetcher on every candidate before it spends a lock attempt on the row.

use sqlx::PgPool;

use crate::error::{GoodJobError, Result};

const KIND_QUEUE: &str = "queue";
const KIND_JOB_CLASS: &str = "job_class";

#[derive(Clone)]
pub struct PauseRegistry {
    pool: PgPool,
}

impl PauseRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn pause_queue(&self, queue_name: &str) -> Result<()> {
        self.insert(KIND_QUEUE, queue_name).await
    }

    pub async fn unpause_queue(&self, queue_name: &str) -> Result<()> {
        self.delete(KIND_QUEUE, queue_name).await
    }

    pub async fn is_queue_paused(&self, queue_name: &str) -> Result<bool> {
        self.exists(KIND_QUEUE, queue_name).await
    }

    pub async fn pause_job_class(&self, job_class: &str) -> Result<()> {
        self.insert(KIND_JOB_CLASS, job_class).await
    }

    pub async fn unpause_job_class(&self, job_class: &str) -> Result<()> {
        self.delete(KIND_JOB_CLASS, job_class).await
    }

    pub async fn is_job_class_paused(&self, job_class: &str) -> Result<bool> {
        self.exists(KIND_JOB_CLASS, job_class).await
    }

    pub async fn list_paused(&self) -> Result<Vec<(String, String)>> {
        sqlx::query_as("SELECT kind, name FROM good_job_pauses ORDER BY kind, name")
            .fetch_all(&self.pool)
            .await
            .map_err(GoodJobError::Database)
    }

    async fn insert(&self, kind: &str, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO good_job_pauses (kind, name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(kind)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(GoodJobError::Database)?;
        Ok(())
    }

    async fn delete(&self, kind: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM good_job_pauses WHERE kind = $1 AND name = $2")
            .bind(kind)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(GoodJobError::Database)?;
        Ok(())
    }

    async fn exists(&self, kind: &str, name: &str) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM good_job_pauses WHERE kind = $1 AND name = $2",
        )
        .bind(kind)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(GoodJobError::Database)?;
        Ok(row.is_some())
    }
}
