//! Executor (spec §4.5): deserialize, run hooks, invoke the handler under
//! a timeout, normalize the result, and persist the outcome in one
//! transaction alongside the append-only execution record.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{GoodJobError, Result};
use crate::fetch::ClaimedJob;
use crate::handler::{HandlerRegistry, Outcome};
use crate::jobs::{ExecutionsRepo, Job};
use crate::payload::JobPayload;
use crate::retry::{BackoffPolicy, ConstantBackoff, DiscardOn};

pub struct Executor {
    pool: PgPool,
    handlers: std::sync::Arc<HandlerRegistry>,
    executions: ExecutionsRepo,
    backoff: std::sync::Arc<dyn BackoffPolicy>,
    discard_on: DiscardOn,
    max_attempts: i32,
    process_id: Uuid,
}

impl Executor {
    pub fn new(
        pool: PgPool,
        handlers: std::sync::Arc<HandlerRegistry>,
        executions: ExecutionsRepo,
        max_attempts: i32,
        process_id: Uuid,
    ) -> Self {
        Self {
            pool,
            handlers,
            executions,
            backoff: std::sync::Arc::new(ConstantBackoff::default()),
            discard_on: DiscardOn::default(),
            max_attempts,
            process_id,
        }
    }

    pub fn with_backoff(mut self, backoff: std::sync::Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_discard_on(mut self, discard_on: DiscardOn) -> Self {
        self.discard_on = discard_on;
        self
    }

    /// Run a claimed job to completion (or timeout/interrupt) and persist
    /// its terminal or retry outcome. Always releases the claim's
    /// advisory lock, even on error, so a panic inside a handler can never
    /// leak a held session lock.
    pub async fn execute(&self, claimed: ClaimedJob) -> Result<()> {
        let job = claimed.job.clone();
        let result = self.run_and_persist(&job).await;
        claimed.release().await?;
        result
    }

    /// Return a still-`performing` job to `queued` without consuming a
    /// retry attempt (spec §4.5 "Interrupt"). Called by the scheduler when
    /// a handler is still running past the shutdown drain timeout.
    pub async fn interrupt(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE good_jobs
            SET performed_at = NULL, locked_by_id = NULL, locked_at = NULL,
                executions_count = GREATEST(executions_count - 1, 0),
                payload = jsonb_set(payload, '{executions}', to_jsonb(GREATEST(executions_count - 1, 0))),
                updated_at = now()
            WHERE id = $1 AND finished_at IS NULL
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(GoodJobError::Database)?;
        Ok(())
    }

    async fn run_and_persist(&self, job: &Job) -> Result<()> {
        let execution = self
            .executions
            .start(job.id, &self.process_id.to_string())
            .await?;
        let execution_id = execution.id;

        let payload = JobPayload::from_value(job.payload.clone());
        let outcome = match payload {
            // A payload that can't round-trip through the wire format will
            // never deserialize on a later attempt either, so this is
            // terminal rather than retryable (spec §6.2/§7).
            Err(e) => Outcome::Discard(e.reason()),
            Ok(payload) => {
                if !self.handlers.is_registered(&job.job_class) {
                    Outcome::Discard(format!("no handler registered for {}", job.job_class))
                } else {
                    let arguments = payload.decoded_arguments();
                    self.handlers
                        .run(&job.job_class, job, &arguments)
                        .await
                        .unwrap_or_else(|| Outcome::Error("handler produced no outcome".to_string()))
                }
            }
        };

        self.persist_outcome(job, execution_id, outcome).await
    }

    async fn persist_outcome(&self, job: &Job, execution_id: Uuid, outcome: Outcome) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(GoodJobError::Database)?;

        match outcome {
            Outcome::Ok(_) | Outcome::Other(_) => {
                sqlx::query(
                    r#"
                    UPDATE good_jobs
                    SET finished_at = now(), error = NULL,
                        locked_by_id = NULL, locked_at = NULL,
                        updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(job.id)
                .execute(&mut *tx)
                .await
                .map_err(GoodJobError::Database)?;

                self.executions.finish_on(&mut *tx, execution_id, None, None).await?;
            }
            Outcome::Error(reason) => {
                let discard = self.discard_on.matches(&reason);
                if discard || job.executions_count >= self.max_attempts {
                    sqlx::query(
                        r#"
                        UPDATE good_jobs
                        SET finished_at = now(), scheduled_at = NULL, error = $2,
                            locked_by_id = NULL, locked_at = NULL,
                            updated_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .bind(&reason)
                    .execute(&mut *tx)
                    .await
                    .map_err(GoodJobError::Database)?;
                } else {
                    let delay = self.backoff.delay_seconds(job.executions_count);
                    let next_run_at = Utc::now() + chrono::Duration::seconds(delay);
                    sqlx::query(
                        r#"
                        UPDATE good_jobs
                        SET finished_at = NULL, scheduled_at = $2, performed_at = NULL,
                            error = $3, locked_by_id = NULL, locked_at = NULL,
                            updated_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .bind(next_run_at)
                    .bind(&reason)
                    .execute(&mut *tx)
                    .await
                    .map_err(GoodJobError::Database)?;
                }

                self.executions
                    .finish_on(&mut *tx, execution_id, Some(&reason), None)
                    .await?;
            }
            Outcome::Cancel(reason) | Outcome::Discard(reason) => {
                sqlx::query(
                    r#"
                    UPDATE good_jobs
                    SET finished_at = now(), error = $2,
                        locked_by_id = NULL, locked_at = NULL,
                        updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(job.id)
                .bind(&reason)
                .execute(&mut *tx)
                .await
                .map_err(GoodJobError::Database)?;

                self.executions
                    .finish_on(&mut *tx, execution_id, Some(&reason), None)
                    .await?;
            }
            Outcome::Snooze(seconds) => {
                let next_run_at = Utc::now() + chrono::Duration::seconds(seconds);
                sqlx::query(
                    r#"
                    UPDATE good_jobs
                    SET scheduled_at = $2, locked_by_id = NULL, locked_at = NULL,
                        performed_at = NULL, updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(job.id)
                .bind(next_run_at)
                .execute(&mut *tx)
                .await
                .map_err(GoodJobError::Database)?;

                self.executions.finish_on(&mut *tx, execution_id, None, None).await?;
            }
        }

        tx.commit().await.map_err(GoodJobError::Database)?;
        Ok(())
    }
}
