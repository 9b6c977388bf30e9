//! Concurrency limiter and throttler (spec §4.6). Every check takes a
//! transaction-scoped advisory lock on the concurrency key first, so two
//! processes checking the same key's counts can never race.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;

use crate::advisory_lock::{self, concurrency_lock_key};
use crate::error::{GoodJobError, Result};
use crate::jobs::ExecutionsRepo;

/// A sliding-window rate limit: at most `count` events in `window`.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub count: u32,
    pub window: Duration,
}

/// Per-`concurrency_key` limits an operator may declare for a handler.
/// Matched by job class name; unconfigured classes are unlimited.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyConfig {
    pub total_limit: Option<u32>,
    pub enqueue_limit: Option<u32>,
    pub perform_limit: Option<u32>,
    pub enqueue_throttle: Option<Throttle>,
    pub perform_throttle: Option<Throttle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    LimitExceeded,
    ThrottleExceeded,
    LockFailed,
}

pub struct ConcurrencyLimiter {
    pool: PgPool,
    executions: ExecutionsRepo,
    configs: RwLock<HashMap<String, ConcurrencyConfig>>,
}

impl ConcurrencyLimiter {
    pub fn new(pool: PgPool, executions: ExecutionsRepo) -> Self {
        Self {
            pool,
            executions,
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn configure(&self, job_class: impl Into<String>, config: ConcurrencyConfig) {
        self.configs
            .write()
            .expect("concurrency config lock poisoned")
            .insert(job_class.into(), config);
    }

    fn config_for(&self, job_class: &str) -> Option<ConcurrencyConfig> {
        self.configs
            .read()
            .expect("concurrency config lock poisoned")
            .get(job_class)
            .cloned()
    }

    /// Check whether enqueueing another job under `key` for `job_class` is
    /// allowed, enforcing `total_limit`, `enqueue_limit`, and
    /// `enqueue_throttle`.
    pub async fn check_enqueue(&self, job_class: &str, key: &str) -> Result<CheckOutcome> {
        let Some(config) = self.config_for(job_class) else {
            return Ok(CheckOutcome::Ok);
        };

        let mut tx = self.pool.begin().await.map_err(GoodJobError::Database)?;
        let lock_key = concurrency_lock_key(key);
        if !advisory_lock::try_acquire_transaction(&mut tx, lock_key).await? {
            return Ok(CheckOutcome::LockFailed);
        }

        if let Some(limit) = config.total_limit {
            let total: i64 = count_unfinished(&mut tx, key, None).await?;
            if total as u32 >= limit {
                return Ok(CheckOutcome::LimitExceeded);
            }
        }
        if let Some(limit) = config.enqueue_limit {
            let enqueued: i64 = count_unfinished(&mut tx, key, Some(false)).await?;
            if enqueued as u32 >= limit {
                return Ok(CheckOutcome::LimitExceeded);
            }
        }
        tx.commit().await.map_err(GoodJobError::Database)?;

        if let Some(throttle) = config.enqueue_throttle {
            if self.throttle_exceeded_for_enqueue(key, throttle).await? {
                return Ok(CheckOutcome::ThrottleExceeded);
            }
        }

        Ok(CheckOutcome::Ok)
    }

    /// Check whether a job of `job_class` whose `concurrency_key` is `key`
    /// is allowed to begin performing right now. Called by the fetcher
    /// right before it stamps the row (spec §4.2 step 3).
    pub async fn allow_perform(&self, job_class: &str, key: &str) -> Result<bool> {
        let Some(config) = self.config_for(job_class) else {
            return Ok(true);
        };

        let mut tx = self.pool.begin().await.map_err(GoodJobError::Database)?;
        let lock_key = concurrency_lock_key(key);
        if !advisory_lock::try_acquire_transaction(&mut tx, lock_key).await? {
            return Ok(false);
        }

        if let Some(limit) = config.perform_limit {
            let performing: i64 = count_unfinished(&mut tx, key, Some(true)).await?;
            if performing as u32 >= limit {
                return Ok(false);
            }
        }
        tx.commit().await.map_err(GoodJobError::Database)?;

        if let Some(throttle) = config.perform_throttle {
            if self.throttle_exceeded_for_perform(key, throttle).await? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn throttle_exceeded_for_enqueue(&self, key: &str, throttle: Throttle) -> Result<bool> {
        let since = Utc::now()
            - chrono::Duration::from_std(throttle.window).unwrap_or(chrono::Duration::zero());
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM good_jobs WHERE concurrency_key = $1 AND created_at >= $2",
        )
        .bind(key)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(GoodJobError::Database)?;
        Ok(count as u32 >= throttle.count)
    }

    async fn throttle_exceeded_for_perform(&self, key: &str, throttle: Throttle) -> Result<bool> {
        let since = Utc::now()
            - chrono::Duration::from_std(throttle.window).unwrap_or(chrono::Duration::zero());
        let ids: Vec<uuid::Uuid> =
            sqlx::query_scalar("SELECT id FROM good_jobs WHERE concurrency_key = $1")
                .bind(key)
                .fetch_all(&self.pool)
                .await
                .map_err(GoodJobError::Database)?;
        if ids.is_empty() {
            return Ok(false);
        }
        let mut total = 0i64;
        for id in ids {
            total += self.executions.count_started_since_for_job(id, since).await?;
        }
        Ok(total as u32 >= throttle.count)
    }
}

/// Counts unfinished rows sharing `key`, optionally filtered to
/// performing-only (`Some(true)`) or enqueued-only (`Some(false)`).
async fn count_unfinished(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &str,
    performing: Option<bool>,
) -> Result<i64> {
    let query = match performing {
        Some(true) => {
            "SELECT COUNT(*) FROM good_jobs WHERE concurrency_key = $1 AND finished_at IS NULL AND performed_at IS NOT NULL"
        }
        Some(false) => {
            "SELECT COUNT(*) FROM good_jobs WHERE concurrency_key = $1 AND finished_at IS NULL AND performed_at IS NULL"
        }
        None => "SELECT COUNT(*) FROM good_jobs WHERE concurrency_key = $1 AND finished_at IS NULL",
    };
    sqlx::query_scalar(query)
        .bind(key)
        .fetch_one(&mut **tx)
        .await
        .map_err(GoodJobError::Database)
}
