//! `stats()` operator API (spec §6.5): a point-in-time snapshot of queue
//! depth per state, for dashboards or health endpoints that live outside
//! this crate.

use serde::Serialize;
use sqlx::PgPool;

use crate::error::{GoodJobError, Result};

#[derive(Debug, Clone, Serialize, Default)]
pub struct Stats {
    pub scheduled: i64,
    pub queued: i64,
    pub running: i64,
    pub succeeded: i64,
    pub discarded: i64,
    pub retried: i64,
}

pub async fn stats(pool: &PgPool) -> Result<Stats> {
    // Each FILTER mirrors `Job::state`'s branch order exactly: retried is
    // checked before running/scheduled/queued, and running before
    // scheduled/queued, so every predicate below excludes the ones that
    // would have matched first in that precedence — otherwise a single row
    // could satisfy two FILTERs and be double-counted.
    let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (
                WHERE finished_at IS NULL
                  AND retried_from_id IS NULL
                  AND NOT (performed_at IS NOT NULL AND locked_by_id IS NOT NULL)
                  AND scheduled_at > now()
            ) AS scheduled,
            COUNT(*) FILTER (
                WHERE finished_at IS NULL
                  AND retried_from_id IS NULL
                  AND NOT (performed_at IS NOT NULL AND locked_by_id IS NOT NULL)
                  AND (scheduled_at IS NULL OR scheduled_at <= now())
            ) AS queued,
            COUNT(*) FILTER (
                WHERE finished_at IS NULL
                  AND retried_from_id IS NULL
                  AND performed_at IS NOT NULL AND locked_by_id IS NOT NULL
            ) AS running,
            COUNT(*) FILTER (WHERE finished_at IS NOT NULL AND error IS NULL) AS succeeded,
            COUNT(*) FILTER (WHERE finished_at IS NOT NULL AND error IS NOT NULL) AS discarded,
            COUNT(*) FILTER (WHERE finished_at IS NULL AND retried_from_id IS NOT NULL) AS retried
        FROM good_jobs
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(GoodJobError::Database)?;

    Ok(Stats {
        scheduled: row.0,
        queued: row.1,
        running: row.2,
        succeeded: row.3,
        discarded: row.4,
        retried: row.5,
    })
}
