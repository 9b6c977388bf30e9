//! Session-level and transaction-level PostgreSQL advisory locks (spec §4.3).
//!
//! Advisory locks are the mutual-exclusion primitive that lets unrelated
//! processes — including processes written in other languages — agree on
//! who is allowed to run a given job or hold a given concurrency slot,
//! without any of them needing to see each other's in-memory state. Two
//! cooperating implementations only need to agree on (a) the same 64-bit
//! lock key for the same logical resource and (b) releasing on disconnect,
//! which Postgres does for us automatically when a session's connection
//! drops.

use sqlx::pool::PoolConnection;
use sqlx::{Postgres, Row};

use crate::error::{GoodJobError, Result};

/// Namespaces the two families of advisory-locked resources so the same
/// underlying i64 space can't collide between a job id and a concurrency
/// key that happen to hash to the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockNamespace {
    Job,
    ConcurrencyKey,
}

impl LockNamespace {
    fn tag(self) -> i64 {
        match self {
            LockNamespace::Job => 0x6a6f_6200, // "job\0"
            LockNamespace::ConcurrencyKey => 0x636b_6579, // "ckey"
        }
    }
}

/// Stable 64-bit key used to take the per-job advisory lock. Two processes
/// racing to claim the same job must derive the same key from the job's
/// UUID, so this must never depend on anything process-local (memory
/// addresses, insertion order, etc).
pub fn job_lock_key(job_id: uuid::Uuid) -> i64 {
    fold_to_i64(LockNamespace::Job, job_id.as_bytes())
}

/// Stable 64-bit key for a `concurrency_key` string, used to serialize
/// concurrency-limiter checks for that key across processes.
pub fn concurrency_lock_key(key: &str) -> i64 {
    fold_to_i64(LockNamespace::ConcurrencyKey, key.as_bytes())
}

fn fold_to_i64(namespace: LockNamespace, bytes: &[u8]) -> i64 {
    // FNV-1a keeps this dependency-free and deterministic across platforms,
    // unlike Rust's default hasher (which is randomized per-process).
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash ^= namespace.tag() as u64;
    hash as i64
}

/// Try to take a session-level advisory lock on `key` over `conn`. The lock
/// is held until [`release_session`] is called on the same connection or
/// the connection is dropped/closed. Returns `false` without blocking if
/// another session already holds it.
pub async fn try_acquire_session(conn: &mut PoolConnection<Postgres>, key: i64) -> Result<bool> {
    let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
        .bind(key)
        .fetch_one(&mut **conn)
        .await
        .map_err(GoodJobError::Database)?;
    Ok(row.try_get::<bool, _>("locked").unwrap_or(false))
}

/// Release a session-level advisory lock previously taken with
/// [`try_acquire_session`] on the same connection.
pub async fn release_session(conn: &mut PoolConnection<Postgres>, key: i64) -> Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .execute(&mut **conn)
        .await
        .map_err(GoodJobError::Database)?;
    Ok(())
}

/// Whether `key` is currently held by *any* session, including this one.
/// Used by the lifeline sweep (spec §4.9) to distinguish a job that's
/// genuinely still running from one whose worker died holding the lock.
pub async fn is_held(conn: &mut PoolConnection<Postgres>, key: i64) -> Result<bool> {
    let row = sqlx::query(
        "SELECT EXISTS (
             SELECT 1 FROM pg_locks
             WHERE locktype = 'advisory'
               AND objid = ($1::bigint & 4294967295)::int
               AND classid = (($1::bigint >> 32) & 4294967295)::int
         ) AS held",
    )
    .bind(key)
    .fetch_one(&mut **conn)
    .await
    .map_err(GoodJobError::Database)?;
    Ok(row.try_get::<bool, _>("held").unwrap_or(false))
}

/// Try to take a transaction-scoped advisory lock within `tx`. Released
/// automatically on commit or rollback — used by the concurrency limiter,
/// which only needs the lock held for the duration of its check-and-act
/// transaction (spec §4.6).
pub async fn try_acquire_transaction(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    key: i64,
) -> Result<bool> {
    let row = sqlx::query("SELECT pg_try_advisory_xact_lock($1) AS locked")
        .bind(key)
        .fetch_one(&mut **tx)
        .await
        .map_err(GoodJobError::Database)?;
    Ok(row.try_get::<bool, _>("locked").unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lock_key_is_deterministic() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(job_lock_key(id), job_lock_key(id));
    }

    #[test]
    fn job_and_concurrency_namespaces_differ() {
        let id = uuid::Uuid::new_v4();
        let same_bytes = id.as_bytes();
        let job_key = fold_to_i64(LockNamespace::Job, same_bytes);
        let ck_key = fold_to_i64(LockNamespace::ConcurrencyKey, same_bytes);
        assert_ne!(job_key, ck_key);
    }

    #[test]
    fn concurrency_lock_key_distinguishes_strings() {
        assert_ne!(concurrency_lock_key("a"), concurrency_lock_key("b"));
    }
}
