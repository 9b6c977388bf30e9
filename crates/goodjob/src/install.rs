//! `install()` operator API (spec §6.5): apply the crate's migrations
//! against a fresh or existing database. Safe to call repeatedly — sqlx's
//! migrator skips migrations already recorded as applied.

use sqlx::PgPool;

pub async fn install(pool: &PgPool) -> anyhow::Result<()> {
    crate::db::run_migrations(pool).await
}
