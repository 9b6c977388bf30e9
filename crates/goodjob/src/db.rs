use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, postgres::PgPoolOptions};

pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Session-level advisory locks live on the connection that took them, not
/// on the pool, so anything that calls `pg_try_advisory_lock` must check out
/// a single connection and hold it for the lock's whole lifetime.
pub async fn checkout(pool: &PgPool) -> anyhow::Result<PoolConnection<Postgres>> {
    Ok(pool.acquire().await?)
}
