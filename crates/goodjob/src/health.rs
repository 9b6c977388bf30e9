//! `health_check()` operator API (spec §6.5): a cheap liveness probe a
//! host process can expose on its own health endpoint.

use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Health {
    Ok,
    Unhealthy { reason: String },
}

pub async fn health_check(pool: &PgPool) -> Health {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => Health::Ok,
        Err(e) => Health::Unhealthy {
            reason: e.to_string(),
        },
    }
}
