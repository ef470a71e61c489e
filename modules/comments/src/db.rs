use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Initialize a connection pool to the PostgreSQL database
///
/// Pool size and acquire timeout come from `DB_MAX_CONNECTIONS` (default 10)
/// and `DB_ACQUIRE_TIMEOUT_SECS` (default 3). Tests should keep the pool small.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(10);

    let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Connect with bounded retries, for startup while Postgres is still coming up
pub async fn connect_with_retry(
    database_url: &str,
    retry: &RetryConfig,
) -> Result<PgPool, sqlx::Error> {
    retry_with_backoff(|| init_pool(database_url), retry, "connect_postgres").await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./db/migrations").run(pool).await
}
