use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use maestro_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Opens the pool described by the `[database]` config section. Every
/// connection gets WAL journaling and a busy timeout sized from the
/// configured acquire timeout, capped at five seconds so a contended
/// write fails inside the acquire window instead of after it.
pub async fn connect(database: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let acquire_timeout = Duration::from_secs(database.timeout_secs.max(1));
    let busy_timeout_ms = acquire_timeout.as_millis().min(5_000);

    SqlitePoolOptions::new()
        .max_connections(database.max_connections.max(1))
        .acquire_timeout(acquire_timeout)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&database.url)
        .await
}
