use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies any pending migrations and returns how many actually ran, so
/// callers can distinguish a fresh setup from an already current database.
pub async fn run_pending(pool: &DbPool) -> Result<u64, MigrateError> {
    let before = applied_count(pool).await?;
    MIGRATOR.run(pool).await?;
    let after = applied_count(pool).await?;
    Ok(after.saturating_sub(before))
}

/// Number of migrations recorded as applied. Zero when the bookkeeping
/// table does not exist yet.
pub async fn applied_count(pool: &DbPool) -> Result<u64, MigrateError> {
    let table_present: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if table_present == 0 {
        return Ok(0);
    }

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;
    Ok(applied as u64)
}
