use maestro_store::{connect, migrations};

use crate::commands::{self, CommandResult};

/// Brings the configured SQLite database up to date and reports what ran.
pub fn run() -> CommandResult {
    let config = match commands::load_config("migrate") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match commands::blocking_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let applied = migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let total = migrations::applied_count(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(u64, u64), (&'static str, String, u8)>((applied, total))
    });

    match result {
        Ok((0, total)) => CommandResult::success(
            "migrate",
            format!("database already up to date ({total} migration(s) applied)"),
        ),
        Ok((applied, total)) => CommandResult::success(
            "migrate",
            format!("applied {applied} migration(s), {total} now in place"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
