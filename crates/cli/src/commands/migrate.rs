use propdraft_db::{connect_with_settings, migrations};
use serde_json::json;

use crate::commands::{
    block_on, load_config, CommandResult, Failure, EXIT_DB_CONNECTIVITY, EXIT_MIGRATION,
};

pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return CommandResult::from_failure("migrate", failure),
    };

    let result = block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| {
            Failure::new("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY)
        })?;
        let (_, applied_before) = migrations::status(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), EXIT_MIGRATION))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), EXIT_MIGRATION))?;
        let (known, applied) = migrations::status(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), EXIT_MIGRATION))?;
        pool.close().await;
        Ok((known, applied_before, applied))
    });

    match result {
        Ok((known, applied_before, applied)) => CommandResult::success_with_data(
            "migrate",
            format!("applied {} pending migrations", applied.saturating_sub(applied_before)),
            Some(json!({ "known": known, "applied": applied })),
        ),
        Err(failure) => CommandResult::from_failure("migrate", failure),
    }
}
