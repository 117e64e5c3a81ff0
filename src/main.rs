use std::time::Duration;

use rocket::tokio;
use sqlx::SqlitePool;
use tracing::{error, info};

use workbook_tracker::config::AppConfig;
use workbook_tracker::db::clean_expired_sessions;
use workbook_tracker::env::load_environment;
use workbook_tracker::notify::notifier_from_config;
use workbook_tracker::telemetry::{init_tracing, shutdown_telemetry};
use workbook_tracker::{Error, init_rocket, run_migrations};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

fn spawn_session_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(SESSION_CLEANUP_INTERVAL).await;
        }
    });
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let env_result = load_environment();
    init_tracing();
    if let Err(e) = env_result {
        error!("Failed to load environment files: {}", e);
    }

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://workbooks.db?mode=rwc".to_string());

    let pool = SqlitePool::connect(&database_url).await?;
    run_migrations(&pool).await?;

    let figment = rocket::Config::figment();
    let config = AppConfig::from_figment(&figment)?;
    let notifier = notifier_from_config(&config)?;

    spawn_session_cleanup(pool.clone());

    let result = init_rocket(figment, pool, notifier).launch().await;
    shutdown_telemetry();
    result?;

    Ok(())
}
