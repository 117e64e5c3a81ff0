#[macro_use]
extern crate rocket;

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod models;
pub mod notify;
pub mod telemetry;
pub mod validation;
#[cfg(test)]
mod test;

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use api::*;
use auth::{default_api, unauthorized_api};
use config::AppConfig;
use error::AppError;
use notify::Notifier;
use telemetry::{OtelGuard, TelemetryFairing};

pub static TELEMETRY_GUARD: Lazy<Mutex<Option<OtelGuard>>> = Lazy::new(|| Mutex::new(None));

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Launch(Box<rocket::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Launch(Box::new(value))
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Migrations completed successfully");
    Ok(())
}

pub fn init_rocket(figment: Figment, pool: SqlitePool, notifier: Arc<dyn Notifier>) -> Rocket<Build> {
    info!("Starting workbook tracker");

    rocket::custom(figment)
        .manage(pool)
        .manage(notifier)
        .attach(AdHoc::config::<AppConfig>())
        .mount(
            "/api",
            routes![
                health,
                api_login,
                api_dashboard_login,
                api_logout,
                api_me,
                api_my_workbooks,
                api_get_workbook,
                api_update_answers,
                api_submit_workbook,
                api_complete_dashboard,
                api_list_users,
                api_create_user,
                api_get_user,
                api_update_user,
                api_delete_user,
                api_reactivate_user,
                api_assign_workbooks,
                api_list_templates,
                api_create_template,
                api_replace_template,
                api_list_workbooks,
                api_preview_workbook,
                api_review_workbook,
                api_set_feedback,
                api_reconcile_orphans,
            ],
        )
        .register("/api", catchers![unauthorized_api, default_api])
        .attach(TelemetryFairing)
}
