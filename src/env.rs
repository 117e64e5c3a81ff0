use std::path::Path;

use tracing::{info, warn};

const COMMON_ENV: &str = "config/common.env";
const SECRETS_ENV: &str = ".secrets.env";

fn profile_env_file(profile: &str) -> &'static str {
    match profile {
        "production" | "release" => "config/prod.env",
        _ => "config/dev.env",
    }
}

/// Loads `.env` style files in order; later files override earlier ones.
/// Missing files are skipped.
pub fn load_environment() -> anyhow::Result<Vec<&'static str>> {
    let profile = dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

    let mut loaded = Vec::new();
    for env_file in [COMMON_ENV, profile_env_file(&profile), SECRETS_ENV] {
        if load_env_file(env_file)? {
            loaded.push(env_file);
        }
    }

    Ok(loaded)
}

fn load_env_file(path: &'static str) -> anyhow::Result<bool> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(false);
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(true)
}
