use rocket::figment::Figment;
use serde::{Deserialize, Serialize};

/// Application settings read from the Rocket figment (`Rocket.toml` and
/// `ROCKET_*` variables), next to Rocket's own server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session_hours: i64,
    pub link_expiry_days: i64,
    pub reactivation_days: i64,
    pub public_url: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub mail_from: String,
    pub admin_email: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_hours: 8,
            link_expiry_days: 30,
            reactivation_days: 30,
            public_url: "http://localhost:8000".to_string(),
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            mail_from: "noreply@localhost".to_string(),
            admin_email: None,
        }
    }
}

impl AppConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
        figment.extract()
    }

    pub fn smtp_configured(&self) -> bool {
        self.smtp_host.as_deref().is_some_and(|host| !host.trim().is_empty())
    }
}
