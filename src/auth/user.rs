use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

use super::{Permission, Role};
use crate::error::AppError;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub dashboard_expired: bool,
    pub link_expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub dashboard_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default, Debug)]
pub struct DbUser {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dashboard_expired: Option<bool>,
    pub link_expires_at: Option<DateTime<Utc>>,
    pub dashboard_token: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(user: DbUser) -> Result<Self, Self::Error> {
        let id = user.id.unwrap_or_default();
        let role = user
            .role
            .as_deref()
            .unwrap_or("user")
            .parse()
            .map_err(|_| AppError::Integrity(format!("User {} has an unknown role", id)))?;
        let created_at = user.created_at.unwrap_or_else(Utc::now);

        Ok(Self {
            id,
            name: user.name.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            role,
            is_completed: user.is_completed.unwrap_or_default(),
            completed_at: user.completed_at,
            dashboard_expired: user.dashboard_expired.unwrap_or_default(),
            // A missing expiry means the link was never issued.
            link_expires_at: user.link_expires_at.unwrap_or(created_at),
            dashboard_token: user.dashboard_token.unwrap_or_default(),
            created_at,
            updated_at: user.updated_at.unwrap_or(created_at),
        })
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// `dashboard_expired` wins over `link_expires_at`.
    pub fn dashboard_link_valid(&self, now: DateTime<Utc>) -> bool {
        !self.dashboard_expired && now < self.link_expires_at
    }

    pub fn dashboard_url(&self, public_url: &str) -> String {
        format!(
            "{}/dashboard/{}",
            public_url.trim_end_matches('/'),
            self.dashboard_token
        )
    }
}

/// Wire shape of a user, including the ordered workbook list.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(rename = "_id")]
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub dashboard_expired: bool,
    pub link_expires_at: DateTime<Utc>,
    pub workbooks: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDocument {
    pub fn new(user: User, workbooks: Vec<i64>) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            is_completed: user.is_completed,
            completed_at: user.completed_at,
            dashboard_expired: user.dashboard_expired,
            link_expires_at: user.link_expires_at,
            workbooks,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<DbUserSession> for UserSession {
    fn from(session: DbUserSession) -> Self {
        let created_at = session.created_at.unwrap_or_else(Utc::now);
        Self {
            id: session.id.unwrap_or_default(),
            user_id: session.user_id.unwrap_or_default(),
            token: session.token.unwrap_or_default(),
            created_at,
            expires_at: session.expires_at.unwrap_or(created_at),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}
