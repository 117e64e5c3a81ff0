//! Authorization decisions for mutating operations.
//!
//! The gate only answers allowed/denied. Denials fall into exactly three
//! classes so callers cannot learn anything finer about a resource, such as
//! whether it exists.

use serde::Serialize;

use super::{Permission, User};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    NoSession,
    InsufficientRole,
    WrongOwner,
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::NoSession => "Authentication required",
            Denial::InsufficientRole => "You don't have permission to perform this action",
            Denial::WrongOwner => "This resource does not belong to you",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied(Denial),
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allowed)
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            AuthDecision::Allowed => Ok(()),
            AuthDecision::Denied(Denial::NoSession) => {
                Err(AppError::Authentication(Denial::NoSession.reason().to_string()))
            }
            AuthDecision::Denied(denial) => Err(AppError::Authorization(denial.reason().to_string())),
        }
    }
}

pub fn authorize(session: Option<&User>, permission: Permission) -> AuthDecision {
    match session {
        None => AuthDecision::Denied(Denial::NoSession),
        Some(user) if user.has_permission(permission) => AuthDecision::Allowed,
        Some(user) => {
            tracing::warn!(
                user_id = user.id,
                role = %user.role,
                permission = ?permission,
                "Permission denied"
            );
            AuthDecision::Denied(Denial::InsufficientRole)
        }
    }
}

/// `owner_id` is `None` when the resource could not be resolved; that case is
/// reported exactly like someone else's resource.
pub fn authorize_owner(
    session: Option<&User>,
    permission: Permission,
    owner_id: Option<i64>,
) -> AuthDecision {
    let Some(user) = session else {
        return AuthDecision::Denied(Denial::NoSession);
    };

    if !user.has_permission(permission) {
        return AuthDecision::Denied(Denial::InsufficientRole);
    }

    match owner_id {
        Some(owner) if owner == user.id => AuthDecision::Allowed,
        _ => {
            tracing::warn!(user_id = user.id, permission = ?permission, "Ownership check failed");
            AuthDecision::Denied(Denial::WrongOwner)
        }
    }
}

/// Gate-and-unwrap for handlers that need the caller afterwards.
pub fn require_permission(session: Option<User>, permission: Permission) -> Result<User, AppError> {
    authorize(session.as_ref(), permission).into_result()?;
    session.ok_or_else(|| AppError::Authentication(Denial::NoSession.reason().to_string()))
}
