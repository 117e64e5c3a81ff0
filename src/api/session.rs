use chrono::{Duration, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use super::user_document;
use crate::auth::{SESSION_COOKIE, User, UserDocument, UserSession};
use crate::config::AppConfig;
use crate::db::{
    authenticate_user, create_user_session, find_user_by_dashboard_token, invalidate_session,
};
use crate::error::AppError;
use crate::validation::{ApiResult, JsonValidateExt};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DashboardLoginRequest {
    #[validate(length(min = 1, message = "Dashboard token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserDocument>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Issues a session cookie. A participant's session never outlives the
/// dashboard link it was opened with.
async fn start_session(
    pool: &Pool<Sqlite>,
    cookies: &CookieJar<'_>,
    user: &User,
    session_hours: i64,
) -> Result<(), AppError> {
    let token = UserSession::generate_token();
    let mut expires_at = Utc::now() + Duration::hours(session_hours);
    if !user.is_admin() {
        expires_at = expires_at.min(user.link_expires_at);
    }

    create_user_session(pool, user.id, &token, expires_at).await?;

    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::seconds(max_age)),
    );

    Ok(())
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    let Some(user) = authenticate_user(db, &validated.email, &validated.password).await? else {
        warn!("Failed login attempt");
        return Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid email or password".to_string()),
            redirect_url: None,
        }));
    };

    start_session(db, cookies, &user, config.session_hours).await?;
    info!(user_id = user.id, role = %user.role, "User logged in");

    let redirect_url = if user.is_admin() {
        "/admin".to_string()
    } else {
        "/dashboard".to_string()
    };

    Ok(Json(LoginResponse {
        success: true,
        user: Some(user_document(db, user).await?),
        error: None,
        redirect_url: Some(redirect_url),
    }))
}

/// Participants sign in with the token from their dashboard link.
#[post("/dashboard/login", data = "<login>")]
pub async fn api_dashboard_login(
    login: Json<DashboardLoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    let user = find_user_by_dashboard_token(db, validated.token.trim())
        .await?
        .filter(|user| !user.is_admin() && user.dashboard_link_valid(Utc::now()))
        .ok_or_else(|| {
            AppError::Authentication("Dashboard link is invalid or has expired".to_string())
        })?;

    start_session(db, cookies, &user, config.session_hours).await?;
    info!(user_id = user.id, "Participant opened dashboard");

    Ok(Json(LoginResponse {
        success: true,
        user: Some(user_document(db, user).await?),
        error: None,
        redirect_url: Some("/dashboard".to_string()),
    }))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Json<LogoutResponse> {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Json(LogoutResponse { success: true })
}

#[get("/me")]
pub async fn api_me(session: Option<User>, db: &State<Pool<Sqlite>>) -> ApiResult<Json<UserDocument>> {
    let user = session.ok_or_else(|| AppError::Authentication("Authentication required".to_string()))?;
    Ok(Json(user_document(db, user).await?))
}
