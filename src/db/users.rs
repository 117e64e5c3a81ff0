use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{Page, page_bounds};
use crate::auth::{DbUser, Role, User};
use crate::error::AppError;

const USER_COLUMNS: &str = "id, name, email, role, is_completed, completed_at, dashboard_expired, \
     link_expires_at, dashboard_token, created_at, updated_at";

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: Option<String>,
}

#[derive(Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub dashboard_expired: Option<bool>,
    pub link_expires_at: Option<DateTime<Utc>>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.dashboard_expired.is_none()
            && self.link_expires_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserSort {
    #[default]
    CreatedAt,
    Name,
    Email,
}

impl UserSort {
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "createdAt" | "created_at" => Ok(UserSort::CreatedAt),
            "name" => Ok(UserSort::Name),
            "email" => Ok(UserSort::Email),
            _ => Err(AppError::validation("sort", format!("Cannot sort users by {}", s))),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            UserSort::CreatedAt => "created_at",
            UserSort::Name => "name",
            UserSort::Email => "email",
        }
    }
}

#[derive(Default)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub sort: UserSort,
    pub descending: bool,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Inserts without a prior existence check; the unique index on `email`
/// decides concurrent creations and the loser gets `Conflict`.
#[instrument(skip_all, fields(email = %new_user.email, role = %new_user.role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    new_user: &NewUser,
    link_expiry_days: i64,
) -> Result<User, AppError> {
    info!("Creating new user");

    let email = normalize_email(&new_user.email);
    let password_hash = match new_user.password.as_deref() {
        Some(password) if !password.is_empty() => bcrypt::hash(password, bcrypt::DEFAULT_COST)?,
        _ => String::new(),
    };
    let now = Utc::now();
    let link_expires_at = now + Duration::days(link_expiry_days);
    let dashboard_token = Uuid::new_v4().simple().to_string();

    let res = sqlx::query(
        "INSERT INTO users
         (name, email, role, password, link_expires_at, dashboard_token, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new_user.name.trim())
    .bind(&email)
    .bind(new_user.role.as_str())
    .bind(password_hash)
    .bind(link_expires_at)
    .bind(dashboard_token)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| AppError::from_insert(e, format!("A user with email {} already exists", email)))?;

    get_user(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!("User with id {} not found", id))),
    }
}

#[instrument]
pub async fn find_user_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
    info!("Finding user by email");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE email = ?",
        USER_COLUMNS
    ))
    .bind(normalize_email(email))
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip(pool, token))]
pub async fn find_user_by_dashboard_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by dashboard token");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE dashboard_token = ?",
        USER_COLUMNS
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

/// Returns the user only if the password matches a stored hash. Accounts
/// without a password (participants) never match.
#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    #[derive(sqlx::FromRow)]
    struct Credentials {
        id: i64,
        password: String,
    }

    let row = sqlx::query_as::<_, Credentials>("SELECT id, password FROM users WHERE email = ?")
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    if row.password.is_empty() || password.is_empty() {
        return Ok(None);
    }

    match bcrypt::verify(password, &row.password) {
        Ok(true) => Ok(Some(get_user(pool, row.id).await?)),
        Ok(false) => Ok(None),
        Err(e) => {
            warn!(error = %e, "Stored password hash could not be verified");
            Ok(None)
        }
    }
}

#[instrument(skip(pool, query))]
pub async fn list_users(pool: &Pool<Sqlite>, query: &UserQuery) -> Result<Page<User>, AppError> {
    info!("Listing users");
    let (skip, limit) = page_bounds(query.skip, query.limit);

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users", USER_COLUMNS));
    if let Some(role) = query.role {
        count.push(" WHERE role = ").push_bind(role.as_str());
        select.push(" WHERE role = ").push_bind(role.as_str());
    }

    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    select.push(format!(
        " ORDER BY {} {}, id {} LIMIT ",
        query.sort.column(),
        if query.descending { "DESC" } else { "ASC" },
        if query.descending { "DESC" } else { "ASC" },
    ));
    select.push_bind(limit).push(" OFFSET ").push_bind(skip);

    let rows = select.build_query_as::<DbUser>().fetch_all(pool).await?;
    let items = rows
        .into_iter()
        .map(User::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        skip,
        limit,
    })
}

#[instrument(skip(pool))]
pub async fn get_user_workbook_ids(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT workbook_id FROM user_workbooks WHERE user_id = ? ORDER BY position",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

#[instrument(skip(pool, changes))]
pub async fn update_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
    changes: &UserChanges,
) -> Result<User, AppError> {
    info!("Admin updating user");

    if changes.is_empty() {
        return get_user(pool, user_id).await;
    }

    let mut update = QueryBuilder::<Sqlite>::new("UPDATE users SET updated_at = ");
    update.push_bind(Utc::now());

    if let Some(name) = &changes.name {
        update.push(", name = ").push_bind(name.trim().to_string());
    }
    if let Some(email) = &changes.email {
        update.push(", email = ").push_bind(normalize_email(email));
    }
    if let Some(role) = changes.role {
        update.push(", role = ").push_bind(role.as_str());
    }
    if let Some(expired) = changes.dashboard_expired {
        update.push(", dashboard_expired = ").push_bind(expired);
    }
    if let Some(expires_at) = changes.link_expires_at {
        update.push(", link_expires_at = ").push_bind(expires_at);
    }
    update.push(" WHERE id = ").push_bind(user_id);

    let result = update.build().execute(pool).await.map_err(|e| {
        AppError::from_insert(e, "Another user already uses this email".to_string())
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User with id {} not found", user_id)));
    }

    get_user(pool, user_id).await
}

/// Reopens a participant's dashboard. Workbook statuses are left as they are.
#[instrument(skip(pool))]
pub async fn reactivate_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
    days: i64,
) -> Result<User, AppError> {
    info!("Reactivating user");
    let now = Utc::now();

    let result = sqlx::query(
        "UPDATE users
         SET is_completed = FALSE, dashboard_expired = FALSE, link_expires_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(now + Duration::days(days))
    .bind(now)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User with id {} not found", user_id)));
    }

    get_user(pool, user_id).await
}

/// Marks the participant's dashboard as finished, which also expires the link.
#[instrument(skip(pool))]
pub async fn complete_user(pool: &Pool<Sqlite>, user_id: i64) -> Result<User, AppError> {
    info!("Completing user dashboard");

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM workbooks
         WHERE assigned_to = ? AND COALESCE(is_template, 0) = 0
           AND status IN ('draft', 'assigned', 'in_progress')",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    if open > 0 {
        return Err(AppError::validation(
            "workbooks",
            format!("{} workbooks have not been submitted yet", open),
        ));
    }

    let now = Utc::now();
    sqlx::query(
        "UPDATE users
         SET is_completed = TRUE, completed_at = ?, dashboard_expired = TRUE, updated_at = ?
         WHERE id = ?",
    )
    .bind(now)
    .bind(now)
    .bind(user_id)
    .execute(pool)
    .await?;

    get_user(pool, user_id).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDeletion {
    pub user_id: i64,
    pub workbooks_deleted: u64,
}

/// Deletes a participant and every instance they own. Templates are never
/// touched; admin accounts are refused no matter who asks.
#[instrument(skip(pool))]
pub async fn delete_user_cascade(pool: &Pool<Sqlite>, user_id: i64) -> Result<UserDeletion, AppError> {
    info!("Deleting user with cascade");

    let user = get_user(pool, user_id).await?;
    if user.is_admin() {
        return Err(AppError::Authorization(
            "Administrative accounts cannot be deleted".to_string(),
        ));
    }

    // Templates are never touched here; one naming this user blocks the delete.
    let owned_templates: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM workbooks WHERE assigned_to = ? AND is_template = 1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    if owned_templates > 0 {
        warn!(owned_templates, "User is recorded as a template owner");
        return Err(AppError::Integrity(format!(
            "User {} is recorded as the owner of {} template(s)",
            user_id, owned_templates
        )));
    }

    let deleted = sqlx::query(
        "DELETE FROM workbooks WHERE assigned_to = ? AND COALESCE(is_template, 0) = 0",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM user_workbooks WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    info!(
        workbooks_deleted = deleted.rows_affected(),
        "User and owned workbooks deleted"
    );

    Ok(UserDeletion {
        user_id,
        workbooks_deleted: deleted.rows_affected(),
    })
}
