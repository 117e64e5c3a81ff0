use chrono::{DateTime, Utc};
use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{Notified, SharedNotifier, notify_user, user_document};
use crate::auth::{Permission, Role, User, UserDocument, require_permission};
use crate::config::AppConfig;
use crate::db::{
    NewUser, Page, SkippedAssignment, UserChanges, UserQuery, UserSort, assign_template,
    assign_templates, create_user, delete_user_cascade, get_user, invalidate_user_sessions,
    list_users, reactivate_user, update_user,
};
use crate::error::AppError;
use crate::models::WorkbookDocument;
use crate::notify::{dashboard_invitation, dashboard_reactivated, deliver, workbooks_assigned};
use crate::validation::{ApiResult, JsonValidateExt};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, message = "Name cannot be empty"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub dashboard_expired: Option<bool>,
    pub link_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReactivateRequest {
    #[validate(range(min = 1, max = 365, message = "Days must be between 1 and 365"))]
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[validate(length(min = 1, message = "At least one template is required"))]
    pub template_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResponse {
    pub assigned: Vec<WorkbookDocument>,
    pub skipped: Vec<SkippedAssignment>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionResponse {
    pub user_id: i64,
    pub workbooks_deleted: u64,
}

#[get("/admin/users?<role>&<sort>&<order>&<skip>&<limit>")]
pub async fn api_list_users(
    role: Option<&str>,
    sort: Option<&str>,
    order: Option<&str>,
    skip: Option<i64>,
    limit: Option<i64>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Page<UserDocument>>> {
    require_permission(session, Permission::ManageUsers)?;

    let query = UserQuery {
        role: role.map(str::parse::<Role>).transpose()?,
        sort: sort.map(UserSort::parse).transpose()?.unwrap_or_default(),
        descending: matches!(order, Some("desc")),
        skip,
        limit,
    };

    let page = list_users(db, &query).await?;
    let mut items = Vec::with_capacity(page.items.len());
    for user in page.items {
        items.push(user_document(db, user).await?);
    }

    Ok(Json(Page {
        items,
        total: page.total,
        skip: page.skip,
        limit: page.limit,
    }))
}

#[post("/admin/users", data = "<request>")]
pub async fn api_create_user(
    request: Json<CreateUserRequest>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    notifier: &State<SharedNotifier>,
) -> ApiResult<Json<Notified<UserDocument>>> {
    let admin = require_permission(session, Permission::ManageUsers)?;
    let request = request.validate_custom()?;

    let role = request.role.unwrap_or(Role::User);
    let password = request.password.filter(|p| !p.is_empty());
    if role == Role::Admin && password.is_none() {
        return Err(AppError::validation("password", "Administrators need a password").into());
    }

    let user = create_user(
        db,
        &NewUser {
            name: request.name,
            email: request.email,
            role,
            password,
        },
        config.link_expiry_days,
    )
    .await?;
    info!(admin_id = admin.id, user_id = user.id, "User created");

    let warning = if user.is_admin() {
        None
    } else {
        deliver(
            notifier.inner().as_ref(),
            dashboard_invitation(&user, &config.public_url),
        )
        .await
    };

    Ok(Json(Notified::new(user_document(db, user).await?, warning)))
}

#[get("/admin/users/<id>")]
pub async fn api_get_user(
    id: i64,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<UserDocument>> {
    require_permission(session, Permission::ManageUsers)?;
    let user = get_user(db, id).await?;
    Ok(Json(user_document(db, user).await?))
}

#[put("/admin/users/<id>", data = "<request>")]
pub async fn api_update_user(
    id: i64,
    request: Json<UpdateUserRequest>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<UserDocument>> {
    require_permission(session, Permission::ManageUsers)?;
    let request = request.validate_custom()?;

    let changes = UserChanges {
        name: request.name,
        email: request.email,
        role: request.role,
        dashboard_expired: request.dashboard_expired,
        link_expires_at: request.link_expires_at,
    };

    let user = update_user(db, id, &changes).await?;
    if changes.dashboard_expired == Some(true) {
        let revoked = invalidate_user_sessions(db, user.id).await?;
        info!(user_id = user.id, revoked, "Dashboard expired by admin");
    }

    Ok(Json(user_document(db, user).await?))
}

#[delete("/admin/users/<id>")]
pub async fn api_delete_user(
    id: i64,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<DeletionResponse>> {
    let admin = require_permission(session, Permission::ManageUsers)?;
    let deletion = delete_user_cascade(db, id).await?;
    info!(admin_id = admin.id, user_id = id, "User deleted");

    Ok(Json(DeletionResponse {
        user_id: deletion.user_id,
        workbooks_deleted: deletion.workbooks_deleted,
    }))
}

#[post("/admin/users/<id>/reactivate", data = "<request>")]
pub async fn api_reactivate_user(
    id: i64,
    request: Option<Json<ReactivateRequest>>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    notifier: &State<SharedNotifier>,
) -> ApiResult<Json<Notified<UserDocument>>> {
    require_permission(session, Permission::ManageUsers)?;
    let request = match request {
        Some(request) => request.validate_custom()?,
        None => ReactivateRequest::default(),
    };

    let days = request.days.unwrap_or(config.reactivation_days);
    let user = reactivate_user(db, id, days).await?;

    let warning = deliver(
        notifier.inner().as_ref(),
        dashboard_reactivated(&user, &config.public_url),
    )
    .await;

    Ok(Json(Notified::new(user_document(db, user).await?, warning)))
}

/// One template is a single assignment and fails on a duplicate; several are
/// a batch that reports duplicates as skipped.
#[post("/admin/users/<id>/workbooks", data = "<request>")]
pub async fn api_assign_workbooks(
    id: i64,
    request: Json<AssignRequest>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    notifier: &State<SharedNotifier>,
) -> ApiResult<Json<Notified<AssignmentResponse>>> {
    let admin = require_permission(session, Permission::AssignWorkbooks)?;
    let request = request.validate_custom()?;

    let (assigned, skipped) = match request.template_ids.as_slice() {
        [template_id] => (vec![assign_template(db, *template_id, id).await?], Vec::new()),
        template_ids => {
            let outcome = assign_templates(db, id, template_ids).await?;
            (outcome.assigned, outcome.skipped)
        }
    };
    info!(
        admin_id = admin.id,
        user_id = id,
        assigned = assigned.len(),
        skipped = skipped.len(),
        "Templates assigned"
    );

    let warning = if assigned.is_empty() {
        None
    } else {
        notify_user(db, notifier.inner().as_ref(), id, |user| {
            workbooks_assigned(user, &assigned, &config.public_url)
        })
        .await
    };

    Ok(Json(Notified::new(
        AssignmentResponse {
            assigned: assigned.into_iter().map(WorkbookDocument::from).collect(),
            skipped,
        },
        warning,
    )))
}
