//! Participant-facing endpoints. Every mutation here goes through the
//! ownership gate; a workbook that cannot be resolved is reported the same way
//! as someone else's.

use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{Notified, SharedNotifier, user_document};
use crate::auth::{Permission, User, UserDocument, authorize_owner, require_permission};
use crate::config::AppConfig;
use crate::db::{
    complete_user, find_workbook, get_user_instances, save_instance_progress, submit_instance,
};
use crate::error::AppError;
use crate::models::{AnswerUpdate, Instance, Workbook, WorkbookDocument};
use crate::notify::{deliver, workbook_submitted};
use crate::validation::{ApiResult, JsonValidateExt};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnswersRequest {
    #[serde(default)]
    pub answers: Vec<AnswerUpdate>,
    #[serde(default)]
    pub user_response: Option<String>,
}

/// Resolves an instance the caller owns, or denies.
async fn owned_instance(
    pool: &Pool<Sqlite>,
    session: Option<&User>,
    permission: Permission,
    workbook_id: i64,
) -> Result<Instance, AppError> {
    let instance = match find_workbook(pool, workbook_id).await? {
        Some(Workbook::Instance(instance)) => Some(instance),
        _ => None,
    };

    authorize_owner(session, permission, instance.as_ref().map(|i| i.owner_id)).into_result()?;

    instance.ok_or_else(|| AppError::Internal("Authorized workbook vanished".to_string()))
}

#[get("/me/workbooks")]
pub async fn api_my_workbooks(
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<WorkbookDocument>>> {
    let user = require_permission(session, Permission::ViewOwnWorkbooks)?;
    let instances = get_user_instances(db, user.id).await?;

    Ok(Json(instances.into_iter().map(WorkbookDocument::from).collect()))
}

#[get("/workbooks/<id>")]
pub async fn api_get_workbook(
    id: i64,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<WorkbookDocument>> {
    let instance = owned_instance(db, session.as_ref(), Permission::ViewOwnWorkbooks, id).await?;
    Ok(Json(instance.into()))
}

#[put("/workbooks/<id>/answers", data = "<request>")]
pub async fn api_update_answers(
    id: i64,
    request: Json<AnswersRequest>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<WorkbookDocument>> {
    let mut instance =
        owned_instance(db, session.as_ref(), Permission::AnswerOwnWorkbooks, id).await?;
    let request = request.validate_custom()?;

    let read_status = instance.status;
    instance.apply_answers(&request.answers, request.user_response)?;
    let saved = save_instance_progress(db, &instance, read_status).await?;

    Ok(Json(saved.into()))
}

#[post("/workbooks/<id>/submit")]
pub async fn api_submit_workbook(
    id: i64,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    notifier: &State<SharedNotifier>,
) -> ApiResult<Json<Notified<WorkbookDocument>>> {
    let instance =
        owned_instance(db, session.as_ref(), Permission::SubmitOwnWorkbooks, id).await?;
    let submitted = submit_instance(db, &instance).await?;
    info!(workbook_id = submitted.id, "Workbook submitted");

    let warning = match (&config.admin_email, session.as_ref()) {
        (Some(admin_email), Some(user)) => {
            deliver(
                notifier.inner().as_ref(),
                workbook_submitted(admin_email, user, &submitted),
            )
            .await
        }
        _ => None,
    };

    Ok(Json(Notified::new(submitted.into(), warning)))
}

#[post("/me/complete")]
pub async fn api_complete_dashboard(
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<UserDocument>> {
    let user = require_permission(session, Permission::CompleteOwnDashboard)?;
    let completed = complete_user(db, user.id).await?;
    info!(user_id = completed.id, "Participant completed dashboard");

    Ok(Json(user_document(db, completed).await?))
}
