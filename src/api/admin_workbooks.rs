use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{Notified, SharedNotifier, notify_user};
use crate::auth::{Permission, User, require_permission};
use crate::config::AppConfig;
use crate::db::{
    InstanceQuery, NewTemplate, Page, ReconciliationReport, create_template, get_instance,
    list_instances, list_templates, reconcile_orphans, replace_template, review_instance,
    set_admin_feedback,
};
use crate::error::AppError;
use crate::models::{WorkbookDocument, WorkbookStatus};
use crate::notify::workbook_reviewed;
use crate::validation::{ApiResult, JsonValidateExt};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct TemplateRequest {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

impl From<TemplateRequest> for NewTemplate {
    fn from(request: TemplateRequest) -> Self {
        Self {
            title: request.title,
            description: request.description,
            content: request.content,
            link: request.link.filter(|link| !link.trim().is_empty()),
            questions: request
                .questions
                .into_iter()
                .filter(|q| !q.trim().is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct FeedbackRequest {
    pub feedback: String,
}

#[get("/admin/templates?<skip>&<limit>")]
pub async fn api_list_templates(
    skip: Option<i64>,
    limit: Option<i64>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Page<WorkbookDocument>>> {
    require_permission(session, Permission::ManageTemplates)?;
    let page = list_templates(db, skip, limit).await?;
    Ok(Json(page.map(WorkbookDocument::from)))
}

#[post("/admin/templates", data = "<request>")]
pub async fn api_create_template(
    request: Json<TemplateRequest>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<WorkbookDocument>> {
    let admin = require_permission(session, Permission::ManageTemplates)?;
    let request = request.validate_custom()?;

    let template = create_template(db, &request.into()).await?;
    info!(admin_id = admin.id, template_id = template.id, "Template created");

    Ok(Json(template.into()))
}

#[put("/admin/templates/<id>", data = "<request>")]
pub async fn api_replace_template(
    id: i64,
    request: Json<TemplateRequest>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<WorkbookDocument>> {
    require_permission(session, Permission::ManageTemplates)?;
    let request = request.validate_custom()?;

    let template = replace_template(db, id, &request.into()).await?;
    Ok(Json(template.into()))
}

#[get("/admin/workbooks?<status>&<assigned_to>&<template_id>&<skip>&<limit>")]
pub async fn api_list_workbooks(
    status: Option<&str>,
    assigned_to: Option<i64>,
    template_id: Option<i64>,
    skip: Option<i64>,
    limit: Option<i64>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Page<WorkbookDocument>>> {
    require_permission(session, Permission::ReviewWorkbooks)?;

    let query = InstanceQuery {
        status: status.map(str::parse::<WorkbookStatus>).transpose()?,
        assigned_to,
        template_id,
        skip,
        limit,
    };

    let page = list_instances(db, &query).await?;
    Ok(Json(page.map(WorkbookDocument::from)))
}

/// Admins see a participant's answers only once work on them has started.
#[get("/admin/workbooks/<id>/preview")]
pub async fn api_preview_workbook(
    id: i64,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<WorkbookDocument>> {
    require_permission(session, Permission::PreviewWorkbooks)?;

    let instance = get_instance(db, id).await?;
    if !instance.status.is_previewable() {
        return Err(AppError::validation(
            "status",
            format!("Workbook {} has not been started yet", instance.id),
        )
        .into());
    }

    Ok(Json(instance.into()))
}

#[post("/admin/workbooks/<id>/review")]
pub async fn api_review_workbook(
    id: i64,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    notifier: &State<SharedNotifier>,
) -> ApiResult<Json<Notified<WorkbookDocument>>> {
    let admin = require_permission(session, Permission::ReviewWorkbooks)?;

    let reviewed = review_instance(db, id).await?;
    info!(admin_id = admin.id, workbook_id = reviewed.id, "Workbook reviewed");

    let warning = notify_user(db, notifier.inner().as_ref(), reviewed.owner_id, |owner| {
        workbook_reviewed(owner, &reviewed, &config.public_url)
    })
    .await;

    Ok(Json(Notified::new(reviewed.into(), warning)))
}

#[put("/admin/workbooks/<id>/feedback", data = "<request>")]
pub async fn api_set_feedback(
    id: i64,
    request: Json<FeedbackRequest>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<WorkbookDocument>> {
    require_permission(session, Permission::ReviewWorkbooks)?;
    let request = request.validate_custom()?;

    let instance = set_admin_feedback(db, id, &request.feedback).await?;
    Ok(Json(instance.into()))
}

#[post("/admin/maintenance/reconcile?<dry_run>")]
pub async fn api_reconcile_orphans(
    dry_run: Option<bool>,
    session: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<ReconciliationReport>> {
    let admin = require_permission(session, Permission::RunMaintenance)?;
    let dry_run = dry_run.unwrap_or(false);

    let report = reconcile_orphans(db, dry_run).await?;
    info!(admin_id = admin.id, deleted = report.deleted, dry_run, "Reconciliation requested");

    Ok(Json(report))
}
