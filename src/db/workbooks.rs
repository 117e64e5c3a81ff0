use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument, warn};

use super::{Page, get_user, page_bounds};
use crate::error::AppError;
use crate::models::{
    DbWorkbook, Instance, NewInstance, Question, Template, Workbook, WorkbookStatus,
};

const WORKBOOK_COLUMNS: &str = "id, title, description, content, link, questions, status, \
     is_template, assigned_to, template_id, shareable_link, user_response, admin_feedback, \
     created_at, updated_at";

/// Only rows that decode into a well-formed instance.
const INSTANCE_FILTER: &str =
    "COALESCE(is_template, 0) = 0 AND assigned_to IS NOT NULL AND template_id IS NOT NULL";

#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
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

impl NewTemplate {
    fn questions_json(&self) -> Result<String, AppError> {
        let questions: Vec<Question> = self
            .questions
            .iter()
            .map(|q| Question::unanswered(q.trim()))
            .collect();
        Ok(serde_json::to_string(&questions)?)
    }
}

#[instrument(skip(pool, template), fields(title = %template.title))]
pub async fn create_template(pool: &Pool<Sqlite>, template: &NewTemplate) -> Result<Template, AppError> {
    info!("Creating template");
    let now = Utc::now();

    let res = sqlx::query(
        "INSERT INTO workbooks
         (title, description, content, link, questions, status, is_template, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, TRUE, ?, ?)",
    )
    .bind(template.title.trim())
    .bind(&template.description)
    .bind(&template.content)
    .bind(&template.link)
    .bind(template.questions_json()?)
    .bind(WorkbookStatus::Assigned.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_workbook(pool, res.last_insert_rowid())
        .await?
        .into_template()
}

/// Replaces a template's content in place. Existing instances keep the copy
/// they were created with.
#[instrument(skip(pool, template), fields(title = %template.title))]
pub async fn replace_template(
    pool: &Pool<Sqlite>,
    template_id: i64,
    template: &NewTemplate,
) -> Result<Template, AppError> {
    info!("Replacing template");
    get_workbook(pool, template_id).await?.into_template()?;

    sqlx::query(
        "UPDATE workbooks
         SET title = ?, description = ?, content = ?, link = ?, questions = ?, updated_at = ?
         WHERE id = ? AND is_template = 1",
    )
    .bind(template.title.trim())
    .bind(&template.description)
    .bind(&template.content)
    .bind(&template.link)
    .bind(template.questions_json()?)
    .bind(Utc::now())
    .bind(template_id)
    .execute(pool)
    .await?;

    get_workbook(pool, template_id).await?.into_template()
}

#[instrument(skip(pool))]
pub async fn list_templates(
    pool: &Pool<Sqlite>,
    skip: Option<i64>,
    limit: Option<i64>,
) -> Result<Page<Template>, AppError> {
    info!("Listing templates");
    let (skip, limit) = page_bounds(skip, limit);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workbooks WHERE is_template = 1")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query_as::<_, DbWorkbook>(&format!(
        "SELECT {} FROM workbooks WHERE is_template = 1 ORDER BY title, id LIMIT ? OFFSET ?",
        WORKBOOK_COLUMNS
    ))
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| Workbook::try_from(row)?.into_template())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        skip,
        limit,
    })
}

#[instrument(skip(pool))]
pub async fn find_template_by_title(
    pool: &Pool<Sqlite>,
    title: &str,
) -> Result<Option<Template>, AppError> {
    let row = sqlx::query_as::<_, DbWorkbook>(&format!(
        "SELECT {} FROM workbooks WHERE is_template = 1 AND title = ? LIMIT 1",
        WORKBOOK_COLUMNS
    ))
    .bind(title.trim())
    .fetch_optional(pool)
    .await?;

    row.map(|r| Workbook::try_from(r)?.into_template())
        .transpose()
}

#[instrument(skip(pool))]
pub async fn find_workbook(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Workbook>, AppError> {
    let row = sqlx::query_as::<_, DbWorkbook>(&format!(
        "SELECT {} FROM workbooks WHERE id = ?",
        WORKBOOK_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Workbook::try_from).transpose()
}

#[instrument(skip(pool))]
pub async fn get_workbook(pool: &Pool<Sqlite>, id: i64) -> Result<Workbook, AppError> {
    info!("Getting workbook");
    find_workbook(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Workbook with id {} not found", id)))
}

pub async fn get_instance(pool: &Pool<Sqlite>, id: i64) -> Result<Instance, AppError> {
    get_workbook(pool, id).await?.into_instance()
}

/// The user's instances in the order they were assigned.
#[instrument(skip(pool))]
pub async fn get_user_instances(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<Instance>, AppError> {
    info!("Getting user workbooks");
    let rows = sqlx::query_as::<_, DbWorkbook>(&format!(
        "SELECT {} FROM workbooks w
         WHERE w.assigned_to = ? AND {}
         ORDER BY (SELECT uw.position FROM user_workbooks uw
                   WHERE uw.user_id = w.assigned_to AND uw.workbook_id = w.id) IS NULL,
                  (SELECT uw.position FROM user_workbooks uw
                   WHERE uw.user_id = w.assigned_to AND uw.workbook_id = w.id),
                  w.id",
        WORKBOOK_COLUMNS, INSTANCE_FILTER
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| Workbook::try_from(row)?.into_instance())
        .collect()
}

#[derive(Debug, Default)]
pub struct InstanceQuery {
    pub status: Option<WorkbookStatus>,
    pub assigned_to: Option<i64>,
    pub template_id: Option<i64>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[instrument(skip(pool))]
pub async fn list_instances(
    pool: &Pool<Sqlite>,
    query: &InstanceQuery,
) -> Result<Page<Instance>, AppError> {
    info!("Listing workbook instances");
    let (skip, limit) = page_bounds(query.skip, query.limit);

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &InstanceQuery) {
        builder.push(" WHERE ").push(INSTANCE_FILTER);
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(owner) = query.assigned_to {
            builder.push(" AND assigned_to = ").push_bind(owner);
        }
        if let Some(template) = query.template_id {
            builder.push(" AND template_id = ").push_bind(template);
        }
    }

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM workbooks");
    push_filters(&mut count, query);
    let total = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut select =
        QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM workbooks", WORKBOOK_COLUMNS));
    push_filters(&mut select, query);
    select.push(" ORDER BY updated_at DESC, id DESC LIMIT ");
    select.push_bind(limit).push(" OFFSET ").push_bind(skip);

    let rows = select.build_query_as::<DbWorkbook>().fetch_all(pool).await?;
    let items = rows
        .into_iter()
        .map(|row| Workbook::try_from(row)?.into_instance())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        skip,
        limit,
    })
}

#[instrument(skip(pool, instance), fields(owner_id = instance.owner_id, template_id = instance.template_id))]
async fn insert_instance(pool: &Pool<Sqlite>, instance: &NewInstance) -> Result<Instance, AppError> {
    let now = Utc::now();

    let res = sqlx::query(
        "INSERT INTO workbooks
         (title, description, content, link, questions, status, is_template, assigned_to,
          template_id, shareable_link, user_response, admin_feedback, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, FALSE, ?, ?, '', '', '', ?, ?)",
    )
    .bind(&instance.title)
    .bind(&instance.description)
    .bind(&instance.content)
    .bind(&instance.link)
    .bind(serde_json::to_string(&instance.questions)?)
    .bind(WorkbookStatus::Assigned.as_str())
    .bind(instance.owner_id)
    .bind(instance.template_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| {
        AppError::from_insert(
            e,
            format!(
                "User {} already has a workbook titled '{}'",
                instance.owner_id, instance.title
            ),
        )
    })?;
    let instance_id = res.last_insert_rowid();

    sqlx::query(
        "INSERT INTO user_workbooks (user_id, workbook_id, position)
         SELECT ?, ?, COALESCE(MAX(position), -1) + 1 FROM user_workbooks WHERE user_id = ?",
    )
    .bind(instance.owner_id)
    .bind(instance_id)
    .bind(instance.owner_id)
    .execute(pool)
    .await?;

    get_instance(pool, instance_id).await
}

/// Copies a template into a new instance owned by `user_id`.
///
/// The template row is only read. A second instance with the same title for
/// the same user is refused with `Conflict`; the unique index on
/// `(assigned_to, title)` settles concurrent assignments.
#[instrument(skip(pool))]
pub async fn assign_template(
    pool: &Pool<Sqlite>,
    template_id: i64,
    user_id: i64,
) -> Result<Instance, AppError> {
    info!("Assigning template to user");

    let user = get_user(pool, user_id).await?;
    let template = get_workbook(pool, template_id).await?.into_template()?;

    let duplicate: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM workbooks
         WHERE assigned_to = ? AND title = ? AND COALESCE(is_template, 0) = 0
         LIMIT 1",
    )
    .bind(user.id)
    .bind(&template.title)
    .fetch_optional(pool)
    .await?;

    if let Some(existing) = duplicate {
        warn!(existing_id = existing, "User already holds a workbook with this title");
        return Err(AppError::Conflict(format!(
            "User {} already has a workbook titled '{}'",
            user.id, template.title
        )));
    }

    insert_instance(pool, &template.instantiate(user.id)).await
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAssignment {
    pub template_id: i64,
    pub reason: String,
}

#[derive(Debug)]
pub struct AssignmentOutcome {
    pub assigned: Vec<Instance>,
    pub skipped: Vec<SkippedAssignment>,
}

/// Assigns several templates in one go. Duplicates and non-templates are
/// reported per template instead of failing the whole batch; a missing user
/// still fails it.
#[instrument(skip(pool))]
pub async fn assign_templates(
    pool: &Pool<Sqlite>,
    user_id: i64,
    template_ids: &[i64],
) -> Result<AssignmentOutcome, AppError> {
    info!("Assigning templates to user");
    get_user(pool, user_id).await?;

    let mut outcome = AssignmentOutcome {
        assigned: Vec::new(),
        skipped: Vec::new(),
    };

    for &template_id in template_ids {
        match assign_template(pool, template_id, user_id).await {
            Ok(instance) => outcome.assigned.push(instance),
            Err(
                err @ (AppError::Conflict(_)
                | AppError::NotFound(_)
                | AppError::Validation { .. }),
            ) => outcome.skipped.push(SkippedAssignment {
                template_id,
                reason: err.to_string(),
            }),
            Err(err) => return Err(err),
        }
    }

    Ok(outcome)
}

/// Persists answers, response and status of an instance.
///
/// `read_status` is the status the edit was based on. If the stored row has
/// moved on since then the write is refused with `InvalidTransition`.
#[instrument(skip(pool, instance), fields(instance_id = instance.id, status = %instance.status))]
pub async fn save_instance_progress(
    pool: &Pool<Sqlite>,
    instance: &Instance,
    read_status: WorkbookStatus,
) -> Result<Instance, AppError> {
    info!("Saving workbook progress");

    let result = sqlx::query(
        "UPDATE workbooks SET questions = ?, user_response = ?, status = ?, updated_at = ?
         WHERE id = ? AND status = ? AND COALESCE(is_template, 0) = 0",
    )
    .bind(serde_json::to_string(&instance.questions)?)
    .bind(&instance.user_response)
    .bind(instance.status.as_str())
    .bind(Utc::now())
    .bind(instance.id)
    .bind(read_status.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(stale_write(pool, instance.id, instance.status).await);
    }

    get_instance(pool, instance.id).await
}

/// Error for a conditional write that matched no row: the instance is gone
/// or its status changed under the caller.
async fn stale_write(pool: &Pool<Sqlite>, instance_id: i64, to: WorkbookStatus) -> AppError {
    match get_instance(pool, instance_id).await {
        Ok(current) => {
            warn!(from = %current.status, to = %to, "Workbook status changed concurrently");
            AppError::InvalidTransition {
                from: current.status,
                to,
            }
        }
        Err(err) => err,
    }
}

async fn set_status(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    from: WorkbookStatus,
    to: WorkbookStatus,
) -> Result<Instance, AppError> {
    let result = sqlx::query(
        "UPDATE workbooks SET status = ?, updated_at = ?
         WHERE id = ? AND status = ? AND COALESCE(is_template, 0) = 0",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(instance_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(stale_write(pool, instance_id, to).await);
    }

    get_instance(pool, instance_id).await
}

#[instrument(skip(pool, instance), fields(instance_id = instance.id))]
pub async fn submit_instance(pool: &Pool<Sqlite>, instance: &Instance) -> Result<Instance, AppError> {
    info!("Submitting workbook");
    let next = instance.status.submit()?;
    set_status(pool, instance.id, instance.status, next).await
}

#[instrument(skip(pool))]
pub async fn review_instance(pool: &Pool<Sqlite>, instance_id: i64) -> Result<Instance, AppError> {
    info!("Reviewing workbook");
    let instance = get_instance(pool, instance_id).await?;
    let next = instance.status.review()?;
    set_status(pool, instance.id, instance.status, next).await
}

#[instrument(skip(pool, feedback))]
pub async fn set_admin_feedback(
    pool: &Pool<Sqlite>,
    instance_id: i64,
    feedback: &str,
) -> Result<Instance, AppError> {
    info!("Setting admin feedback");
    let instance = get_instance(pool, instance_id).await?;

    sqlx::query("UPDATE workbooks SET admin_feedback = ?, updated_at = ? WHERE id = ?")
        .bind(feedback)
        .bind(Utc::now())
        .bind(instance.id)
        .execute(pool)
        .await?;

    get_instance(pool, instance.id).await
}
