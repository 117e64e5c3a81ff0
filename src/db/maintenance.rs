//! Detection and removal of orphaned workbook instances, plus bulk template
//! import. Both run from the admin API and the `workbook-maintenance` binary.

use serde::{Deserialize, Serialize};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument, warn};

use super::{NewTemplate, create_template, find_template_by_title};
use crate::error::AppError;
use crate::models::Question;

/// Non-template rows lacking an owner or a template reference.
///
/// `COALESCE(is_template, 0) = 0` is false for every row with
/// `is_template = 1`, so templates can never be selected. Must stay in step
/// with `DbWorkbook::is_orphan`.
pub const ORPHAN_PREDICATE: &str =
    "COALESCE(is_template, 0) = 0 AND (assigned_to IS NULL OR template_id IS NULL)";

const DELETE_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookCounts {
    pub total: i64,
    pub templates: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub dry_run: bool,
    pub before: WorkbookCounts,
    pub after: WorkbookCounts,
    pub orphan_ids: Vec<i64>,
    pub deleted: u64,
}

#[instrument(skip(pool))]
pub async fn count_workbooks(pool: &Pool<Sqlite>) -> Result<WorkbookCounts, AppError> {
    let (total, templates): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_template = 1 THEN 1 ELSE 0 END), 0)
         FROM workbooks",
    )
    .fetch_one(pool)
    .await?;

    Ok(WorkbookCounts { total, templates })
}

#[instrument(skip(pool))]
pub async fn find_orphan_ids(pool: &Pool<Sqlite>) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT id FROM workbooks WHERE {} ORDER BY id",
        ORPHAN_PREDICATE
    ))
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Deletes every orphan found at selection time.
///
/// The delete repeats the predicate, so a row repaired between selection and
/// deletion is kept. Running it again without intervening writes deletes
/// nothing.
#[instrument(skip(pool))]
pub async fn reconcile_orphans(
    pool: &Pool<Sqlite>,
    dry_run: bool,
) -> Result<ReconciliationReport, AppError> {
    let before = count_workbooks(pool).await?;
    let orphan_ids = find_orphan_ids(pool).await?;

    info!(
        total = before.total,
        templates = before.templates,
        orphans = orphan_ids.len(),
        dry_run,
        "Starting orphan reconciliation"
    );

    let mut deleted = 0;
    if !dry_run {
        for chunk in orphan_ids.chunks(DELETE_CHUNK) {
            let mut delete = QueryBuilder::<Sqlite>::new("DELETE FROM workbooks WHERE ");
            delete.push(ORPHAN_PREDICATE).push(" AND id IN (");
            let mut ids = delete.separated(", ");
            for id in chunk {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");

            deleted += delete.build().execute(pool).await?.rows_affected();
        }
    }

    let after = count_workbooks(pool).await?;

    if after.templates != before.templates {
        // Templates are written concurrently by admins; only worth a warning.
        warn!(
            before = before.templates,
            after = after.templates,
            "Template count changed during reconciliation"
        );
    }

    info!(
        deleted,
        total = after.total,
        templates = after.templates,
        "Orphan reconciliation finished"
    );

    Ok(ReconciliationReport {
        dry_run,
        before,
        after,
        orphan_ids,
        deleted,
    })
}

/// One template in an import file. Questions may be given as plain strings or
/// as `{question, answer}` objects; answers are dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateImport {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub questions: Vec<ImportedQuestion>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImportedQuestion {
    Text(String),
    Full(Question),
}

impl ImportedQuestion {
    fn text(&self) -> &str {
        match self {
            ImportedQuestion::Text(text) => text,
            ImportedQuestion::Full(question) => &question.question,
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: Vec<i64>,
    pub skipped: Vec<String>,
}

/// Creates templates whose title is not taken yet; existing titles are skipped.
#[instrument(skip_all, fields(count = imports.len()))]
pub async fn import_templates(
    pool: &Pool<Sqlite>,
    imports: &[TemplateImport],
) -> Result<ImportReport, AppError> {
    let mut report = ImportReport::default();

    for import in imports {
        if import.title.trim().is_empty() {
            return Err(AppError::validation("title", "Imported template has no title"));
        }

        if find_template_by_title(pool, &import.title).await?.is_some() {
            info!(title = %import.title, "Template already exists, skipping");
            report.skipped.push(import.title.clone());
            continue;
        }

        let template = create_template(
            pool,
            &NewTemplate {
                title: import.title.clone(),
                description: import.description.clone(),
                content: import.content.clone(),
                link: import.link.clone(),
                questions: import.questions.iter().map(|q| q.text().to_string()).collect(),
            },
        )
        .await?;
        report.created.push(template.id);
    }

    Ok(report)
}
