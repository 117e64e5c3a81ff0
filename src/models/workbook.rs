use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkbookStatus;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

impl Question {
    pub fn unanswered(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: String::new(),
        }
    }
}

/// Reusable question set. Owned by nobody, never carries answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: Option<String>,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A participant's own copy of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: i64,
    pub owner_id: i64,
    pub template_id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: Option<String>,
    pub questions: Vec<Question>,
    pub status: WorkbookStatus,
    pub shareable_link: String,
    pub user_response: String,
    pub admin_feedback: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An instance that has not been stored yet. Only `Template::instantiate`
/// builds one, so owner and provenance are always present.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInstance {
    pub owner_id: i64,
    pub template_id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: Option<String>,
    pub questions: Vec<Question>,
}

impl Template {
    pub fn instantiate(&self, owner_id: i64) -> NewInstance {
        NewInstance {
            owner_id,
            template_id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            content: self.content.clone(),
            link: self.link.clone(),
            questions: self
                .questions
                .iter()
                .map(|q| Question::unanswered(q.question.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerUpdate {
    pub index: usize,
    pub answer: String,
}

impl Instance {
    /// Applies a participant's edits. Any answer edit moves `assigned` to
    /// `in_progress`; nothing can be edited once the workbook is submitted.
    pub fn apply_answers(
        &mut self,
        updates: &[AnswerUpdate],
        user_response: Option<String>,
    ) -> Result<(), AppError> {
        if !self.status.is_editable() {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to: WorkbookStatus::InProgress,
            });
        }

        if updates.is_empty() && user_response.is_none() {
            return Err(AppError::validation("answers", "Nothing to update"));
        }

        if let Some(bad) = updates.iter().find(|u| u.index >= self.questions.len()) {
            return Err(AppError::validation(
                "answers",
                format!(
                    "Question {} does not exist, workbook has {} questions",
                    bad.index,
                    self.questions.len()
                ),
            ));
        }

        if !updates.is_empty() {
            self.status = self.status.after_answer()?;
            for update in updates {
                self.questions[update.index].answer = update.answer.clone();
            }
        }

        if let Some(response) = user_response {
            self.user_response = response;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Workbook {
    Template(Template),
    Instance(Instance),
}

impl Workbook {
    pub fn id(&self) -> i64 {
        match self {
            Workbook::Template(t) => t.id,
            Workbook::Instance(i) => i.id,
        }
    }

    pub fn into_template(self) -> Result<Template, AppError> {
        match self {
            Workbook::Template(t) => Ok(t),
            Workbook::Instance(i) => Err(AppError::validation(
                "templateId",
                format!("Workbook {} is not a template", i.id),
            )),
        }
    }

    pub fn into_instance(self) -> Result<Instance, AppError> {
        match self {
            Workbook::Instance(i) => Ok(i),
            Workbook::Template(t) => Err(AppError::validation(
                "workbookId",
                format!("Workbook {} is a template", t.id),
            )),
        }
    }
}

#[derive(sqlx::FromRow, Clone, Default, Debug)]
pub struct DbWorkbook {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub questions: Option<String>,
    pub status: Option<String>,
    pub is_template: Option<bool>,
    pub assigned_to: Option<i64>,
    pub template_id: Option<i64>,
    pub shareable_link: Option<String>,
    pub user_response: Option<String>,
    pub admin_feedback: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DbWorkbook {
    /// A row that is not a template but lacks an owner or a template reference.
    /// Must stay in step with `db::maintenance::ORPHAN_PREDICATE`.
    pub fn is_orphan(&self) -> bool {
        !self.is_template.unwrap_or(false)
            && (self.assigned_to.is_none() || self.template_id.is_none())
    }
}

impl TryFrom<DbWorkbook> for Workbook {
    type Error = AppError;

    fn try_from(db: DbWorkbook) -> Result<Self, Self::Error> {
        let id = db.id.unwrap_or_default();
        let questions: Vec<Question> = match db.questions.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|e| {
                AppError::Integrity(format!("Workbook {} has unreadable questions: {}", id, e))
            })?,
            _ => Vec::new(),
        };
        let created_at = db.created_at.unwrap_or_else(Utc::now);
        let updated_at = db.updated_at.unwrap_or(created_at);

        if db.is_template.unwrap_or(false) {
            return Ok(Workbook::Template(Template {
                id,
                title: db.title.unwrap_or_default(),
                description: db.description.unwrap_or_default(),
                content: db.content.unwrap_or_default(),
                link: db.link,
                questions,
                created_at,
                updated_at,
            }));
        }

        let (Some(owner_id), Some(template_id)) = (db.assigned_to, db.template_id) else {
            return Err(AppError::Integrity(format!(
                "Workbook {} is an instance without owner or template",
                id
            )));
        };

        let status = match db.status.as_deref() {
            Some(raw) => raw.parse().map_err(|_| {
                AppError::Integrity(format!("Workbook {} has unknown status {}", id, raw))
            })?,
            None => WorkbookStatus::Assigned,
        };

        Ok(Workbook::Instance(Instance {
            id,
            owner_id,
            template_id,
            title: db.title.unwrap_or_default(),
            description: db.description.unwrap_or_default(),
            content: db.content.unwrap_or_default(),
            link: db.link,
            questions,
            status,
            shareable_link: db.shareable_link.unwrap_or_default(),
            user_response: db.user_response.unwrap_or_default(),
            admin_feedback: db.admin_feedback.unwrap_or_default(),
            created_at,
            updated_at,
        }))
    }
}

/// Wire shape shared by templates and instances.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookDocument {
    #[serde(rename = "_id")]
    pub id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: Option<String>,
    pub questions: Vec<Question>,
    pub assigned_to: Option<i64>,
    pub status: Option<WorkbookStatus>,
    pub is_template: bool,
    pub template_id: Option<i64>,
    pub user_response: String,
    pub admin_feedback: String,
    pub shareable_link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Template> for WorkbookDocument {
    fn from(t: Template) -> Self {
        Self {
            id: t.id,
            title: t.title,
            description: t.description,
            content: t.content,
            link: t.link,
            questions: t.questions,
            assigned_to: None,
            status: None,
            is_template: true,
            template_id: None,
            user_response: String::new(),
            admin_feedback: String::new(),
            shareable_link: String::new(),
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

impl From<Instance> for WorkbookDocument {
    fn from(i: Instance) -> Self {
        Self {
            id: i.id,
            title: i.title,
            description: i.description,
            content: i.content,
            link: i.link,
            questions: i.questions,
            assigned_to: Some(i.owner_id),
            status: Some(i.status),
            is_template: false,
            template_id: Some(i.template_id),
            user_response: i.user_response,
            admin_feedback: i.admin_feedback,
            shareable_link: i.shareable_link,
            created_at: i.created_at,
            updated_at: i.updated_at,
        }
    }
}

impl From<Workbook> for WorkbookDocument {
    fn from(workbook: Workbook) -> Self {
        match workbook {
            Workbook::Template(t) => t.into(),
            Workbook::Instance(i) => i.into(),
        }
    }
}
