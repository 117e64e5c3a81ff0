use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Progress of a workbook instance.
///
/// The regular path is `assigned -> in_progress -> submitted -> reviewed`.
/// `draft` and `completed` only come from older records: `draft` sits at the
/// same stage as `assigned`, `completed` at the same stage as `submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkbookStatus {
    Draft,
    Assigned,
    InProgress,
    Submitted,
    Completed,
    Reviewed,
}

impl WorkbookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkbookStatus::Draft => "draft",
            WorkbookStatus::Assigned => "assigned",
            WorkbookStatus::InProgress => "in_progress",
            WorkbookStatus::Submitted => "submitted",
            WorkbookStatus::Completed => "completed",
            WorkbookStatus::Reviewed => "reviewed",
        }
    }

    pub fn stage(&self) -> u8 {
        match self {
            WorkbookStatus::Draft | WorkbookStatus::Assigned => 0,
            WorkbookStatus::InProgress => 1,
            WorkbookStatus::Submitted | WorkbookStatus::Completed => 2,
            WorkbookStatus::Reviewed => 3,
        }
    }

    /// Nothing has been answered yet in `assigned`, so there is nothing to preview.
    pub fn is_previewable(&self) -> bool {
        !matches!(self, WorkbookStatus::Assigned)
    }

    /// The participant may still change answers and their response.
    pub fn is_editable(&self) -> bool {
        self.stage() < 2
    }

    /// Status after the owner edits an answer.
    pub fn after_answer(self) -> Result<WorkbookStatus, AppError> {
        match self {
            WorkbookStatus::Draft | WorkbookStatus::Assigned | WorkbookStatus::InProgress => {
                Ok(WorkbookStatus::InProgress)
            }
            _ => Err(AppError::InvalidTransition {
                from: self,
                to: WorkbookStatus::InProgress,
            }),
        }
    }

    pub fn submit(self) -> Result<WorkbookStatus, AppError> {
        match self {
            WorkbookStatus::InProgress => Ok(WorkbookStatus::Submitted),
            _ => Err(AppError::InvalidTransition {
                from: self,
                to: WorkbookStatus::Submitted,
            }),
        }
    }

    pub fn review(self) -> Result<WorkbookStatus, AppError> {
        match self {
            WorkbookStatus::Submitted | WorkbookStatus::Completed => Ok(WorkbookStatus::Reviewed),
            _ => Err(AppError::InvalidTransition {
                from: self,
                to: WorkbookStatus::Reviewed,
            }),
        }
    }
}

impl FromStr for WorkbookStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkbookStatus::Draft),
            "assigned" => Ok(WorkbookStatus::Assigned),
            "in_progress" => Ok(WorkbookStatus::InProgress),
            "submitted" => Ok(WorkbookStatus::Submitted),
            "completed" => Ok(WorkbookStatus::Completed),
            "reviewed" => Ok(WorkbookStatus::Reviewed),
            _ => Err(AppError::validation(
                "status",
                format!("Unknown workbook status: {}", s),
            )),
        }
    }
}

impl fmt::Display for WorkbookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
