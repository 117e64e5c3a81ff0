pub mod admin_users;
pub mod admin_workbooks;
pub mod participant;
pub mod session;

pub use admin_users::*;
pub use admin_workbooks::*;
pub use participant::*;
pub use session::*;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::auth::{User, UserDocument};
use crate::db::{get_user, get_user_workbook_ids};
use crate::error::AppError;
use crate::notify::{Notification, Notifier, deliver};

pub type SharedNotifier = Arc<dyn Notifier>;

/// Body of a mutation that may have sent an email. The mutation is stored
/// whether or not delivery worked.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notified<T> {
    #[serde(flatten)]
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_warning: Option<String>,
}

impl<T> Notified<T> {
    pub fn new(data: T, notification_warning: Option<String>) -> Self {
        Self {
            data,
            notification_warning,
        }
    }
}

pub(crate) async fn user_document(pool: &Pool<Sqlite>, user: User) -> Result<UserDocument, AppError> {
    let workbooks = get_user_workbook_ids(pool, user.id).await?;
    Ok(UserDocument::new(user, workbooks))
}

/// Looks up the recipient after a mutation has been stored. A failed lookup
/// becomes a warning like a failed send.
pub(crate) async fn notify_user<F>(
    pool: &Pool<Sqlite>,
    notifier: &dyn Notifier,
    user_id: i64,
    build: F,
) -> Option<String>
where
    F: FnOnce(&User) -> Notification,
{
    match get_user(pool, user_id).await {
        Ok(user) => deliver(notifier, build(&user)).await,
        Err(err) => {
            err.log_and_record("Notification recipient lookup");
            Some(format!(
                "Notification for user {} was not sent: {}",
                user_id, err
            ))
        }
    }
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
