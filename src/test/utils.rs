#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::{NewTemplate, NewUser, assign_template, create_template, create_user};
    use crate::error::AppError;
    use crate::models::WorkbookStatus;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";
    pub static LINK_EXPIRY_DAYS: i64 = 30;

    pub async fn memory_pool() -> Result<Pool<Sqlite>, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .parse_filters("debug")
                .is_test(true)
                .try_init();
        });

        // Every connection to `sqlite::memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        crate::run_migrations(&pool).await?;
        Ok(pool)
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        templates: Vec<TestTemplate>,
        assignments: Vec<TestAssignment>,
    }

    pub struct TestUser {
        pub name: String,
        pub email: String,
        pub role: Role,
        pub password: Option<String>,
    }

    pub struct TestTemplate {
        pub title: String,
        pub questions: Vec<String>,
    }

    pub struct TestAssignment {
        pub template_title: String,
        pub email: String,
        pub status: WorkbookStatus,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn admin(mut self, email: &str) -> Self {
            self.users.push(TestUser {
                name: format!("Admin {}", email),
                email: email.to_string(),
                role: Role::Admin,
                password: Some(STANDARD_PASSWORD.to_string()),
            });
            self
        }

        pub fn participant(mut self, email: &str) -> Self {
            self.users.push(TestUser {
                name: format!("Participant {}", email),
                email: email.to_string(),
                role: Role::User,
                password: None,
            });
            self
        }

        pub fn template(mut self, title: &str, questions: &[&str]) -> Self {
            self.templates.push(TestTemplate {
                title: title.to_string(),
                questions: questions.iter().map(|q| q.to_string()).collect(),
            });
            self
        }

        pub fn assign(self, template_title: &str, email: &str) -> Self {
            self.assign_with_status(template_title, email, WorkbookStatus::Assigned)
        }

        pub fn assign_with_status(
            mut self,
            template_title: &str,
            email: &str,
            status: WorkbookStatus,
        ) -> Self {
            self.assignments.push(TestAssignment {
                template_title: template_title.to_string(),
                email: email.to_string(),
                status,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            let pool = memory_pool().await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut template_id_map: HashMap<String, i64> = HashMap::new();
            let mut instance_id_map: HashMap<(String, String), i64> = HashMap::new();

            for user in &self.users {
                let created = create_user(
                    &pool,
                    &NewUser {
                        name: user.name.clone(),
                        email: user.email.clone(),
                        role: user.role,
                        password: user.password.clone(),
                    },
                    LINK_EXPIRY_DAYS,
                )
                .await?;
                user_id_map.insert(user.email.clone(), created.id);
            }

            for template in &self.templates {
                let created = create_template(
                    &pool,
                    &NewTemplate {
                        title: template.title.clone(),
                        description: format!("{} description", template.title),
                        content: format!("{} content", template.title),
                        link: None,
                        questions: template.questions.clone(),
                    },
                )
                .await?;
                template_id_map.insert(template.title.clone(), created.id);
            }

            for assignment in &self.assignments {
                let (Some(&template_id), Some(&user_id)) = (
                    template_id_map.get(&assignment.template_title),
                    user_id_map.get(&assignment.email),
                ) else {
                    return Err(AppError::Internal(format!(
                        "Unknown template {} or user {} in test setup",
                        assignment.template_title, assignment.email
                    )));
                };

                let instance = assign_template(&pool, template_id, user_id).await?;
                if assignment.status != WorkbookStatus::Assigned {
                    sqlx::query("UPDATE workbooks SET status = ? WHERE id = ?")
                        .bind(assignment.status.as_str())
                        .bind(instance.id)
                        .execute(&pool)
                        .await?;
                }

                instance_id_map.insert(
                    (assignment.email.clone(), assignment.template_title.clone()),
                    instance.id,
                );
            }

            Ok(TestDb {
                pool,
                user_id_map,
                template_id_map,
                instance_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub template_id_map: HashMap<String, i64>,
        pub instance_id_map: HashMap<(String, String), i64>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> Option<i64> {
            self.user_id_map.get(email).copied()
        }

        pub fn template_id(&self, title: &str) -> Option<i64> {
            self.template_id_map.get(title).copied()
        }

        pub fn instance_id(&self, email: &str, template_title: &str) -> Option<i64> {
            self.instance_id_map
                .get(&(email.to_string(), template_title.to_string()))
                .copied()
        }

        pub async fn dashboard_token(&self, email: &str) -> Result<String, sqlx::Error> {
            sqlx::query_scalar("SELECT dashboard_token FROM users WHERE email = ?")
                .bind(email)
                .fetch_one(&self.pool)
                .await
        }

        /// Writes a workbook row directly, bypassing the typed write path.
        pub async fn insert_raw_workbook(
            &self,
            title: &str,
            is_template: Option<bool>,
            assigned_to: Option<i64>,
            template_id: Option<i64>,
        ) -> Result<i64, sqlx::Error> {
            let now = Utc::now();
            let res = sqlx::query(
                "INSERT INTO workbooks
                 (title, is_template, assigned_to, template_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(title)
            .bind(is_template)
            .bind(assigned_to)
            .bind(template_id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            Ok(res.last_insert_rowid())
        }

        pub async fn count_rows(&self, table: &str) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use std::sync::{Arc, Mutex};

    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::api::LoginResponse;
    use crate::error::AppError;
    use crate::notify::{Notification, Notifier};

    pub const TEST_PUBLIC_URL: &str = "https://workbooks.test";
    pub const TEST_ADMIN_EMAIL: &str = "office@practice.test";

    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
        }
    }

    #[rocket::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), AppError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(notification.clone());
            }
            Ok(())
        }
    }

    pub struct FailingNotifier;

    #[rocket::async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _: &Notification) -> Result<(), AppError> {
            Err(AppError::ExternalService("SMTP relay refused connection".to_string()))
        }
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin@practice.test")
            .participant("alice@example.com")
            .participant("bob@example.com")
            .template("Anxiety Basics", &["What worries you?", "When does it start?"])
            .template("Sleep Diary", &["How many hours did you sleep?"])
            .assign("Anxiety Basics", "alice@example.com")
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client_with_notifier(
        test_db: TestDb,
        notifier: Arc<dyn Notifier>,
    ) -> (Client, TestDb) {
        let figment = rocket::Config::figment()
            .merge(("public_url", TEST_PUBLIC_URL))
            .merge(("admin_email", TEST_ADMIN_EMAIL));

        let rocket = crate::init_rocket(figment, test_db.pool.clone(), notifier);
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, test_db)
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        setup_test_client_with_notifier(test_db, Arc::new(RecordingNotifier::default())).await
    }

    pub async fn login_admin(client: &Client, email: &str) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "email": email, "password": STANDARD_PASSWORD }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let login: LoginResponse = response.into_json().await.expect("login response");
        assert!(login.success, "admin login for {} failed", email);
    }

    pub async fn login_participant(client: &Client, test_db: &TestDb, email: &str) {
        let token = test_db
            .dashboard_token(email)
            .await
            .expect("participant has a dashboard token");

        let response = client
            .post("/api/dashboard/login")
            .header(ContentType::JSON)
            .body(json!({ "token": token }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
    }
}
