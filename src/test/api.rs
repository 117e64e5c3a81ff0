#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::{Value, json};

    use crate::api::LoginResponse;
    use crate::db::{get_instance, get_user_instances};
    use crate::models::WorkbookStatus;
    use crate::notify::Notifier;
    use crate::test::test_db::{TestDb, TestDbBuilder};
    use crate::test::test_utils::{
        FailingNotifier, RecordingNotifier, TEST_ADMIN_EMAIL, create_standard_test_db,
        login_admin, login_participant, setup_test_client, setup_test_client_with_notifier,
    };

    async fn json_body(response: LocalResponse<'_>) -> Value {
        let body = response.into_string().await.expect("response body");
        serde_json::from_str(&body).expect("JSON response body")
    }

    async fn recording_client() -> (Client, TestDb, Arc<RecordingNotifier>) {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier: Arc<dyn Notifier> = recorder.clone();
        let (client, test_db) =
            setup_test_client_with_notifier(create_standard_test_db().await, notifier).await;
        (client, test_db, recorder)
    }

    /// A second client on the same database with its own cookie jar.
    async fn second_client(test_db: &TestDb) -> Client {
        let rocket = crate::init_rocket(
            rocket::Config::figment(),
            test_db.pool.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        Client::tracked(rocket).await.expect("valid rocket instance")
    }

    async fn answer_first_question(client: &Client, workbook_id: i64, answer: &str) -> Status {
        client
            .put(format!("/api/workbooks/{}/answers", workbook_id))
            .header(ContentType::JSON)
            .body(json!({ "answers": [{ "index": 0, "answer": answer }] }).to_string())
            .dispatch()
            .await
            .status()
    }

    #[rocket::async_test]
    async fn test_health() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let response = client.get("/api/health").dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), "OK");
    }

    #[rocket::async_test]
    async fn test_endpoints_require_session() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let instance = test_db
            .instance_id("alice@example.com", "Anxiety Basics")
            .unwrap();

        for path in [
            "/api/me".to_string(),
            "/api/me/workbooks".to_string(),
            format!("/api/workbooks/{}", instance),
            "/api/admin/users".to_string(),
            "/api/admin/templates".to_string(),
            "/api/admin/workbooks".to_string(),
        ] {
            let response = client.get(path.as_str()).dispatch().await;
            assert_eq!(response.status(), Status::Unauthorized, "GET {}", path);

            let body = json_body(response).await;
            assert_eq!(body["status"], "error");
            assert!(body["errors"]["authentication"].is_array());
        }

        let response = client
            .post(format!("/api/workbooks/{}/submit", instance))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_admin_login() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "email": "admin@practice.test", "password": "wrong" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let login: LoginResponse = response.into_json().await.unwrap();
        assert!(!login.success);
        assert!(login.error.is_some());

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "email": "not-an-email", "password": "x" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        login_admin(&client, "admin@practice.test").await;

        let me = json_body(client.get("/api/me").dispatch().await).await;
        assert_eq!(me["email"], "admin@practice.test");
        assert_eq!(me["role"], "admin");

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            client.get("/api/me").dispatch().await.status(),
            Status::Unauthorized
        );
    }

    #[rocket::async_test]
    async fn test_participant_cannot_use_password_login() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "email": "alice@example.com", "password": "anything" }).to_string())
            .dispatch()
            .await;

        let login: LoginResponse = response.into_json().await.unwrap();
        assert!(!login.success);
    }

    #[rocket::async_test]
    async fn test_dashboard_login() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        login_participant(&client, &test_db, "alice@example.com").await;

        let workbooks = json_body(client.get("/api/me/workbooks").dispatch().await).await;
        let workbooks = workbooks.as_array().unwrap();
        assert_eq!(workbooks.len(), 1);
        assert_eq!(workbooks[0]["title"], "Anxiety Basics");
        assert_eq!(workbooks[0]["status"], "assigned");
        assert_eq!(workbooks[0]["isTemplate"], false);

        let me = json_body(client.get("/api/me").dispatch().await).await;
        assert_eq!(me["workbooks"].as_array().unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn test_dashboard_login_rejects_bad_links() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let response = client
            .post("/api/dashboard/login")
            .header(ContentType::JSON)
            .body(json!({ "token": "no-such-token" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        let admin_token = test_db.dashboard_token("admin@practice.test").await.unwrap();
        let response = client
            .post("/api/dashboard/login")
            .header(ContentType::JSON)
            .body(json!({ "token": admin_token }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        sqlx::query("UPDATE users SET link_expires_at = ? WHERE email = ?")
            .bind(Utc::now() - Duration::days(1))
            .bind("bob@example.com")
            .execute(&test_db.pool)
            .await
            .unwrap();
        let bob_token = test_db.dashboard_token("bob@example.com").await.unwrap();
        let response = client
            .post("/api/dashboard/login")
            .header(ContentType::JSON)
            .body(json!({ "token": bob_token }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_participant_answers_and_submits() {
        let (client, test_db, recorder) = recording_client().await;
        let instance = test_db
            .instance_id("alice@example.com", "Anxiety Basics")
            .unwrap();
        login_participant(&client, &test_db, "alice@example.com").await;

        // Nothing answered yet.
        let response = client
            .post(format!("/api/workbooks/{}/submit", instance))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .put(format!("/api/workbooks/{}/answers", instance))
            .header(ContentType::JSON)
            .body(
                json!({
                    "answers": [{ "index": 1, "answer": "Before exams" }],
                    "userResponse": "Thanks"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["questions"][1]["answer"], "Before exams");
        assert_eq!(body["userResponse"], "Thanks");

        let response = client
            .post(format!("/api/workbooks/{}/submit", instance))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["status"], "submitted");
        assert!(body.get("notificationWarning").is_none());

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, TEST_ADMIN_EMAIL);
        assert!(sent[0].subject.contains("Anxiety Basics"));

        assert_eq!(
            answer_first_question(&client, instance, "Too late").await,
            Status::Conflict
        );
        let stored = get_instance(&test_db.pool, instance).await.unwrap();
        assert_eq!(stored.status, WorkbookStatus::Submitted);
        assert!(stored.questions[0].answer.is_empty());
    }

    #[rocket::async_test]
    async fn test_answer_validation() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let instance = test_db
            .instance_id("alice@example.com", "Anxiety Basics")
            .unwrap();
        login_participant(&client, &test_db, "alice@example.com").await;

        let response = client
            .put(format!("/api/workbooks/{}/answers", instance))
            .header(ContentType::JSON)
            .body(json!({ "answers": [{ "index": 9, "answer": "x" }] }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body = json_body(response).await;
        assert!(body["errors"]["answers"].is_array());
    }

    #[rocket::async_test]
    async fn test_foreign_and_missing_workbooks_look_the_same() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let alices = test_db
            .instance_id("alice@example.com", "Anxiety Basics")
            .unwrap();
        let template = test_db.template_id("Sleep Diary").unwrap();
        login_participant(&client, &test_db, "bob@example.com").await;

        for id in [alices, template, 9999] {
            let response = client.get(format!("/api/workbooks/{}", id)).dispatch().await;
            assert_eq!(response.status(), Status::Forbidden, "workbook {}", id);
            let body = json_body(response).await;
            assert!(body["errors"]["permission"].is_array());
        }

        assert_eq!(
            answer_first_question(&client, alices, "Not mine").await,
            Status::Forbidden
        );
        let stored = get_instance(&test_db.pool, alices).await.unwrap();
        assert_eq!(stored.status, WorkbookStatus::Assigned);
    }

    #[rocket::async_test]
    async fn test_participant_cannot_reach_admin_endpoints() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let alice = test_db.user_id("alice@example.com").unwrap();
        login_participant(&client, &test_db, "alice@example.com").await;

        let response = client.get("/api/admin/users").dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .delete(format!("/api/admin/users/{}", alice))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .post("/api/admin/maintenance/reconcile?dry_run=true")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_admin_creates_participant() {
        let (client, _test_db, recorder) = recording_client().await;
        login_admin(&client, "admin@practice.test").await;

        let response = client
            .post("/api/admin/users")
            .header(ContentType::JSON)
            .body(json!({ "name": "Dana", "email": "Dana@Example.com" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["email"], "dana@example.com");
        assert_eq!(body["role"], "user");
        assert_eq!(body["workbooks"], json!([]));

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "dana@example.com");
        assert!(sent[0].body.contains("https://workbooks.test/dashboard/"));

        let response = client
            .post("/api/admin/users")
            .header(ContentType::JSON)
            .body(json!({ "name": "Dana again", "email": "dana@example.com" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .post("/api/admin/users")
            .header(ContentType::JSON)
            .body(
                json!({ "name": "Eve", "email": "eve@practice.test", "role": "admin" })
                    .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body = json_body(response).await;
        assert!(body["errors"]["password"].is_array());
    }

    #[rocket::async_test]
    async fn test_list_users_by_role() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;
        login_admin(&client, "admin@practice.test").await;

        let body = json_body(
            client
                .get("/api/admin/users?role=user&sort=email")
                .dispatch()
                .await,
        )
        .await;

        assert_eq!(body["total"], 2);
        assert_eq!(body["items"][0]["email"], "alice@example.com");
        assert_eq!(body["items"][1]["email"], "bob@example.com");

        let response = client.get("/api/admin/users?sort=shoe_size").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_assign_single_and_batch() {
        let (client, test_db, recorder) = recording_client().await;
        let alice = test_db.user_id("alice@example.com").unwrap();
        let anxiety = test_db.template_id("Anxiety Basics").unwrap();
        let sleep = test_db.template_id("Sleep Diary").unwrap();
        login_admin(&client, "admin@practice.test").await;

        let response = client
            .post(format!("/api/admin/users/{}/workbooks", alice))
            .header(ContentType::JSON)
            .body(json!({ "templateIds": [anxiety] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .post(format!("/api/admin/users/{}/workbooks", alice))
            .header(ContentType::JSON)
            .body(json!({ "templateIds": [anxiety, sleep] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["assigned"].as_array().unwrap().len(), 1);
        assert_eq!(body["assigned"][0]["title"], "Sleep Diary");
        assert_eq!(body["assigned"][0]["status"], "assigned");
        assert_eq!(body["skipped"][0]["templateId"], anxiety);

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "alice@example.com");
        assert!(sent[0].body.contains("Sleep Diary"));

        let response = client
            .post(format!("/api/admin/users/{}/workbooks", alice))
            .header(ContentType::JSON)
            .body(json!({ "templateIds": [] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let response = client
            .post("/api/admin/users/9999/workbooks")
            .header(ContentType::JSON)
            .body(json!({ "templateIds": [sleep] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_failed_email_keeps_assignment() {
        let (client, test_db) = setup_test_client_with_notifier(
            create_standard_test_db().await,
            Arc::new(FailingNotifier),
        )
        .await;
        let bob = test_db.user_id("bob@example.com").unwrap();
        let sleep = test_db.template_id("Sleep Diary").unwrap();
        login_admin(&client, "admin@practice.test").await;

        let response = client
            .post(format!("/api/admin/users/{}/workbooks", bob))
            .header(ContentType::JSON)
            .body(json!({ "templateIds": [sleep] }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert!(body["notificationWarning"]
            .as_str()
            .unwrap()
            .contains("bob@example.com"));
        assert_eq!(body["assigned"].as_array().unwrap().len(), 1);

        let instances = get_user_instances(&test_db.pool, bob).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].template_id, sleep);
    }

    #[rocket::async_test]
    async fn test_missing_recipient_keeps_review() {
        let test_db = TestDbBuilder::new()
            .admin("admin@practice.test")
            .participant("alice@example.com")
            .template("Sleep Diary", &["Hours slept?"])
            .assign_with_status("Sleep Diary", "alice@example.com", WorkbookStatus::Submitted)
            .build()
            .await
            .unwrap();
        let instance = test_db.instance_id("alice@example.com", "Sleep Diary").unwrap();
        let recorder = Arc::new(RecordingNotifier::default());
        let (client, test_db) = setup_test_client_with_notifier(test_db, recorder.clone()).await;
        login_admin(&client, "admin@practice.test").await;

        // Leave the instance behind without its owner.
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&test_db.pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM users WHERE email = 'alice@example.com'")
            .execute(&test_db.pool)
            .await
            .unwrap();

        let response = client
            .post(format!("/api/admin/workbooks/{}/review", instance))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["status"], "reviewed");
        assert!(body["notificationWarning"].as_str().is_some());
        assert!(recorder.sent().is_empty());
        assert_eq!(
            get_instance(&test_db.pool, instance).await.unwrap().status,
            WorkbookStatus::Reviewed
        );
    }

    #[rocket::async_test]
    async fn test_missing_recipient_keeps_assignment() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (client, test_db) =
            setup_test_client_with_notifier(create_standard_test_db().await, recorder.clone())
                .await;
        let bob = test_db.user_id("bob@example.com").unwrap();
        let sleep = test_db.template_id("Sleep Diary").unwrap();
        login_admin(&client, "admin@practice.test").await;

        // The recipient vanishes between storing the assignment and notifying.
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&test_db.pool)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER drop_bob AFTER INSERT ON user_workbooks
             BEGIN DELETE FROM users WHERE id = NEW.user_id; END",
        )
        .execute(&test_db.pool)
        .await
        .unwrap();

        let response = client
            .post(format!("/api/admin/users/{}/workbooks", bob))
            .header(ContentType::JSON)
            .body(json!({ "templateIds": [sleep] }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["assigned"].as_array().unwrap().len(), 1);
        assert_eq!(body["assigned"][0]["title"], "Sleep Diary");
        assert!(body["notificationWarning"].as_str().is_some());
        assert!(recorder.sent().is_empty());
    }

    #[rocket::async_test]
    async fn test_preview_and_review() {
        let (client, test_db, recorder) = recording_client().await;
        let instance = test_db
            .instance_id("alice@example.com", "Anxiety Basics")
            .unwrap();
        let participant = second_client(&test_db).await;
        login_participant(&participant, &test_db, "alice@example.com").await;
        login_admin(&client, "admin@practice.test").await;

        let response = client
            .get(format!("/api/admin/workbooks/{}/preview", instance))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        assert_eq!(
            answer_first_question(&participant, instance, "Crowds").await,
            Status::Ok
        );

        let preview = json_body(
            client
                .get(format!("/api/admin/workbooks/{}/preview", instance))
                .dispatch()
                .await,
        )
        .await;
        assert_eq!(preview["questions"][0]["answer"], "Crowds");

        // Only submitted work can be reviewed.
        let response = client
            .post(format!("/api/admin/workbooks/{}/review", instance))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = participant
            .post(format!("/api/workbooks/{}/submit", instance))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let submitted = json_body(
            client
                .get("/api/admin/workbooks?status=submitted")
                .dispatch()
                .await,
        )
        .await;
        assert_eq!(submitted["total"], 1);
        assert_eq!(submitted["items"][0]["_id"], instance);

        let response = client
            .put(format!("/api/admin/workbooks/{}/feedback", instance))
            .header(ContentType::JSON)
            .body(json!({ "feedback": "Well observed" }).to_string())
            .dispatch()
            .await;
        assert_eq!(json_body(response).await["adminFeedback"], "Well observed");

        let response = client
            .post(format!("/api/admin/workbooks/{}/review", instance))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["status"], "reviewed");
        assert_eq!(body["adminFeedback"], "Well observed");

        let sent = recorder.sent();
        assert!(sent
            .iter()
            .any(|n| n.recipient == "alice@example.com" && n.subject.contains("reviewed")));
    }

    #[rocket::async_test]
    async fn test_templates_crud() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let instance = test_db
            .instance_id("alice@example.com", "Anxiety Basics")
            .unwrap();
        let anxiety = test_db.template_id("Anxiety Basics").unwrap();
        login_admin(&client, "admin@practice.test").await;

        let response = client
            .post("/api/admin/templates")
            .header(ContentType::JSON)
            .body(
                json!({
                    "title": "Values",
                    "link": "",
                    "questions": ["What matters to you?", ""]
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let created = json_body(response).await;
        assert_eq!(created["isTemplate"], true);
        assert!(created["link"].is_null());
        assert_eq!(created["questions"].as_array().unwrap().len(), 1);

        let response = client
            .post("/api/admin/templates")
            .header(ContentType::JSON)
            .body(json!({ "title": "" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let response = client
            .put(format!("/api/admin/templates/{}", anxiety))
            .header(ContentType::JSON)
            .body(json!({ "title": "Anxiety Basics", "questions": ["Replaced"] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        // Instances keep their own copy.
        let stored = get_instance(&test_db.pool, instance).await.unwrap();
        assert_eq!(stored.questions.len(), 2);

        let response = client
            .put(format!("/api/admin/templates/{}", instance))
            .header(ContentType::JSON)
            .body(json!({ "title": "Not a template" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let templates = json_body(client.get("/api/admin/templates").dispatch().await).await;
        assert_eq!(templates["total"], 3);
    }

    #[rocket::async_test]
    async fn test_delete_user_cascade() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let alice = test_db.user_id("alice@example.com").unwrap();
        let admin = test_db.user_id("admin@practice.test").unwrap();
        login_admin(&client, "admin@practice.test").await;

        let response = client
            .delete(format!("/api/admin/users/{}", alice))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["userId"], alice);
        assert_eq!(body["workbooksDeleted"], 1);

        assert_eq!(
            client
                .get(format!("/api/admin/users/{}", alice))
                .dispatch()
                .await
                .status(),
            Status::NotFound
        );
        let templates = json_body(client.get("/api/admin/templates").dispatch().await).await;
        assert_eq!(templates["total"], 2);

        let response = client
            .delete(format!("/api/admin/users/{}", admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(test_db.count_rows("users").await.unwrap(), 2);
    }

    #[rocket::async_test]
    async fn test_expiring_dashboard_revokes_sessions() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let alice = test_db.user_id("alice@example.com").unwrap();
        let participant = second_client(&test_db).await;
        login_participant(&participant, &test_db, "alice@example.com").await;
        login_admin(&client, "admin@practice.test").await;

        assert_eq!(participant.get("/api/me").dispatch().await.status(), Status::Ok);

        let response = client
            .put(format!("/api/admin/users/{}", alice))
            .header(ContentType::JSON)
            .body(json!({ "dashboardExpired": true }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(json_body(response).await["dashboardExpired"], true);

        assert_eq!(
            participant.get("/api/me").dispatch().await.status(),
            Status::Unauthorized
        );
    }

    #[rocket::async_test]
    async fn test_complete_and_reactivate_dashboard() {
        let (client, test_db, recorder) = recording_client().await;
        let alice = test_db.user_id("alice@example.com").unwrap();
        let instance = test_db
            .instance_id("alice@example.com", "Anxiety Basics")
            .unwrap();
        login_participant(&client, &test_db, "alice@example.com").await;

        let response = client.post("/api/me/complete").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);

        answer_first_question(&client, instance, "Noise").await;
        client
            .post(format!("/api/workbooks/{}/submit", instance))
            .dispatch()
            .await;

        let response = client.post("/api/me/complete").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["isCompleted"], true);
        assert!(body["completedAt"].is_string());

        // The completed dashboard no longer accepts the session.
        assert_eq!(
            client.get("/api/me/workbooks").dispatch().await.status(),
            Status::Unauthorized
        );

        login_admin(&client, "admin@practice.test").await;
        let response = client
            .post(format!("/api/admin/users/{}/reactivate", alice))
            .header(ContentType::JSON)
            .body(json!({ "days": 7 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["isCompleted"], false);
        assert_eq!(body["dashboardExpired"], false);

        let sent = recorder.sent();
        let last = sent.last().unwrap();
        assert_eq!(last.recipient, "alice@example.com");
        assert!(last.subject.contains("reopened"));

        let stored = get_instance(&test_db.pool, instance).await.unwrap();
        assert_eq!(stored.status, WorkbookStatus::Submitted);

        let response = client
            .post(format!("/api/admin/users/{}/reactivate", alice))
            .header(ContentType::JSON)
            .body(json!({ "days": 0 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn test_reconcile_endpoint() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let orphan = test_db
            .insert_raw_workbook("Lost", Some(false), None, None)
            .await
            .unwrap();
        login_admin(&client, "admin@practice.test").await;

        let response = client
            .post("/api/admin/maintenance/reconcile?dry_run=true")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["dryRun"], true);
        assert_eq!(body["orphanIds"], json!([orphan]));
        assert_eq!(body["deleted"], 0);

        let body = json_body(
            client
                .post("/api/admin/maintenance/reconcile")
                .dispatch()
                .await,
        )
        .await;
        assert_eq!(body["deleted"], 1);
        assert_eq!(body["before"]["templates"], body["after"]["templates"]);
        assert_eq!(body["after"]["total"], 3);
    }
}
