use serde_json::json;
use sqlx::Row;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::spawn_app;

#[tokio::test]
async fn sending_an_issue_delivers_to_active_subscribers_only() {
    let app = spawn_app().await;
    app.mock_provider_success().await;
    app.login().await;
    app.seed_active_subscriber("active@example.com").await;
    sqlx::query(
        "INSERT INTO subscribers (id, email, status, subscribed_at, unsubscribe_token) \
         VALUES ($1, 'pending@example.com', 'pending', now(), $2)",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(uuid::Uuid::new_v4().simple().to_string())
    .execute(&app.pg_pool)
    .await
    .unwrap();
    let id = app.create_issue("Weekly Update", "<p>Markets were up.</p>").await;

    let response = app.post_admin(&format!("/issues/{}/send", id), json!({})).await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(1, body["total_recipients"]);
    assert_eq!(1, body["delivered"]);

    let row = sqlx::query("SELECT status, sent_at, html FROM issues WHERE id = $1")
        .bind(id)
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("sent", row.get::<String, _>("status"));
    assert!(row
        .get::<Option<chrono::DateTime<chrono::Utc>>, _>("sent_at")
        .is_some());
    assert!(row.get::<String, _>("html").contains("Markets were up."));

    // one audit row per recipient and a stamped last_sent_at
    let sends = sqlx::query("SELECT status FROM sends WHERE issue_id = $1")
        .bind(id)
        .fetch_all(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!(1, sends.len());
    assert_eq!("sent", sends[0].get::<String, _>("status"));
    let subscriber = sqlx::query("SELECT last_sent_at FROM subscribers WHERE email = $1")
        .bind("active@example.com")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert!(subscriber
        .get::<Option<chrono::DateTime<chrono::Utc>>, _>("last_sent_at")
        .is_some());
}

#[tokio::test]
async fn an_issue_is_sent_at_most_once() {
    let app = spawn_app().await;
    app.mock_provider_success().await;
    app.login().await;
    app.seed_active_subscriber("active@example.com").await;
    let id = app.create_issue("Weekly Update", "a").await;

    let first = app.post_admin(&format!("/issues/{}/send", id), json!({})).await;
    assert_eq!(200, first.status().as_u16());

    let second = app.post_admin(&format!("/issues/{}/send", id), json!({})).await;
    assert_eq!(400, second.status().as_u16());
}

#[tokio::test]
async fn a_dispatch_in_progress_blocks_a_second_one() {
    let app = spawn_app().await;
    app.login().await;
    app.seed_active_subscriber("active@example.com").await;
    let id = app.create_issue("Weekly Update", "a").await;
    sqlx::query("UPDATE issues SET status = 'sending' WHERE id = $1")
        .bind(id)
        .execute(&app.pg_pool)
        .await
        .unwrap();

    let response = app.post_admin(&format!("/issues/{}/send", id), json!({})).await;

    assert_eq!(409, response.status().as_u16());
}

#[tokio::test]
async fn sending_an_unknown_issue_is_a_404() {
    let app = spawn_app().await;
    app.login().await;

    let response = app
        .post_admin(&format!("/issues/{}/send", uuid::Uuid::new_v4()), json!({}))
        .await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn sending_without_active_subscribers_keeps_the_draft() {
    let app = spawn_app().await;
    app.login().await;
    let id = app.create_issue("Weekly Update", "a").await;

    let response = app.post_admin(&format!("/issues/{}/send", id), json!({})).await;

    assert_eq!(400, response.status().as_u16());
    let row = sqlx::query("SELECT status FROM issues WHERE id = $1")
        .bind(id)
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("draft", row.get::<String, _>("status"));
}

#[tokio::test]
async fn total_delivery_failure_restores_the_prior_status() {
    let app = spawn_app().await;
    app.login().await;
    app.seed_active_subscriber("active@example.com").await;
    let id = app.create_issue("Weekly Update", "a").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.provider_server)
        .await;

    let response = app.post_admin(&format!("/issues/{}/send", id), json!({})).await;

    assert_eq!(500, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["details"].as_array().is_some());

    let row = sqlx::query("SELECT status FROM issues WHERE id = $1")
        .bind(id)
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("draft", row.get::<String, _>("status"));
}

#[tokio::test]
async fn an_ad_hoc_newsletter_is_stored_and_sent_in_one_request() {
    let app = spawn_app().await;
    app.mock_provider_success().await;
    app.login().await;
    app.seed_active_subscriber("active@example.com").await;

    let response = app
        .post_admin(
            "/newsletter/send",
            json!({ "title": "Flash update", "content": "<p>Breaking.</p>" }),
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let row = sqlx::query("SELECT status FROM issues WHERE slug = $1")
        .bind("flash-update")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("sent", row.get::<String, _>("status"));
}

#[tokio::test]
async fn a_wholly_failed_ad_hoc_newsletter_leaves_no_issue_behind() {
    let app = spawn_app().await;
    app.login().await;
    app.seed_active_subscriber("active@example.com").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.provider_server)
        .await;

    let response = app
        .post_admin(
            "/newsletter/send",
            json!({ "title": "Flash update", "content": "<p>Breaking.</p>" }),
        )
        .await;

    assert_eq!(500, response.status().as_u16());
    let row = sqlx::query("SELECT COUNT(*) AS count FROM issues")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!(0, row.get::<i64, _>("count"));
}

#[tokio::test]
async fn a_test_send_reaches_the_given_address_and_touches_no_tables() {
    let app = spawn_app().await;
    app.mock_provider_success().await;
    app.login().await;

    let response = app
        .post_admin(
            "/newsletter/test",
            json!({ "title": "Preview", "content": "<p>Draft.</p>", "email": "me@example.com" }),
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!("me@example.com", body["recipient"]);

    for table in ["issues", "sends", "subscribers"] {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {}", table))
            .fetch_one(&app.pg_pool)
            .await
            .unwrap();
        assert_eq!(0, row.get::<i64, _>("count"), "{} is not empty", table);
    }

    // test sends go through a throwaway group, not the configured one
    let requests = app.provider_server.received_requests().await.unwrap();
    assert!(requests.iter().any(|r| r.url.path() == "/api/groups"));
}

#[tokio::test]
async fn the_cron_endpoint_requires_the_bearer_secret() {
    let app = spawn_app().await;

    let response = app
        .api_client
        .get(format!("{}/api/cron/send-scheduled", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(401, response.status().as_u16());

    let response = app
        .api_client
        .get(format!("{}/api/cron/send-scheduled", app.address))
        .bearer_auth("wrong-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn cron_dispatches_due_issues_and_skips_future_ones() {
    let app = spawn_app().await;
    app.mock_provider_success().await;
    app.login().await;
    app.seed_active_subscriber("active@example.com").await;
    let due = app.create_issue("Due issue", "a").await;
    let future = app.create_issue("Future issue", "b").await;
    sqlx::query("UPDATE issues SET status = 'scheduled', scheduled_at = now() - interval '1 hour' WHERE id = $1")
        .bind(due)
        .execute(&app.pg_pool)
        .await
        .unwrap();
    sqlx::query("UPDATE issues SET status = 'scheduled', scheduled_at = now() + interval '1 hour' WHERE id = $1")
        .bind(future)
        .execute(&app.pg_pool)
        .await
        .unwrap();

    let response = app
        .api_client
        .get(format!("{}/api/cron/send-scheduled", app.address))
        .bearer_auth(&app.cron_secret)
        .send()
        .await
        .unwrap();

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(1, results.len());
    assert_eq!("sent", results[0]["result"]);

    let row = sqlx::query("SELECT status FROM issues WHERE id = $1")
        .bind(due)
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("sent", row.get::<String, _>("status"));
    let row = sqlx::query("SELECT status FROM issues WHERE id = $1")
        .bind(future)
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("scheduled", row.get::<String, _>("status"));
}

#[tokio::test]
async fn cron_continues_past_a_failing_issue() {
    let app = spawn_app().await;
    app.login().await;
    let broken = app.create_issue("Broken issue", "a").await;
    sqlx::query("UPDATE issues SET status = 'scheduled', scheduled_at = now() - interval '1 hour' WHERE id = $1")
        .bind(broken)
        .execute(&app.pg_pool)
        .await
        .unwrap();
    // no subscribers and no provider mocks: the issue is skipped, not fatal

    let response = app
        .api_client
        .get(format!("{}/api/cron/send-scheduled", app.address))
        .bearer_auth(&app.cron_secret)
        .send()
        .await
        .unwrap();

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!("skipped", body["results"][0]["result"]);
}
