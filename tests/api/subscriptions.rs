use serde_json::json;
use sqlx::Row;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::spawn_app;

#[tokio::test]
async fn a_new_subscriber_lands_as_pending_with_a_confirmation_email() {
    let app = spawn_app().await;
    app.mock_provider_success().await;

    let response = app
        .post_subscribe(json!({ "email": "reader@example.com" }))
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!("pending_confirmation", body["status"]);

    let row = sqlx::query("SELECT status, confirmation_token_hash FROM subscribers WHERE email = $1")
        .bind("reader@example.com")
        .fetch_one(&app.pg_pool)
        .await
        .expect("Subscriber row is missing");
    assert_eq!("pending", row.get::<String, _>("status"));
    assert!(row.get::<Option<String>, _>("confirmation_token_hash").is_some());
}

#[tokio::test]
async fn the_email_address_is_case_folded_before_storage() {
    let app = spawn_app().await;
    app.mock_provider_success().await;

    let response = app
        .post_subscribe(json!({ "email": "Reader@Example.COM" }))
        .await;

    assert_eq!(200, response.status().as_u16());
    let row = sqlx::query("SELECT email FROM subscribers")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("reader@example.com", row.get::<String, _>("email"));
}

#[tokio::test]
async fn invalid_emails_are_rejected() {
    let app = spawn_app().await;

    for email in ["", "not-an-email", "@example.com"] {
        let response = app.post_subscribe(json!({ "email": email })).await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "{:?} was not rejected",
            email
        );
    }
}

#[tokio::test]
async fn a_filled_honeypot_is_rejected_without_a_row() {
    let app = spawn_app().await;

    let response = app
        .post_subscribe(json!({ "email": "bot@example.com", "honeypot": "http://spam" }))
        .await;

    assert_eq!(400, response.status().as_u16());
    let row = sqlx::query("SELECT COUNT(*) AS count FROM subscribers")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!(0, row.get::<i64, _>("count"));
}

#[tokio::test]
async fn the_confirmation_link_activates_the_subscription_once() {
    let app = spawn_app().await;
    app.mock_provider_success().await;

    app.post_subscribe(json!({ "email": "reader@example.com" }))
        .await;
    let link = app.confirmation_link().await;

    let response = app.api_client.get(link.clone()).send().await.unwrap();
    assert_eq!(303, response.status().as_u16());

    let row = sqlx::query("SELECT status, confirmed_at FROM subscribers WHERE email = $1")
        .bind("reader@example.com")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("active", row.get::<String, _>("status"));
    assert!(row
        .get::<Option<chrono::DateTime<chrono::Utc>>, _>("confirmed_at")
        .is_some());

    // single use: the same link no longer resolves
    let response = app.api_client.get(link).send().await.unwrap();
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn confirming_without_a_token_is_a_bad_request() {
    let app = spawn_app().await;

    let response = app
        .api_client
        .get(format!("{}/api/confirm", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn an_active_duplicate_gets_already_subscribed_and_no_extra_row() {
    let app = spawn_app().await;
    app.seed_active_subscriber("reader@example.com").await;

    let response = app
        .post_subscribe(json!({ "email": "reader@example.com" }))
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!("already_subscribed", body["status"]);

    let row = sqlx::query("SELECT COUNT(*) AS count FROM subscribers")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!(1, row.get::<i64, _>("count"));
}

#[tokio::test]
async fn a_used_unsubscribe_token_stops_resolving() {
    let app = spawn_app().await;
    app.seed_active_subscriber("reader@example.com").await;
    let row = sqlx::query("SELECT unsubscribe_token FROM subscribers WHERE email = $1")
        .bind("reader@example.com")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    let token = row.get::<String, _>("unsubscribe_token");

    let response = app
        .api_client
        .get(format!("{}/api/unsubscribe/{}", app.address, token))
        .send()
        .await
        .unwrap();
    assert_eq!(303, response.status().as_u16());
    let location = response.headers()["Location"].to_str().unwrap();
    assert!(location.contains("unsubscribe-success"));
    assert!(location.contains("reader%40example.com"));

    let row = sqlx::query("SELECT status FROM subscribers WHERE email = $1")
        .bind("reader@example.com")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("unsubscribed", row.get::<String, _>("status"));

    // the token was rotated when it was used
    let response = app
        .api_client
        .get(format!("{}/api/unsubscribe/{}", app.address, token))
        .send()
        .await
        .unwrap();
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn resubscribing_after_unsubscribe_reactivates_the_same_row() {
    let app = spawn_app().await;
    let id = app.seed_active_subscriber("reader@example.com").await;
    let old_token: String =
        sqlx::query("SELECT unsubscribe_token FROM subscribers WHERE id = $1")
            .bind(id)
            .fetch_one(&app.pg_pool)
            .await
            .unwrap()
            .get("unsubscribe_token");
    sqlx::query("UPDATE subscribers SET status = 'unsubscribed', unsubscribed_at = now() WHERE id = $1")
        .bind(id)
        .execute(&app.pg_pool)
        .await
        .unwrap();

    let response = app
        .post_subscribe(json!({ "email": "reader@example.com" }))
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!("reactivated", body["status"]);

    let row = sqlx::query("SELECT id, status, unsubscribe_token FROM subscribers WHERE email = $1")
        .bind("reader@example.com")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!(id, row.get::<uuid::Uuid, _>("id"));
    // straight back to active, the address was confirmed before
    assert_eq!("active", row.get::<String, _>("status"));
    assert_ne!(old_token, row.get::<String, _>("unsubscribe_token"));

    // no confirmation email goes out on reactivation
    let requests = app.provider_server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn an_undeliverable_confirmation_email_rolls_the_row_back() {
    let app = spawn_app().await;
    // every provider call fails
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.provider_server)
        .await;

    let response = app
        .post_subscribe(json!({ "email": "reader@example.com" }))
        .await;

    assert_eq!(500, response.status().as_u16());
    let row = sqlx::query("SELECT COUNT(*) AS count FROM subscribers")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!(0, row.get::<i64, _>("count"));
}

#[tokio::test]
async fn bounce_events_deactivate_the_subscriber() {
    let app = spawn_app().await;
    app.seed_active_subscriber("reader@example.com").await;

    let response = app
        .api_client
        .post(format!("{}/api/webhook/sendgrid", app.address))
        .json(&json!([
            { "email": "reader@example.com", "event": "bounce", "reason": "550 mailbox unavailable" },
            { "email": "unknown@example.com", "event": "bounce" },
            { "email": "reader@example.com", "event": "open" }
        ]))
        .send()
        .await
        .unwrap();

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(1, body["deactivated"]);

    let row = sqlx::query("SELECT status, bounce_reason FROM subscribers WHERE email = $1")
        .bind("reader@example.com")
        .fetch_one(&app.pg_pool)
        .await
        .unwrap();
    assert_eq!("unsubscribed", row.get::<String, _>("status"));
    assert_eq!(
        Some("550 mailbox unavailable".to_string()),
        row.get::<Option<String>, _>("bounce_reason")
    );
}

#[tokio::test]
async fn an_empty_event_batch_is_rejected() {
    let app = spawn_app().await;

    let response = app
        .api_client
        .post(format!("{}/api/webhook/sendgrid", app.address))
        .json(&json!([]))
        .send()
        .await
        .unwrap();

    assert_eq!(400, response.status().as_u16());
}
