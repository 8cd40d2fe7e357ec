use actix_web::http::StatusCode;
use actix_web::web::{Data, Json};
use actix_web::HttpResponse;
use sqlx::PgPool;
use uuid::Uuid;

use super::issues::dispatch_error_response;
use crate::dispatch::dispatch_issue;
use crate::domain::{slugify, SubscriberEmail};
use crate::email_client::EmailClient;
use crate::startup::ApplicationBaseUrl;
use crate::storage::IssueRepository;
use crate::template::IssueTemplate;
use crate::utils::{e500, error_json};

#[derive(serde::Deserialize)]
pub struct NewsletterBody {
    title: String,
    #[serde(default)]
    preheader: String,
    content: String,
}

/// Compose-and-send in one request: persists the issue, then dispatches it.
/// The issue row is removed again when delivery fails outright, so a failed
/// ad hoc send leaves no trace behind.
#[tracing::instrument(name = "Send ad hoc newsletter", skip(body, pool, email_client, base_url), fields(title = %body.title))]
pub async fn send_newsletter(
    body: Json<NewsletterBody>,
    pool: Data<PgPool>,
    email_client: Data<EmailClient>,
    base_url: Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, actix_web::Error> {
    let body = body.into_inner();
    if body.title.trim().is_empty() || body.content.trim().is_empty() {
        return Ok(error_json(
            StatusCode::BAD_REQUEST,
            "Title and content are required",
        ));
    }

    let repository = IssueRepository::new(pool.get_ref().clone());
    let mut slug = slugify(&body.title);
    if slug.is_empty() {
        return Ok(error_json(
            StatusCode::BAD_REQUEST,
            "Title does not produce a usable slug",
        ));
    }
    if repository.slug_exists(&slug).await.map_err(e500)? {
        slug = format!("{}-{}", slug, &Uuid::new_v4().simple().to_string()[..8]);
    }

    let issue = repository
        .insert_draft(&slug, body.title.trim(), &body.preheader, &body.content, "")
        .await
        .map_err(e500)?;

    match dispatch_issue(&pool, &email_client, &base_url.0, issue.id).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome)),
        Err(e) => {
            if let Err(delete_error) = repository.delete(issue.id).await {
                tracing::error!(
                    error = %delete_error,
                    issue_id = %issue.id,
                    "Failed to remove issue after failed ad hoc dispatch"
                );
            }
            Ok(dispatch_error_response(e))
        }
    }
}

#[derive(serde::Deserialize)]
pub struct TestNewsletterBody {
    title: String,
    #[serde(default)]
    preheader: String,
    content: String,
    #[serde(default)]
    email: Option<String>,
}

/// Single test send through a throwaway provider group. Nothing is written
/// to the database; the recipient defaults to the configured sender address.
#[tracing::instrument(name = "Send test newsletter", skip(body, email_client, base_url), fields(title = %body.title))]
pub async fn test_newsletter(
    body: Json<TestNewsletterBody>,
    email_client: Data<EmailClient>,
    base_url: Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, actix_web::Error> {
    let body = body.into_inner();
    if body.title.trim().is_empty() || body.content.trim().is_empty() {
        return Ok(error_json(
            StatusCode::BAD_REQUEST,
            "Title and content are required",
        ));
    }
    let recipient = match body.email {
        Some(email) => match SubscriberEmail::parse(email) {
            Ok(email) => email,
            Err(e) => return Ok(error_json(StatusCode::BAD_REQUEST, &e)),
        },
        None => email_client.sender().clone(),
    };

    let view_url = format!("{}/issues/{}", base_url.0, slugify(&body.title));
    let unsubscribe_url = format!("{}/unsubscribe", base_url.0);
    let template = IssueTemplate {
        title: &body.title,
        preheader: &body.preheader,
        content: &body.content,
        view_url: &view_url,
        unsubscribe_url: &unsubscribe_url,
    };
    let html = template.render();
    let plain = template.render_plain();

    let report = email_client
        .send_single(
            recipient.as_ref(),
            &format!("[TEST] {}", body.title.trim()),
            &html,
            &plain,
        )
        .await;

    if report.success {
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "sent",
            "recipient": recipient.as_ref(),
        })))
    } else {
        Ok(HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Test send failed",
            "details": report,
        })))
    }
}
