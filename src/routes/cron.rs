use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{HttpRequest, HttpResponse};
use chrono::Utc;
use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::dispatch::{dispatch_issue, DispatchError};
use crate::email_client::EmailClient;
use crate::startup::{ApplicationBaseUrl, CronSecret};
use crate::storage::IssueRepository;
use crate::utils::{e500, error_json};

/// Dispatches every scheduled issue whose time has come. Issues are
/// processed independently; one failure does not block the rest.
#[tracing::instrument(name = "Send scheduled issues", skip_all)]
pub async fn send_scheduled(
    request: HttpRequest,
    pool: Data<PgPool>,
    email_client: Data<EmailClient>,
    base_url: Data<ApplicationBaseUrl>,
    cron_secret: Data<CronSecret>,
) -> Result<HttpResponse, actix_web::Error> {
    if !bearer_token_matches(&request, &cron_secret) {
        return Ok(error_json(StatusCode::UNAUTHORIZED, "Not authorized"));
    }

    let due = IssueRepository::new(pool.get_ref().clone())
        .list_due_scheduled(Utc::now())
        .await
        .map_err(e500)?;

    let mut results = Vec::with_capacity(due.len());
    for issue in due {
        let result = dispatch_issue(&pool, &email_client, &base_url.0, issue.id).await;
        results.push(match result {
            Ok(outcome) => serde_json::json!({
                "issue_id": issue.id,
                "slug": issue.slug,
                "result": "sent",
                "delivered": outcome.delivered,
                "failed": outcome.failed,
            }),
            Err(
                e @ (DispatchError::AlreadySent
                | DispatchError::InFlight
                | DispatchError::NoActiveSubscribers),
            ) => {
                tracing::warn!(issue_id = %issue.id, reason = %e, "Scheduled issue skipped");
                serde_json::json!({
                    "issue_id": issue.id,
                    "slug": issue.slug,
                    "result": "skipped",
                    "reason": e.to_string(),
                })
            }
            Err(e) => {
                tracing::error!(issue_id = %issue.id, error = ?e, "Scheduled dispatch failed");
                serde_json::json!({
                    "issue_id": issue.id,
                    "slug": issue.slug,
                    "result": "error",
                    "reason": e.to_string(),
                })
            }
        });
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "results": results })))
}

fn bearer_token_matches(request: &HttpRequest, cron_secret: &CronSecret) -> bool {
    request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token == cron_secret.0.expose_secret())
        .unwrap_or(false)
}
