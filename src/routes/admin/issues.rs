use actix_web::http::StatusCode;
use actix_web::web::{Data, Json, Path};
use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::dispatch::{dispatch_issue, DispatchError};
use crate::domain::slugify;
use crate::email_client::EmailClient;
use crate::startup::ApplicationBaseUrl;
use crate::storage::IssueRepository;
use crate::template::IssueTemplate;
use crate::utils::{e500, error_json};

#[tracing::instrument(name = "List issues", skip_all)]
pub async fn list_issues(pool: Data<PgPool>) -> Result<HttpResponse, actix_web::Error> {
    let issues = IssueRepository::new(pool.get_ref().clone())
        .list_all()
        .await
        .map_err(e500)?;
    Ok(HttpResponse::Ok().json(issues))
}

#[derive(serde::Deserialize)]
pub struct CreateIssueBody {
    title: String,
    #[serde(default)]
    preheader: String,
    #[serde(default)]
    content_md: Option<String>,
    #[serde(default)]
    content_html: Option<String>,
    #[serde(default)]
    slug: Option<String>,
}

#[tracing::instrument(name = "Create issue", skip(body, pool), fields(title = %body.title))]
pub async fn create_issue(
    body: Json<CreateIssueBody>,
    pool: Data<PgPool>,
) -> Result<HttpResponse, actix_web::Error> {
    let body = body.into_inner();
    if body.title.trim().is_empty() {
        return Ok(error_json(StatusCode::BAD_REQUEST, "Title is required"));
    }
    let content_md = body.content_md.unwrap_or_default();
    let content_html = body.content_html.unwrap_or_default();
    if content_md.trim().is_empty() && content_html.trim().is_empty() {
        return Ok(error_json(StatusCode::BAD_REQUEST, "Content is required"));
    }

    let slug = match body.slug {
        Some(slug) => slugify(&slug),
        None => slugify(&body.title),
    };
    if slug.is_empty() {
        return Ok(error_json(
            StatusCode::BAD_REQUEST,
            "Title does not produce a usable slug",
        ));
    }

    let repository = IssueRepository::new(pool.get_ref().clone());
    if repository.slug_exists(&slug).await.map_err(e500)? {
        return Ok(error_json(StatusCode::BAD_REQUEST, "slug already exists"));
    }

    let issue = repository
        .insert_draft(&slug, body.title.trim(), &body.preheader, &content_md, &content_html)
        .await
        .map_err(e500)?;
    Ok(HttpResponse::Created().json(issue))
}

#[derive(serde::Deserialize)]
pub struct PreviewBody {
    title: String,
    #[serde(default)]
    preheader: String,
    content: String,
}

/// Compiles the email HTML for the given draft content without persisting
/// or sending anything.
#[tracing::instrument(name = "Preview issue", skip(body, base_url), fields(title = %body.title))]
pub async fn preview_issue(
    body: Json<PreviewBody>,
    base_url: Data<ApplicationBaseUrl>,
) -> HttpResponse {
    let body = body.into_inner();
    if body.title.trim().is_empty() || body.content.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Title and content are required");
    }

    let view_url = format!("{}/issues/{}", base_url.0, slugify(&body.title));
    let unsubscribe_url = format!("{}/unsubscribe", base_url.0);
    let html = IssueTemplate {
        title: &body.title,
        preheader: &body.preheader,
        content: &body.content,
        view_url: &view_url,
        unsubscribe_url: &unsubscribe_url,
    }
    .render();

    HttpResponse::Ok().json(serde_json::json!({ "html": html }))
}

#[tracing::instrument(name = "Delete issue", skip(pool))]
pub async fn delete_issue(
    id: Path<Uuid>,
    pool: Data<PgPool>,
) -> Result<HttpResponse, actix_web::Error> {
    let deleted = IssueRepository::new(pool.get_ref().clone())
        .delete(*id)
        .await
        .map_err(e500)?;
    if deleted {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(error_json(StatusCode::NOT_FOUND, "Issue not found"))
    }
}

/// Manual dispatch of a stored issue to every active subscriber.
#[tracing::instrument(name = "Send issue", skip(pool, email_client, base_url))]
pub async fn send_issue(
    id: Path<Uuid>,
    pool: Data<PgPool>,
    email_client: Data<EmailClient>,
    base_url: Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, actix_web::Error> {
    match dispatch_issue(&pool, &email_client, &base_url.0, *id).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome)),
        Err(e) => Ok(dispatch_error_response(e)),
    }
}

/// Maps dispatch failures onto the API error taxonomy. Total delivery
/// failure carries the per-recipient reports as a details payload.
pub(super) fn dispatch_error_response(error: DispatchError) -> HttpResponse {
    match error {
        DispatchError::NotFound => error_json(StatusCode::NOT_FOUND, "Issue not found"),
        DispatchError::AlreadySent => {
            error_json(StatusCode::BAD_REQUEST, "Issue has already been sent")
        }
        DispatchError::InFlight => error_json(
            StatusCode::CONFLICT,
            "A dispatch for this issue is already in progress",
        ),
        DispatchError::NoActiveSubscribers => {
            error_json(StatusCode::BAD_REQUEST, "No active subscribers")
        }
        DispatchError::AllSendsFailed(reports) => {
            tracing::error!(recipients = reports.len(), "Delivery failed for every recipient");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Delivery failed for every recipient",
                "details": reports,
            }))
        }
        DispatchError::Unexpected(e) => {
            tracing::error!(error = ?e, "Dispatch failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Dispatch failed")
        }
    }
}

#[derive(serde::Deserialize)]
pub struct ScheduleBody {
    scheduled_at: DateTime<Utc>,
}

#[tracing::instrument(name = "Schedule issue", skip(pool, body), fields(scheduled_at = %body.scheduled_at))]
pub async fn schedule_issue(
    id: Path<Uuid>,
    body: Json<ScheduleBody>,
    pool: Data<PgPool>,
) -> Result<HttpResponse, actix_web::Error> {
    let repository = IssueRepository::new(pool.get_ref().clone());
    let issue = match repository.find(*id).await.map_err(e500)? {
        Some(issue) => issue,
        None => return Ok(error_json(StatusCode::NOT_FOUND, "Issue not found")),
    };
    if issue.is_sent() || issue.is_in_flight() {
        return Ok(error_json(
            StatusCode::BAD_REQUEST,
            "Issue can no longer be scheduled",
        ));
    }

    let scheduled = repository
        .schedule(*id, body.scheduled_at)
        .await
        .map_err(e500)?;
    if !scheduled {
        // status changed between the check and the update
        return Ok(error_json(
            StatusCode::BAD_REQUEST,
            "Issue can no longer be scheduled",
        ));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "scheduled",
        "scheduled_at": body.scheduled_at,
    })))
}
