use actix_web::http::StatusCode;
use actix_web::web::{Data, Json};
use actix_web::{HttpResponse, ResponseError};
use anyhow::Context;
use sqlx::PgPool;

use crate::domain::{generate_token, token_hash, SubscriberEmail};
use crate::email_client::EmailClient;
use crate::startup::ApplicationBaseUrl;
use crate::storage::SubscriberRepository;
use crate::utils::{error_chain_fmt, error_json};

#[derive(serde::Deserialize)]
pub struct SubscribeBody {
    email: String,
    // hidden form field; humans leave it empty, naive bots fill it in
    #[serde(default)]
    honeypot: String,
}

#[derive(thiserror::Error)]
pub enum SubscribeError {
    #[error("{0}")]
    ValidationError(String),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for SubscribeError {
    fn error_response(&self) -> HttpResponse {
        match self {
            SubscribeError::ValidationError(message) => {
                error_json(StatusCode::BAD_REQUEST, message)
            }
            SubscribeError::UnexpectedError(_) => {
                error_json(StatusCode::INTERNAL_SERVER_ERROR, "Subscription failed")
            }
        }
    }
}

#[tracing::instrument(
    name = "Subscribe a new reader",
    skip(body, pool, email_client, base_url),
    fields(subscriber_email = tracing::field::Empty)
)]
pub async fn subscribe(
    body: Json<SubscribeBody>,
    pool: Data<PgPool>,
    email_client: Data<EmailClient>,
    base_url: Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, SubscribeError> {
    let body = body.into_inner();
    if !body.honeypot.is_empty() {
        return Err(SubscribeError::ValidationError("Invalid request".into()));
    }
    let email = SubscriberEmail::parse(body.email).map_err(SubscribeError::ValidationError)?;
    tracing::Span::current().record("subscriber_email", tracing::field::display(&email));

    let repository = SubscriberRepository::new(pool.get_ref().clone());
    let existing = repository
        .find_by_email(email.as_ref())
        .await
        .context("Failed to look up subscriber")?;

    match existing {
        Some(subscriber) if subscriber.is_active() => {
            Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "already_subscribed" })))
        }
        Some(subscriber) if subscriber.is_pending() => {
            // re-signup while pending invalidates the previous link
            let confirmation_token = generate_token();
            repository
                .refresh_confirmation_token(subscriber.id, &token_hash(&confirmation_token))
                .await
                .context("Failed to refresh confirmation token")?;
            send_confirmation_email(
                &email_client,
                email.as_ref(),
                &base_url.0,
                &confirmation_token,
            )
            .await?;
            Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "pending_confirmation" })))
        }
        Some(subscriber) => {
            // already opted in once, reactivate without a confirmation email
            repository
                .reactivate(subscriber.id, &generate_token())
                .await
                .context("Failed to reactivate subscriber")?;
            Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "reactivated" })))
        }
        None => {
            let confirmation_token = generate_token();
            let subscriber = repository
                .insert_pending(
                    email.as_ref(),
                    &token_hash(&confirmation_token),
                    &generate_token(),
                )
                .await
                .context("Failed to insert new subscriber")?;
            let sent = send_confirmation_email(
                &email_client,
                email.as_ref(),
                &base_url.0,
                &confirmation_token,
            )
            .await;
            if let Err(e) = sent {
                // the row must not outlive a failed confirmation email
                if let Err(delete_error) = repository.delete(subscriber.id).await {
                    tracing::error!(
                        error = %delete_error,
                        subscriber_id = %subscriber.id,
                        "Failed to remove subscriber after undeliverable confirmation email"
                    );
                }
                return Err(e);
            }
            Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "pending_confirmation" })))
        }
    }
}

#[tracing::instrument(name = "Send confirmation email", skip(email_client, token))]
async fn send_confirmation_email(
    email_client: &EmailClient,
    recipient: &str,
    base_url: &str,
    token: &str,
) -> Result<(), SubscribeError> {
    let confirmation_link = format!("{}/api/confirm?token={}", base_url, token);
    let html = format!(
        "<p>Welcome to Markets &amp; Finance!</p>\
         <p>Please <a href=\"{link}\">confirm your subscription</a> to start \
         receiving the newsletter.</p>\
         <p>If you did not sign up, ignore this email.</p>",
        link = confirmation_link
    );
    let plain = format!(
        "Welcome to Markets & Finance!\n\
         Confirm your subscription: {}\n\
         If you did not sign up, ignore this email.\n",
        confirmation_link
    );
    let report = email_client
        .send_single(recipient, "Confirm your subscription", &html, &plain)
        .await;
    if report.success {
        Ok(())
    } else {
        Err(SubscribeError::UnexpectedError(anyhow::anyhow!(
            "Confirmation email was not accepted: {}",
            report.error.unwrap_or_else(|| "unknown error".into())
        )))
    }
}
