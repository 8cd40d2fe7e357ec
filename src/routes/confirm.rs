use actix_web::http::StatusCode;
use actix_web::web::{Data, Query};
use actix_web::HttpResponse;
use sqlx::PgPool;

use crate::domain::token_hash;
use crate::startup::ApplicationBaseUrl;
use crate::storage::SubscriberRepository;
use crate::utils::{e500, error_json, see_other};

#[derive(serde::Deserialize)]
pub struct ConfirmQuery {
    token: Option<String>,
}

/// Activates a pending subscription. The token is single-use: the matching
/// update clears the stored hash, so a second visit lands on 404.
#[tracing::instrument(name = "Confirm subscription", skip(query, pool, base_url))]
pub async fn subscribe_confirm(
    query: Query<ConfirmQuery>,
    pool: Data<PgPool>,
    base_url: Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, actix_web::Error> {
    let token = match query.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => return Ok(error_json(StatusCode::BAD_REQUEST, "Missing token")),
    };

    let confirmed = SubscriberRepository::new(pool.get_ref().clone())
        .confirm_by_token_hash(&token_hash(token))
        .await
        .map_err(e500)?;

    match confirmed {
        Some(subscriber) => {
            tracing::info!(subscriber_id = %subscriber.id, "Subscription confirmed");
            Ok(see_other(&format!("{}/?confirmed=true", base_url.0)))
        }
        None => Ok(error_json(
            StatusCode::NOT_FOUND,
            "Invalid or expired token",
        )),
    }
}
