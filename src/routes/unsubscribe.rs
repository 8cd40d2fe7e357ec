use actix_web::http::StatusCode;
use actix_web::web::{Data, Path};
use actix_web::HttpResponse;
use sqlx::PgPool;

use crate::domain::generate_token;
use crate::startup::ApplicationBaseUrl;
use crate::storage::SubscriberRepository;
use crate::utils::{e500, error_json, see_other};

/// Tokenised one-click unsubscribe. The token is rotated in the same update
/// that deactivates the subscriber, so forwarded links cannot be replayed.
#[tracing::instrument(name = "Unsubscribe", skip(token, pool, base_url))]
pub async fn unsubscribe(
    token: Path<String>,
    pool: Data<PgPool>,
    base_url: Data<ApplicationBaseUrl>,
) -> Result<HttpResponse, actix_web::Error> {
    let unsubscribed = SubscriberRepository::new(pool.get_ref().clone())
        .unsubscribe_by_token(&token, &generate_token())
        .await
        .map_err(e500)?;

    match unsubscribed {
        Some(subscriber) => {
            tracing::info!(subscriber_id = %subscriber.id, "Subscriber unsubscribed");
            Ok(see_other(&format!(
                "{}/unsubscribe-success?email={}",
                base_url.0,
                urlencoding::encode(&subscriber.email)
            )))
        }
        None => Ok(error_json(
            StatusCode::NOT_FOUND,
            "Invalid or expired token",
        )),
    }
}
