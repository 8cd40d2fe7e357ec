use actix_web::http::StatusCode;
use actix_web::web::{Data, Json};
use actix_web::HttpResponse;
use sqlx::PgPool;

use crate::storage::SubscriberRepository;
use crate::utils::{e500, error_json};

/// Delivery event as posted by the legacy transactional provider. Events
/// arrive as a JSON array, one element per recipient event.
#[derive(serde::Deserialize)]
pub struct DeliveryEvent {
    email: String,
    event: String,
    #[serde(default)]
    reason: Option<String>,
}

const DEACTIVATING_EVENTS: [&str; 4] = ["bounce", "dropped", "spamreport", "unsubscribe"];

/// Ingests bounce/complaint events and deactivates the affected
/// subscribers. Unknown emails and event types are skipped, not errors.
#[tracing::instrument(name = "Ingest delivery events", skip(events, pool), fields(events = events.len()))]
pub async fn sendgrid_webhook(
    events: Json<Vec<DeliveryEvent>>,
    pool: Data<PgPool>,
) -> Result<HttpResponse, actix_web::Error> {
    if events.is_empty() {
        return Ok(error_json(StatusCode::BAD_REQUEST, "Empty event batch"));
    }

    let repository = SubscriberRepository::new(pool.get_ref().clone());
    let mut deactivated = 0usize;
    for event in events.into_inner() {
        if !DEACTIVATING_EVENTS.contains(&event.event.as_str()) {
            continue;
        }
        let reason = event.reason.unwrap_or_else(|| event.event.clone());
        let updated = repository
            .mark_unsubscribed_by_email(&event.email.to_lowercase(), &reason)
            .await
            .map_err(e500)?;
        if updated {
            tracing::info!(email = %event.email, event = %event.event, "Subscriber deactivated by delivery event");
            deactivated += 1;
        }
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "deactivated": deactivated })))
}
