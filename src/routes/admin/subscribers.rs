use std::str::FromStr;

use actix_web::http::StatusCode;
use actix_web::web::{Data, Json, Path};
use actix_web::HttpResponse;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::SubscriberStatus;
use crate::storage::SubscriberRepository;
use crate::utils::{e500, error_json};

#[tracing::instrument(name = "List subscribers", skip_all)]
pub async fn list_subscribers(pool: Data<PgPool>) -> Result<HttpResponse, actix_web::Error> {
    let subscribers = SubscriberRepository::new(pool.get_ref().clone())
        .list_all()
        .await
        .map_err(e500)?;
    Ok(HttpResponse::Ok().json(subscribers))
}

#[tracing::instrument(name = "Delete subscriber", skip(pool))]
pub async fn delete_subscriber(
    id: Path<Uuid>,
    pool: Data<PgPool>,
) -> Result<HttpResponse, actix_web::Error> {
    let deleted = SubscriberRepository::new(pool.get_ref().clone())
        .delete(*id)
        .await
        .map_err(e500)?;
    if deleted {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(error_json(StatusCode::NOT_FOUND, "Subscriber not found"))
    }
}

#[derive(serde::Deserialize)]
pub struct StatusBody {
    status: String,
}

#[tracing::instrument(name = "Set subscriber status", skip(pool, body), fields(status = %body.status))]
pub async fn set_subscriber_status(
    id: Path<Uuid>,
    body: Json<StatusBody>,
    pool: Data<PgPool>,
) -> Result<HttpResponse, actix_web::Error> {
    let status = match SubscriberStatus::from_str(&body.status) {
        Ok(status) => status,
        Err(_) => {
            return Ok(error_json(
                StatusCode::BAD_REQUEST,
                "Status must be one of: pending, active, unsubscribed",
            ))
        }
    };

    let updated = SubscriberRepository::new(pool.get_ref().clone())
        .set_status(*id, status)
        .await
        .map_err(e500)?;
    if updated {
        Ok(HttpResponse::Ok().json(serde_json::json!({ "status": status.as_ref() })))
    } else {
        Ok(error_json(StatusCode::NOT_FOUND, "Subscriber not found"))
    }
}
