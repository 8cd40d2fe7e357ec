use actix_web::web::Data;
use actix_web::HttpResponse;
use sqlx::PgPool;

use crate::storage::{IssueRepository, SubscriberRepository};
use crate::utils::e500;

#[tracing::instrument(name = "Audience stats", skip_all)]
pub async fn stats(pool: Data<PgPool>) -> Result<HttpResponse, actix_web::Error> {
    let subscriber_counts = SubscriberRepository::new(pool.get_ref().clone())
        .counts_by_status()
        .await
        .map_err(e500)?;
    let issue_counts = IssueRepository::new(pool.get_ref().clone())
        .counts_by_status()
        .await
        .map_err(e500)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "subscribers": to_map(subscriber_counts),
        "issues": to_map(issue_counts),
    })))
}

fn to_map(counts: Vec<(String, i64)>) -> serde_json::Map<String, serde_json::Value> {
    counts
        .into_iter()
        .map(|(status, count)| (status, count.into()))
        .collect()
}
