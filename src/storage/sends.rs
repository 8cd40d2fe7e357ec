use sqlx::PgPool;
use uuid::Uuid;

use crate::email_client::DeliveryReport;

/// Audit trail of per-recipient delivery outcomes. A dispatch that reaches
/// the provider records one row per recipient, successful or not.
#[derive(Clone)]
pub struct SendRepository {
    pool: PgPool,
}

impl SendRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records delivery outcomes for one dispatch in a single transaction.
    /// `recipients` pairs each subscriber id with its report, in order.
    #[tracing::instrument(name = "Record send outcomes", skip(self, recipients))]
    pub async fn record_batch(
        &self,
        issue_id: Uuid,
        recipients: &[(Uuid, &DeliveryReport)],
    ) -> Result<(), sqlx::Error> {
        let mut transaction = self.pool.begin().await?;
        for (subscriber_id, report) in recipients {
            let status = if report.success { "sent" } else { "failed" };
            sqlx::query(
                "INSERT INTO sends (id, issue_id, subscriber_id, status, provider_message_id) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(issue_id)
            .bind(subscriber_id)
            .bind(status)
            .bind(report.message_id.as_deref())
            .execute(&mut *transaction)
            .await?;
        }
        transaction.commit().await?;
        Ok(())
    }
}
