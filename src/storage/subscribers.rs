use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Subscriber, SubscriberStatus};

/// Queries against the `subscribers` table. All lookups go through the
/// case-folded email or one of the two tokens; callers never filter by raw
/// user input.
#[derive(Clone)]
pub struct SubscriberRepository {
    pool: PgPool,
}

impl SubscriberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(name = "Look up subscriber by email", skip(self))]
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>("SELECT * FROM subscribers WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    #[tracing::instrument(name = "Insert pending subscriber", skip(self, confirmation_token_hash, unsubscribe_token))]
    pub async fn insert_pending(
        &self,
        email: &str,
        confirmation_token_hash: &str,
        unsubscribe_token: &str,
    ) -> Result<Subscriber, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>(
            "INSERT INTO subscribers \
             (id, email, status, subscribed_at, confirmation_token_hash, unsubscribe_token) \
             VALUES ($1, $2, 'pending', now(), $3, $4) \
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(confirmation_token_hash)
        .bind(unsubscribe_token)
        .fetch_one(&self.pool)
        .await
    }

    /// Moves an unsubscribed subscriber straight back to `active` with a
    /// fresh unsubscribe token, so a stale link from a previous campaign
    /// cannot remove them again. The address already went through the
    /// opt-in once, no new confirmation round trip is required.
    #[tracing::instrument(name = "Reactivate subscriber", skip(self, unsubscribe_token))]
    pub async fn reactivate(&self, id: Uuid, unsubscribe_token: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE subscribers \
             SET status = 'active', subscribed_at = now(), confirmed_at = now(), \
                 unsubscribed_at = NULL, bounce_reason = NULL, \
                 confirmation_token_hash = NULL, unsubscribe_token = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(unsubscribe_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replaces the confirmation token for a subscriber who signed up again
    /// while still pending. The old confirmation link stops working.
    #[tracing::instrument(name = "Refresh confirmation token", skip(self, confirmation_token_hash))]
    pub async fn refresh_confirmation_token(
        &self,
        id: Uuid,
        confirmation_token_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE subscribers SET confirmation_token_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(confirmation_token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Single-use confirmation: the token hash is cleared in the same
    /// statement that flips the status, so a second click finds no row.
    #[tracing::instrument(name = "Confirm subscriber by token", skip(self, token_hash))]
    pub async fn confirm_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Subscriber>, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>(
            "UPDATE subscribers \
             SET status = 'active', confirmed_at = now(), confirmation_token_hash = NULL \
             WHERE confirmation_token_hash = $1 AND status = 'pending' \
             RETURNING *",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
    }

    /// Unsubscribes by token and rotates the token in the same statement.
    #[tracing::instrument(name = "Unsubscribe by token", skip(self, token, new_token))]
    pub async fn unsubscribe_by_token(
        &self,
        token: &str,
        new_token: &str,
    ) -> Result<Option<Subscriber>, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>(
            "UPDATE subscribers \
             SET status = 'unsubscribed', unsubscribed_at = now(), unsubscribe_token = $2 \
             WHERE unsubscribe_token = $1 \
             RETURNING *",
        )
        .bind(token)
        .bind(new_token)
        .fetch_optional(&self.pool)
        .await
    }

    /// Provider-webhook path: unsubscribes by email and records why.
    #[tracing::instrument(name = "Mark subscriber unsubscribed", skip(self))]
    pub async fn mark_unsubscribed_by_email(
        &self,
        email: &str,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscribers \
             SET status = 'unsubscribed', unsubscribed_at = now(), bounce_reason = $2 \
             WHERE email = $1 AND status <> 'unsubscribed'",
        )
        .bind(email)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "List all subscribers", skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Subscriber>, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>("SELECT * FROM subscribers ORDER BY subscribed_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    #[tracing::instrument(name = "List active subscribers", skip(self))]
    pub async fn list_active(&self) -> Result<Vec<Subscriber>, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>(
            "SELECT * FROM subscribers WHERE status = 'active' ORDER BY subscribed_at",
        )
        .fetch_all(&self.pool)
        .await
    }

    #[tracing::instrument(name = "Delete subscriber", skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscribers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Admin status override. Stamps `confirmed_at` or `unsubscribed_at` to
    /// match the new status so the audit columns stay coherent.
    #[tracing::instrument(name = "Set subscriber status", skip(self))]
    pub async fn set_status(
        &self,
        id: Uuid,
        status: SubscriberStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscribers SET status = $2, \
             confirmed_at = CASE WHEN $2 = 'active' THEN now() ELSE confirmed_at END, \
             unsubscribed_at = CASE WHEN $2 = 'unsubscribed' THEN now() ELSE NULL END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Stamp last_sent_at", skip(self, ids))]
    pub async fn stamp_last_sent(&self, ids: &[Uuid]) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE subscribers SET last_sent_at = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "Count subscribers by status", skip(self))]
    pub async fn counts_by_status(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM subscribers GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
    }
}
