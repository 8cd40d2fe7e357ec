use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Issue, IssueStatus};

#[derive(Clone)]
pub struct IssueRepository {
    pool: PgPool,
}

impl IssueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(name = "Insert draft issue", skip(self, content_md, html))]
    pub async fn insert_draft(
        &self,
        slug: &str,
        title: &str,
        preheader: &str,
        content_md: &str,
        html: &str,
    ) -> Result<Issue, sqlx::Error> {
        sqlx::query_as::<_, Issue>(
            "INSERT INTO issues (id, slug, title, preheader, content_md, html, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'draft') \
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(slug)
        .bind(title)
        .bind(preheader)
        .bind(content_md)
        .bind(html)
        .fetch_one(&self.pool)
        .await
    }

    #[tracing::instrument(name = "Check slug existence", skip(self))]
    pub async fn slug_exists(&self, slug: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM issues WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    #[tracing::instrument(name = "Look up issue", skip(self))]
    pub async fn find(&self, id: Uuid) -> Result<Option<Issue>, sqlx::Error> {
        sqlx::query_as::<_, Issue>("SELECT * FROM issues WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    #[tracing::instrument(name = "List issues", skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Issue>, sqlx::Error> {
        sqlx::query_as::<_, Issue>("SELECT * FROM issues ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    #[tracing::instrument(name = "Delete issue", skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM issues WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Schedules an issue. Refuses issues that are already sending or sent.
    #[tracing::instrument(name = "Schedule issue", skip(self))]
    pub async fn schedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE issues SET status = 'scheduled', scheduled_at = $2 \
             WHERE id = $1 AND status IN ('draft', 'scheduled')",
        )
        .bind(id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claims an issue for dispatch. The conditional update is the
    /// guard against two concurrent dispatches of the same issue: only one
    /// caller observes `rows_affected == 1`.
    #[tracing::instrument(name = "Claim issue for dispatch", skip(self))]
    pub async fn claim_for_dispatch(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE issues SET status = 'sending' \
             WHERE id = $1 AND status IN ('draft', 'scheduled')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Puts a claimed issue back into its pre-claim status after a failed
    /// dispatch, so it can be retried.
    #[tracing::instrument(name = "Release dispatch claim", skip(self))]
    pub async fn release_claim(
        &self,
        id: Uuid,
        prior_status: IssueStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE issues SET status = $2 WHERE id = $1 AND status = 'sending'")
            .bind(id)
            .bind(prior_status.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Marks a claimed issue sent and persists the compiled HTML that was
    /// actually dispatched.
    #[tracing::instrument(name = "Mark issue sent", skip(self, html))]
    pub async fn mark_sent(&self, id: Uuid, html: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE issues SET status = 'sent', sent_at = now(), html = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(html)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(name = "List due scheduled issues", skip(self))]
    pub async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Issue>, sqlx::Error> {
        sqlx::query_as::<_, Issue>(
            "SELECT * FROM issues \
             WHERE status = 'scheduled' AND scheduled_at <= $1 \
             ORDER BY scheduled_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    #[tracing::instrument(name = "Count issues by status", skip(self))]
    pub async fn counts_by_status(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>("SELECT status, COUNT(*) FROM issues GROUP BY status")
            .fetch_all(&self.pool)
            .await
    }
}
