//! Issue dispatch: claim the issue, compile its HTML, push one campaign to
//! every active subscriber and record the outcome. The claim is an atomic
//! status transition to `sending`, so two concurrent dispatch requests for
//! the same issue cannot both proceed.

use std::str::FromStr;

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Issue, IssueStatus, Subscriber};
use crate::email_client::{DeliveryReport, EmailClient};
use crate::storage::{IssueRepository, SendRepository, SubscriberRepository};
use crate::template::IssueTemplate;
use crate::utils::error_chain_fmt;

#[derive(Debug, serde::Serialize)]
pub struct DispatchOutcome {
    pub issue_id: Uuid,
    pub total_recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("Issue not found")]
    NotFound,
    #[error("Issue has already been sent")]
    AlreadySent,
    #[error("A dispatch for this issue is already in progress")]
    InFlight,
    #[error("No active subscribers to deliver to")]
    NoActiveSubscribers,
    #[error("Delivery failed for every recipient")]
    AllSendsFailed(Vec<DeliveryReport>),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[tracing::instrument(name = "Dispatch issue", skip(pool, email_client, base_url))]
pub async fn dispatch_issue(
    pool: &PgPool,
    email_client: &EmailClient,
    base_url: &str,
    issue_id: Uuid,
) -> Result<DispatchOutcome, DispatchError> {
    let issues = IssueRepository::new(pool.clone());
    let issue = issues
        .find(issue_id)
        .await
        .context("Failed to load issue")?
        .ok_or(DispatchError::NotFound)?;
    if issue.is_sent() {
        return Err(DispatchError::AlreadySent);
    }
    if issue.is_in_flight() {
        return Err(DispatchError::InFlight);
    }
    let prior_status = IssueStatus::from_str(&issue.status)
        .map_err(|_| anyhow::anyhow!("Issue {} has unknown status {:?}", issue.id, issue.status))?;

    // The pre-checks above race with other dispatchers; the conditional
    // update is what actually decides the winner.
    let claimed = issues
        .claim_for_dispatch(issue_id)
        .await
        .context("Failed to claim issue for dispatch")?;
    if !claimed {
        return Err(DispatchError::InFlight);
    }

    match deliver(pool, email_client, base_url, &issue).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if let Err(release_error) = issues.release_claim(issue_id, prior_status).await {
                tracing::error!(
                    error = %release_error,
                    issue_id = %issue_id,
                    "Failed to release dispatch claim, issue is stuck in 'sending'"
                );
            }
            Err(e)
        }
    }
}

async fn deliver(
    pool: &PgPool,
    email_client: &EmailClient,
    base_url: &str,
    issue: &Issue,
) -> Result<DispatchOutcome, DispatchError> {
    let subscribers = SubscriberRepository::new(pool.clone());
    let recipients = subscribers
        .list_active()
        .await
        .context("Failed to load active subscribers")?;
    if recipients.is_empty() {
        return Err(DispatchError::NoActiveSubscribers);
    }

    let (html, plain) = compile_content(issue, base_url);
    let emails: Vec<String> = recipients.iter().map(|s| s.email.clone()).collect();

    let reports = email_client
        .send_campaign(&issue.slug, &issue.title, &html, &plain, &emails)
        .await;
    let delivered = reports.iter().filter(|r| r.success).count();
    if delivered == 0 {
        return Err(DispatchError::AllSendsFailed(reports));
    }

    record_outcomes(pool, issue.id, &recipients, &reports).await;

    IssueRepository::new(pool.clone())
        .mark_sent(issue.id, &html)
        .await
        .context("Failed to mark issue as sent")?;

    Ok(DispatchOutcome {
        issue_id: issue.id,
        total_recipients: recipients.len(),
        delivered,
        failed: reports.len() - delivered,
    })
}

/// Writes the per-recipient audit rows and stamps `last_sent_at`. Both are
/// bookkeeping: a failure here is logged and the dispatch still counts.
async fn record_outcomes(
    pool: &PgPool,
    issue_id: Uuid,
    recipients: &[Subscriber],
    reports: &[DeliveryReport],
) {
    let pairs: Vec<(Uuid, &DeliveryReport)> = recipients
        .iter()
        .zip(reports)
        .map(|(subscriber, report)| (subscriber.id, report))
        .collect();
    if let Err(e) = SendRepository::new(pool.clone())
        .record_batch(issue_id, &pairs)
        .await
    {
        tracing::error!(error = %e, %issue_id, "Failed to record send outcomes");
    }

    let delivered_ids: Vec<Uuid> = pairs
        .iter()
        .filter(|(_, report)| report.success)
        .map(|(id, _)| *id)
        .collect();
    if let Err(e) = SubscriberRepository::new(pool.clone())
        .stamp_last_sent(&delivered_ids)
        .await
    {
        tracing::error!(error = %e, %issue_id, "Failed to stamp last_sent_at");
    }
}

/// Uses the stored HTML when present, otherwise compiles it from the issue
/// body; the plain-text alternative always comes from the template. Campaign
/// HTML is shared by all recipients, so the unsubscribe link points at the
/// public landing page rather than a per-subscriber token URL.
fn compile_content(issue: &Issue, base_url: &str) -> (String, String) {
    let view_url = format!("{}/issues/{}", base_url, issue.slug);
    let unsubscribe_url = format!("{}/unsubscribe", base_url);
    let template = IssueTemplate {
        title: &issue.title,
        preheader: &issue.preheader,
        content: &issue.content_md,
        view_url: &view_url,
        unsubscribe_url: &unsubscribe_url,
    };
    let plain = template.render_plain();
    let html = if issue.html.trim().is_empty() {
        template.render()
    } else {
        issue.html.clone()
    };
    (html, plain)
}
