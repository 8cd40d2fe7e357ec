use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Issue {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub preheader: String,
    pub content_md: String,
    pub html: String,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    pub fn is_sent(&self) -> bool {
        self.status == IssueStatus::Sent.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == IssueStatus::Sending.as_ref()
    }
}

/// `sending` is a transient claim held for the duration of a dispatch; it is
/// what stops two concurrent send requests for the same issue from both
/// proceeding. `sent` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum IssueStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
}

/// Derive a URL slug from an issue title: lowercase, non-alphanumeric runs
/// collapsed to single hyphens, leading/trailing hyphens trimmed.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = true; // swallow leading separators
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
