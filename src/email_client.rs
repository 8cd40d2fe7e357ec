//! MailerLite adapter. Delivery goes through the campaign API rather than a
//! transactional-send endpoint: recipients are upserted into a group, a
//! regular campaign is created against that group, and the campaign is
//! triggered. Single sends (confirmation emails, admin test sends) use a
//! throwaway group holding exactly one subscriber so they never reach the
//! configured audience.

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};

use crate::domain::SubscriberEmail;

#[derive(Clone)]
pub struct EmailClient {
    http_client: Client,
    base_url: String,
    api_key: Secret<String>,
    sender: SubscriberEmail,
    from_name: String,
    group_id: Option<String>,
    batch_size: usize,
    batch_delay: std::time::Duration,
}

/// Per-recipient outcome of one dispatch. `message_id` carries the provider
/// campaign id when the campaign was triggered.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeliveryReport {
    pub email: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReport {
    fn failure(email: &str, error: String) -> Self {
        Self {
            email: email.to_string(),
            success: false,
            message_id: None,
            error: Some(error),
        }
    }
}

impl EmailClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: String,
        api_key: Secret<String>,
        sender: SubscriberEmail,
        from_name: String,
        group_id: Option<String>,
        batch_size: usize,
        batch_delay: std::time::Duration,
        timeout: std::time::Duration,
    ) -> Self {
        let http_client = Client::builder().timeout(timeout).build().unwrap();
        Self {
            http_client,
            base_url,
            api_key,
            sender,
            from_name,
            group_id,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    pub fn sender(&self) -> &SubscriberEmail {
        &self.sender
    }

    /// Sends one campaign to every address in `recipients`. Never returns an
    /// error: provider failures come back as failure reports so the caller
    /// can decide between partial success and total failure.
    #[tracing::instrument(name = "Send campaign", skip(self, html, plain, recipients), fields(recipients = recipients.len()))]
    pub async fn send_campaign(
        &self,
        campaign_name: &str,
        subject: &str,
        html: &str,
        plain: &str,
        recipients: &[String],
    ) -> Vec<DeliveryReport> {
        self.dispatch(campaign_name, subject, html, plain, recipients, false)
            .await
    }

    /// Sends to a single recipient through a throwaway group, regardless of
    /// whether a shared group is configured.
    #[tracing::instrument(name = "Send single email", skip(self, html, plain))]
    pub async fn send_single(
        &self,
        recipient: &str,
        subject: &str,
        html: &str,
        plain: &str,
    ) -> DeliveryReport {
        let name = format!("single-{}", uuid::Uuid::new_v4());
        let recipients = [recipient.to_string()];
        self.dispatch(&name, subject, html, plain, &recipients, true)
            .await
            .pop()
            .unwrap_or_else(|| DeliveryReport::failure(recipient, "no report produced".into()))
    }

    async fn dispatch(
        &self,
        campaign_name: &str,
        subject: &str,
        html: &str,
        plain: &str,
        recipients: &[String],
        force_temp_group: bool,
    ) -> Vec<DeliveryReport> {
        if recipients.is_empty() {
            return Vec::new();
        }

        let (group_id, temp_group) = match (&self.group_id, force_temp_group) {
            (Some(id), false) => (id.clone(), false),
            _ => match self.create_group(campaign_name).await {
                Ok(id) => (id, true),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create delivery group");
                    return all_failed(recipients, &format!("group creation failed: {e}"));
                }
            },
        };

        let upsert_errors = self.upsert_subscribers(&group_id, recipients).await;
        let upserted = recipients.len() - upsert_errors.iter().flatten().count();
        if upserted == 0 {
            self.cleanup_group(&group_id, temp_group).await;
            return recipients
                .iter()
                .zip(&upsert_errors)
                .map(|(email, err)| {
                    DeliveryReport::failure(
                        email,
                        err.clone().unwrap_or_else(|| "not added to group".into()),
                    )
                })
                .collect();
        }

        let campaign_id = match self
            .create_and_trigger_campaign(campaign_name, subject, html, plain, &group_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "Campaign dispatch failed");
                self.cleanup_group(&group_id, temp_group).await;
                return all_failed(recipients, &format!("campaign dispatch failed: {e}"));
            }
        };

        self.cleanup_group(&group_id, temp_group).await;

        recipients
            .iter()
            .zip(&upsert_errors)
            .map(|(email, err)| match err {
                Some(e) => DeliveryReport::failure(email, e.clone()),
                None => DeliveryReport {
                    email: email.clone(),
                    success: true,
                    message_id: Some(campaign_id.clone()),
                    error: None,
                },
            })
            .collect()
    }

    async fn create_group(&self, campaign_name: &str) -> Result<String, String> {
        let name = format!("temp-{}-{}", campaign_name, uuid::Uuid::new_v4());
        let response = self
            .http_client
            .post(format!("{}/api/groups", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("provider returned {}", response.status()));
        }
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        extract_id(&body).ok_or_else(|| "group id missing from response".to_string())
    }

    /// Upserts recipients into the group in chunks, pausing between chunks so
    /// large audiences do not trip provider rate limits. Returns one entry
    /// per recipient, `None` on success.
    async fn upsert_subscribers(
        &self,
        group_id: &str,
        recipients: &[String],
    ) -> Vec<Option<String>> {
        let mut errors = Vec::with_capacity(recipients.len());
        let mut chunks = recipients.chunks(self.batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            let results = futures::future::join_all(
                chunk.iter().map(|email| self.upsert_subscriber(group_id, email)),
            )
            .await;
            errors.extend(results);
            if chunks.peek().is_some() && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }
        errors
    }

    async fn upsert_subscriber(&self, group_id: &str, email: &str) -> Option<String> {
        let result = self
            .http_client
            .post(format!("{}/api/subscribers", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "email": email, "groups": [group_id] }))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => {
                let status = response.status();
                tracing::warn!(email, %status, "Subscriber upsert rejected");
                Some(format!("upsert rejected with {status}"))
            }
            Err(e) => {
                tracing::warn!(email, error = %e, "Subscriber upsert failed");
                Some(format!("upsert failed: {e}"))
            }
        }
    }

    async fn create_and_trigger_campaign(
        &self,
        campaign_name: &str,
        subject: &str,
        html: &str,
        plain: &str,
        group_id: &str,
    ) -> Result<String, String> {
        let mut body = json!({
            "type": "regular",
            "name": campaign_name,
            "subject": subject,
            "from": { "email": self.sender.as_ref(), "name": self.from_name },
            "content": { "html": html, "plain": plain },
            "groups": [group_id],
        });

        let mut response = self.post_campaign(&body).await?;
        // Free-tier accounts reject inline content with 422; retry without it
        // and let the provider's editor template stand in.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            tracing::warn!("Campaign content rejected, retrying without inline content");
            if let Some(object) = body.as_object_mut() {
                object.remove("content");
            }
            response = self.post_campaign(&body).await?;
        }
        if !response.status().is_success() {
            return Err(format!("campaign creation returned {}", response.status()));
        }
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        let campaign_id =
            extract_id(&body).ok_or_else(|| "campaign id missing from response".to_string())?;

        let trigger = self
            .http_client
            .post(format!(
                "{}/api/campaigns/{}/actions/send",
                self.base_url, campaign_id
            ))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "type": "regular" }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !trigger.status().is_success() {
            return Err(format!("campaign trigger returned {}", trigger.status()));
        }
        Ok(campaign_id)
    }

    async fn post_campaign(&self, body: &Value) -> Result<reqwest::Response, String> {
        self.http_client
            .post(format!("{}/api/campaigns", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())
    }

    /// Best-effort removal of throwaway groups. A leaked group is logged,
    /// not surfaced.
    async fn cleanup_group(&self, group_id: &str, temp_group: bool) {
        if !temp_group {
            return;
        }
        let result = self
            .http_client
            .delete(format!("{}/api/groups/{}", self.base_url, group_id))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(group_id, status = %response.status(), "Failed to delete temporary group")
            }
            Err(e) => tracing::warn!(group_id, error = %e, "Failed to delete temporary group"),
        }
    }
}

fn all_failed(recipients: &[String], error: &str) -> Vec<DeliveryReport> {
    recipients
        .iter()
        .map(|email| DeliveryReport::failure(email, error.to_string()))
        .collect()
}

/// Provider responses wrap payloads as `{"data": {...}}` in most endpoints
/// but not all, and ids show up both as strings and as numbers.
fn extract_id(body: &Value) -> Option<String> {
    let id = body.get("data").and_then(|d| d.get("id")).or_else(|| body.get("id"))?;
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
