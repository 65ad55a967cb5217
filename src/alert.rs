use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::AlertSettings;

/// Receives failure and lifecycle notifications. Delivery is best effort.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// `context` names what failed (a statement, a file, a table), `error` is the
    /// underlying error text.
    async fn notify(&self, context: &str, error: &str);
}

/// Build the text message body the webhook expects.
pub fn build_payload(context: &str, error: &str, service: Option<&str>, mentions: &[String]) -> Value {
    let message = format!("[{context}]\nerror: {error}");
    let content = match service {
        Some(service) => format!("[{service}]{message}"),
        None => message,
    };
    json!({
        "msgtype": "text",
        "text": {
            "content": content,
            "mentioned_mobile_list": mentions,
        }
    })
}

/// Posts notifications to a chat webhook.
pub struct WebhookAlerter {
    http_client: reqwest::Client,
    url: reqwest::Url,
    service: Option<String>,
    mentions: Vec<String>,
}

impl WebhookAlerter {
    pub fn new(url: reqwest::Url, service: Option<String>, mentions: Vec<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            url,
            service,
            mentions,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlerter {
    async fn notify(&self, context: &str, error: &str) {
        let payload = build_payload(context, error, self.service.as_deref(), &self.mentions);
        match self.http_client.post(self.url.clone()).json(&payload).send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if status.is_success() {
                    tracing::info!("send monitor message, {body}");
                } else {
                    tracing::warn!("send monitor message got {status}: {body}");
                }
            }
            Err(e) => tracing::error!("send monitor message failed: {e}"),
        }
    }
}

/// Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct DisabledAlerts;

#[async_trait]
impl AlertSink for DisabledAlerts {
    async fn notify(&self, context: &str, error: &str) {
        tracing::debug!("alert suppressed (no webhook): [{context}] {error}");
    }
}

pub fn from_settings(settings: &AlertSettings) -> Arc<dyn AlertSink> {
    match &settings.webhook {
        Some(url) => Arc::new(WebhookAlerter::new(
            url.clone(),
            settings.service.clone(),
            settings.mentions.clone(),
        )),
        None => Arc::new(DisabledAlerts),
    }
}
