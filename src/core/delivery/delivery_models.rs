// Delivery domain models - outbound webhook notifications.
//
// The payload types mirror the JSON body a Discord webhook accepts, but they
// are plain serde structs so nothing here depends on serenity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// An outbound webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSink {
    pub endpoint_url: String,
    /// Binds the sink to one community (by display name) for priority routing.
    pub affinity_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl NotificationSink {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            affinity_name: None,
            avatar_url: None,
        }
    }

    pub fn with_affinity(mut self, name: impl Into<String>) -> Self {
        self.affinity_name = Some(name.into());
        self
    }

    /// Case-insensitive match against a community display name.
    pub fn has_affinity_for(&self, community_name: &str) -> bool {
        self.affinity_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase() == community_name.to_lowercase())
    }

    /// Webhook URLs embed their token, so never log them whole.
    pub fn redacted_url(&self) -> String {
        let visible: String = self.endpoint_url.chars().take(40).collect();
        if visible.len() < self.endpoint_url.len() {
            format!("{visible}...")
        } else {
            visible
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEmbed {
    pub title: String,
    pub description: String,
    pub color: u32,
    /// ISO-8601
    pub timestamp: String,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub embeds: Vec<WebhookEmbed>,
}

/// One unit of retry-queue work.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub sink: NotificationSink,
    pub payload: WebhookPayload,
    /// Failed attempts so far.
    pub attempt_count: u32,
    pub max_attempts: u32,
}

impl QueuedMessage {
    pub fn new(sink: NotificationSink, payload: WebhookPayload, max_attempts: u32) -> Self {
        Self {
            sink,
            payload,
            attempt_count: 0,
            max_attempts,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("webhook returned unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("webhook transport error: {0}")]
    Transport(String),

    /// Terminal: the retry budget is used up and the message is dropped.
    #[error("delivery exhausted after {attempts} attempts, last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl DeliveryError {
    /// How long the sink asked us to back off, if it said.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Port for whatever actually POSTs a payload to a sink.
#[async_trait]
pub trait WebhookDelivery: Send + Sync + 'static {
    async fn deliver(
        &self,
        sink: &NotificationSink,
        payload: &WebhookPayload,
    ) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_match_ignores_case() {
        let sink = NotificationSink::new("https://example.test/hook").with_affinity("Rust Lounge");
        assert!(sink.has_affinity_for("rust lounge"));
        assert!(sink.has_affinity_for("RUST LOUNGE"));
        assert!(!sink.has_affinity_for("rust"));

        let accented =
            NotificationSink::new("https://example.test/hook").with_affinity("Café Crypto");
        assert!(accented.has_affinity_for("CAFÉ CRYPTO"));
        assert!(accented.has_affinity_for("café crypto"));

        let general = NotificationSink::new("https://example.test/hook");
        assert!(!general.has_affinity_for("rust lounge"));
    }

    #[test]
    fn test_redacted_url_hides_token() {
        let sink = NotificationSink::new(
            "https://discord.com/api/webhooks/123456789/very-secret-token-value",
        );
        let redacted = sink.redacted_url();
        assert!(redacted.ends_with("..."));
        assert!(!redacted.contains("very-secret-token-value"));
    }

    #[test]
    fn test_payload_omits_empty_optionals() {
        let payload = WebhookPayload {
            username: None,
            avatar_url: None,
            embeds: Vec::new(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("username").is_none());
        assert!(json.get("avatar_url").is_none());
        assert_eq!(json["embeds"], serde_json::json!([]));
    }
}
