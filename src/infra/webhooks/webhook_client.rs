use crate::core::delivery::{DeliveryError, NotificationSink, WebhookDelivery, WebhookPayload};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Posts embed payloads to Discord webhook URLs.
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookDelivery for WebhookClient {
    async fn deliver(
        &self,
        sink: &NotificationSink,
        payload: &WebhookPayload,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&sink.endpoint_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        check_status(response.status(), response.headers())
    }
}

/// Discord answers a plain webhook execution with 204 No Content.
fn check_status(status: StatusCode, headers: &HeaderMap) -> Result<(), DeliveryError> {
    match status {
        StatusCode::NO_CONTENT => Ok(()),
        StatusCode::TOO_MANY_REQUESTS => Err(DeliveryError::RateLimited {
            retry_after: retry_after(headers),
        }),
        other => Err(DeliveryError::UnexpectedStatus {
            status: other.as_u16(),
        }),
    }
}

/// Discord sends fractional seconds here.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| (0.0..86_400.0).contains(secs))
        .map(Duration::from_secs_f64)
}
