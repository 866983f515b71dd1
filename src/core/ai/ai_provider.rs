use super::models::{AiConfig, AiMessage, AiProviderResponse};
use async_trait::async_trait;
use thiserror::Error;

/// Failure talking to an AI provider.
#[derive(Debug, Error)]
pub enum AiError {
    /// The provider told us to slow down (HTTP 429).
    #[error("AI provider rate limited the request")]
    RateLimited,

    /// 5xx from the provider.
    #[error("AI provider server error: {status}")]
    Server { status: u16 },

    /// Timeout, connection reset, DNS, ...
    #[error("AI provider transport error: {0}")]
    Transport(String),

    /// The provider refused the request (bad key, bad model, ...). Retrying won't help.
    #[error("AI provider rejected the request: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("AI provider returned a malformed response: {0}")]
    Malformed(String),
}

impl AiError {
    /// Whether this failure is worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::RateLimited | AiError::Server { .. } | AiError::Transport(_)
        )
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Sends a chat completion request to the AI provider.
    async fn chat_complete(
        &self,
        messages: &[AiMessage],
        config: &AiConfig,
    ) -> Result<AiProviderResponse, AiError>;
}
