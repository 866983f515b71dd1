// Port for the chat platform the bot moderates.
//
// The core never talks to Discord directly; the Discord layer implements this
// trait over serenity's HTTP client and cache.

use crate::core::delivery::EmbedField;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Closed set of platform failure kinds. None of them are retried by the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The bot lacks the permission (403 / missing role hierarchy).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Timeouts, 5xx, 429, connection errors.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("platform error: {0}")]
    Other(String),
}

impl PlatformError {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::PermissionDenied(_) => "permission_denied",
            PlatformError::Transport(_) => "transport",
            PlatformError::Other(_) => "other",
        }
    }
}

/// A short report posted to a community's log channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LogNotice {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
}

#[async_trait]
pub trait ModerationPlatform: Send + Sync {
    /// Display name of a community, if the bot can see it.
    async fn community_name(&self, community_id: u64) -> Option<String>;

    /// Display name of an actor inside a community, if they are a member.
    async fn member_display_name(&self, community_id: u64, actor_id: u64) -> Option<String>;

    /// Count the actor's visible messages in a community, stopping once `cap` is reached.
    async fn count_contributions(
        &self,
        community_id: u64,
        actor_id: u64,
        cap: usize,
    ) -> Result<usize, PlatformError>;

    /// Whether the actor is currently banned from the community.
    async fn is_banned(&self, community_id: u64, actor_id: u64) -> Result<bool, PlatformError>;

    async fn ban(&self, community_id: u64, actor_id: u64, reason: &str)
        -> Result<(), PlatformError>;

    async fn unban(
        &self,
        community_id: u64,
        actor_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn send_log(&self, channel_id: u64, notice: &LogNotice) -> Result<(), PlatformError>;
}

/// Run a platform call with a hard upper bound on how long it may take.
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, PlatformError>>,
) -> Result<T, PlatformError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Transport(format!(
            "timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
