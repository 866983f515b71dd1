// ModerationPlatform over serenity's HTTP client and cache.

use crate::core::automod::{LogNotice, ModerationPlatform, PlatformError};
use ::serenity::http::UserPagination;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
    cache: Arc<serenity::Cache>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<serenity::Http>, cache: Arc<serenity::Cache>) -> Self {
        Self { http, cache }
    }

    /// Messages by `user_id` still held in the message cache for this guild.
    /// `None` if the guild itself isn't cached.
    fn cached_contributions(
        &self,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
        cap: usize,
    ) -> Option<usize> {
        let channel_ids: Vec<serenity::ChannelId> = {
            let guild = self.cache.guild(guild_id)?;
            guild.channels.keys().copied().collect()
        };

        let mut count = 0;
        for channel_id in channel_ids {
            if let Some(messages) = self.cache.channel_messages(channel_id) {
                count += messages
                    .values()
                    .filter(|m| m.author.id == user_id)
                    .take(cap - count)
                    .count();
            }
            if count >= cap {
                break;
            }
        }
        Some(count)
    }
}

/// 403 is a permission problem; 429, 5xx and connection failures are transport.
fn map_error(err: ::serenity::Error) -> PlatformError {
    match &err {
        ::serenity::Error::Http(http_err) => match http_err.status_code().map(|s| s.as_u16()) {
            Some(403) => PlatformError::PermissionDenied(err.to_string()),
            Some(429) | Some(500..=599) | None => PlatformError::Transport(err.to_string()),
            Some(_) => PlatformError::Other(err.to_string()),
        },
        _ => PlatformError::Other(err.to_string()),
    }
}

#[async_trait]
impl ModerationPlatform for SerenityPlatform {
    async fn community_name(&self, community_id: u64) -> Option<String> {
        let guild_id = serenity::GuildId::new(community_id);
        if let Some(name) = self.cache.guild(guild_id).map(|g| g.name.clone()) {
            return Some(name);
        }

        self.http.get_guild(guild_id).await.ok().map(|g| g.name)
    }

    async fn member_display_name(&self, community_id: u64, actor_id: u64) -> Option<String> {
        let guild_id = serenity::GuildId::new(community_id);
        let user_id = serenity::UserId::new(actor_id);

        let cached = self
            .cache
            .member(guild_id, user_id)
            .map(|m| m.display_name().to_string());
        if cached.is_some() {
            return cached;
        }

        match self.http.get_member(guild_id, user_id).await {
            Ok(member) => Some(member.display_name().to_string()),
            Err(e) => {
                tracing::debug!(community_id, actor_id, error = %e, "Member lookup failed");
                None
            }
        }
    }

    async fn count_contributions(
        &self,
        community_id: u64,
        actor_id: u64,
        cap: usize,
    ) -> Result<usize, PlatformError> {
        if cap == 0 {
            return Ok(0);
        }

        self.cached_contributions(
            serenity::GuildId::new(community_id),
            serenity::UserId::new(actor_id),
            cap,
        )
        .ok_or_else(|| PlatformError::Other(format!("guild {community_id} is not cached")))
    }

    async fn is_banned(&self, community_id: u64, actor_id: u64) -> Result<bool, PlatformError> {
        // Ban list is ordered by user id; ask for the first entry at or after ours.
        let after = serenity::UserId::new(actor_id.saturating_sub(1).max(1));
        let bans = serenity::GuildId::new(community_id)
            .bans(&self.http, Some(UserPagination::After(after)), Some(1))
            .await
            .map_err(map_error)?;

        Ok(bans.first().is_some_and(|ban| ban.user.id.get() == actor_id))
    }

    async fn ban(
        &self,
        community_id: u64,
        actor_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError> {
        serenity::GuildId::new(community_id)
            .ban_with_reason(&self.http, serenity::UserId::new(actor_id), 0, reason)
            .await
            .map_err(map_error)
    }

    async fn unban(
        &self,
        community_id: u64,
        actor_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.http
            .remove_ban(
                serenity::GuildId::new(community_id),
                serenity::UserId::new(actor_id),
                Some(reason),
            )
            .await
            .map_err(map_error)
    }

    async fn send_log(&self, channel_id: u64, notice: &LogNotice) -> Result<(), PlatformError> {
        let embed = serenity::CreateEmbed::new()
            .title(&notice.title)
            .description(&notice.description)
            .color(notice.color)
            .fields(
                notice
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), f.value.clone(), f.inline)),
            )
            .timestamp(serenity::Timestamp::now());

        serenity::ChannelId::new(channel_id)
            .send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await
            .map(|_| ())
            .map_err(map_error)
    }
}
