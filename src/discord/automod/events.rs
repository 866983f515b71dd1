// Gateway events that feed the AutoMod pipeline.

use crate::core::automod::{ModerationEvent, ModerationPlatform};
use crate::discord::Data;
use ::serenity::model::guild::automod::{Action, ActionExecution};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Turn a "blocked message" execution into a domain event. Alerts, timeouts
/// and other action kinds are ignored.
pub fn to_moderation_event(execution: &ActionExecution) -> Option<ModerationEvent> {
    if !matches!(execution.action, Action::BlockMessage { .. }) {
        return None;
    }

    let content_snippet = if execution.content.trim().is_empty() {
        execution.matched_keyword.clone().unwrap_or_default()
    } else {
        execution.content.clone()
    };

    let matched_rule_label = execution
        .matched_keyword
        .clone()
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| format!("{:?}", execution.trigger_type));

    Some(ModerationEvent {
        source_community_id: execution.guild_id.get(),
        actor_id: execution.user_id.get(),
        content_snippet,
        matched_rule_label,
    })
}

/// Each execution gets its own task so a slow ban fan-out never holds up the gateway.
pub fn handle_execution(data: &Data, execution: &ActionExecution) {
    let Some(event) = to_moderation_event(execution) else {
        tracing::debug!(
            guild_id = execution.guild_id.get(),
            action = ?execution.action,
            "Ignoring non-blocking AutoMod action"
        );
        return;
    };

    tracing::info!(
        guild_id = event.source_community_id,
        actor_id = event.actor_id,
        rule = %event.matched_rule_label,
        "AutoMod blocked a message"
    );

    let pipeline = Arc::clone(&data.pipeline);
    tokio::spawn(async move {
        let outcome = pipeline.handle_event(event).await;
        tracing::debug!(?outcome, "AutoMod event finished");
    });
}

/// Log which monitored guilds the bot can actually reach.
pub async fn report_connectivity(ready: &serenity::Ready, data: &Data) {
    tracing::info!(user = %ready.user.name, guilds = ready.guilds.len(), "Logged in");

    for community in data.pipeline.communities() {
        let joined = ready.guilds.iter().any(|g| g.id.get() == community.id);
        if !joined {
            tracing::warn!(
                guild_id = community.id,
                guild = %community.display_name,
                "Not a member of monitored guild"
            );
            continue;
        }

        match data.platform.community_name(community.id).await {
            Some(name) => tracing::info!(
                guild_id = community.id,
                guild = %name,
                "Connected to monitored guild"
            ),
            None => tracing::warn!(
                guild_id = community.id,
                guild = %community.display_name,
                "Monitored guild is not reachable yet"
            ),
        }
    }
}
