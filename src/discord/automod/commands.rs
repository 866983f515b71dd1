// AutoMod slash commands for moderators.

use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Scam AutoMod commands.
///
/// Inspect the pipeline or lift a ban it issued.
#[poise::command(
    slash_command,
    subcommands("status", "unban"),
    required_permissions = "BAN_MEMBERS",
    guild_only
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Show monitored servers, webhooks and queue health.
#[poise::command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let pipeline = &ctx.data().pipeline;
    let status = pipeline.status().await;

    let servers = pipeline
        .communities()
        .iter()
        .map(|c| match c.log_sink_id {
            Some(channel) => format!("• {} (`{}`) → <#{}>", c.display_name, c.id, channel),
            None => format!("• {} (`{}`)", c.display_name, c.id),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let embed = serenity::CreateEmbed::new()
        .title("🛡️ AutoMod Status")
        .color(if status.shutting_down { 0xFF0000 } else { 0x00FF00 })
        .field(
            format!("Monitored servers ({})", status.communities),
            servers,
            false,
        )
        .field("Webhooks", status.sinks.to_string(), true)
        .field(
            "Recently banned",
            format!("{} / {}", status.dedup_len, status.dedup_capacity),
            true,
        )
        .field(
            "Notification queue",
            format!(
                "{} pending\n{} delivered, {} retried, {} dropped",
                status.queue_depth,
                status.queue_stats.delivered,
                status.queue_stats.retried,
                status.queue_stats.dropped
            ),
            false,
        );

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Unban a user from every monitored server.
#[poise::command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
    #[description = "Reason for the audit log"] reason: Option<String>,
) -> Result<(), Error> {
    // Fan-out waits between servers, so this can outlive the 3s interaction window.
    ctx.defer_ephemeral().await?;

    let reason = reason.unwrap_or_else(|| format!("Unbanned by {}", ctx.author().name));
    tracing::info!(
        actor_id = user.id.get(),
        moderator = %ctx.author().name,
        %reason,
        "Manual unban requested"
    );

    let pipeline = &ctx.data().pipeline;
    let outcome = pipeline.unban(user.id.get(), &reason).await;

    let mut reply = format!(
        "✅ Unbanned **{}** from {} servers.",
        user.name,
        outcome.ratio()
    );
    let failed: Vec<String> = outcome
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(id, _)| match pipeline.community(id) {
            Some(c) => c.display_name.clone(),
            None => id.to_string(),
        })
        .collect();
    if !failed.is_empty() {
        reply.push_str(&format!("\n⚠️ Failed in: {}", failed.join(", ")));
    }

    ctx.say(reply).await?;
    Ok(())
}
