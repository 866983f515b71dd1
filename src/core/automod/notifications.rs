// Builds ban notifications and hands them to the retry queue.
//
// Routing: if any sink is bound to the source community (by display name),
// only those sinks hear about the ban. Otherwise every unbound ("general")
// sink does.

use super::automod_models::{truncate_chars, EnforcementOutcome, ModerationEvent};
use super::platform::LogNotice;
use crate::core::delivery::{
    EmbedField, EmbedFooter, NotificationSink, RetryQueue, WebhookDelivery, WebhookEmbed,
    WebhookPayload,
};

const BOT_NAME: &str = "BadBot AutoMod";
const RED: u32 = 0xFF0000;
const GREEN: u32 = 0x00FF00;
const MAX_FIELD_CONTENT: usize = 1_000;

/// Everything a ban notification talks about.
#[derive(Debug, Clone, Copy)]
pub struct BanReport<'a> {
    pub event: &'a ModerationEvent,
    pub actor_name: &'a str,
    pub community_name: &'a str,
    pub outcome: &'a EnforcementOutcome,
}

pub struct NotificationComposer<D: WebhookDelivery> {
    sinks: Vec<NotificationSink>,
    queue: RetryQueue<D>,
}

impl<D: WebhookDelivery> NotificationComposer<D> {
    pub fn new(sinks: Vec<NotificationSink>, queue: RetryQueue<D>) -> Self {
        Self { sinks, queue }
    }

    pub fn sinks(&self) -> &[NotificationSink] {
        &self.sinks
    }

    pub fn queue(&self) -> &RetryQueue<D> {
        &self.queue
    }

    /// Sinks that should hear about an event from `community_name`.
    pub fn route(&self, community_name: &str) -> Vec<&NotificationSink> {
        let bound: Vec<&NotificationSink> = self
            .sinks
            .iter()
            .filter(|sink| sink.has_affinity_for(community_name))
            .collect();

        if !bound.is_empty() {
            return bound;
        }

        self.sinks
            .iter()
            .filter(|sink| sink.affinity_name.is_none())
            .collect()
    }

    /// Enqueue one copy of the report per routed sink. Returns how many were queued.
    pub async fn notify(&self, report: &BanReport<'_>) -> usize {
        let sinks = self.route(report.community_name);
        if sinks.is_empty() {
            tracing::info!(
                community = %report.community_name,
                "No webhook configured for this community, skipping notification"
            );
            return 0;
        }

        let payload = build_ban_payload(report);
        for sink in &sinks {
            let mut payload = payload.clone();
            payload.avatar_url = sink.avatar_url.clone();
            self.queue.enqueue((*sink).clone(), payload).await;
        }

        tracing::info!(
            actor_id = report.event.actor_id,
            sinks = sinks.len(),
            "Ban notification queued"
        );
        sinks.len()
    }
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value,
        inline,
    }
}

pub fn build_ban_payload(report: &BanReport<'_>) -> WebhookPayload {
    let event = report.event;
    let embed = WebhookEmbed {
        title: "🚨 Scammer Detected and Banned".to_string(),
        description: "A user has been banned across all monitored servers for posting scam content."
            .to_string(),
        color: RED,
        timestamp: chrono::Utc::now().to_rfc3339(),
        fields: vec![
            field(
                "👤 User",
                format!(
                    "**Username:** {}\n**User ID:** {}",
                    report.actor_name, event.actor_id
                ),
                false,
            ),
            field(
                "📝 Flagged message",
                format!(
                    "```{}```",
                    truncate_chars(&event.content_snippet, MAX_FIELD_CONTENT)
                ),
                false,
            ),
            field("🧩 Matched rule", event.matched_rule_label.clone(), true),
            field(
                "🏠 Source server",
                format!(
                    "**Name:** {}\n**ID:** {}",
                    report.community_name, event.source_community_id
                ),
                true,
            ),
            field(
                "🔨 Ban results",
                format!(
                    "Banned from {} of {} servers",
                    report.outcome.succeeded(),
                    report.outcome.total()
                ),
                true,
            ),
        ],
        footer: Some(EmbedFooter {
            text: format!("{BOT_NAME} System"),
        }),
    };

    WebhookPayload {
        username: Some(BOT_NAME.to_string()),
        avatar_url: None,
        embeds: vec![embed],
    }
}

/// Notice for the source community's log channel after a ban.
pub fn ban_notice(report: &BanReport<'_>) -> LogNotice {
    LogNotice {
        title: "🚨 Scammer Banned".to_string(),
        description: format!(
            "User {} (<@{}>) has been banned from all monitored servers.",
            report.actor_name, report.event.actor_id
        ),
        color: RED,
        fields: vec![
            field(
                "Scam message",
                format!(
                    "```{}```",
                    truncate_chars(&report.event.content_snippet, MAX_FIELD_CONTENT)
                ),
                false,
            ),
            field(
                "Ban results",
                format!("Banned from {} servers", report.outcome.ratio()),
                true,
            ),
        ],
    }
}

/// Notice for the source community's log channel when the classifier said "not a scam".
pub fn cleared_notice(event: &ModerationEvent, actor_name: &str) -> LogNotice {
    LogNotice {
        title: "✅ Message Analyzed".to_string(),
        description: format!(
            "Message from {} (<@{}>) was flagged by AutoMod but determined to be safe.",
            actor_name, event.actor_id
        ),
        color: GREEN,
        fields: vec![field(
            "Message content",
            format!(
                "```{}```",
                truncate_chars(&event.content_snippet, MAX_FIELD_CONTENT)
            ),
            false,
        )],
    }
}
