// The AutoMod pipeline - one call per blocked message.
//
//   dedup -> heuristic gate -> classifier -> ban fan-out -> notifications
//
// Every phase reduces its own failures to a bool or a partial result, so
// `handle_event` always finishes and always leaves a log line behind.

use super::automod_config::AutomodConfig;
use super::automod_models::{truncate_chars, CommunityTarget, EnforcementOutcome, ModerationEvent};
use super::classifier::ScamClassifier;
use super::dedup_cache::DedupCache;
use super::enforcement::EnforcementService;
use super::heuristic_gate::{GateDecision, HeuristicGate};
use super::notifications::{ban_notice, cleared_notice, BanReport, NotificationComposer};
use super::platform::{bounded, LogNotice, ModerationPlatform};
use crate::core::ai::AiProvider;
use crate::core::delivery::{QueueStats, RetryQueue, WebhookDelivery};
use crate::core::rate_limit::RateLimits;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REASON_CONTENT_CHARS: usize = 100;

/// How an event left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    ShuttingDown,
    UnmonitoredCommunity,
    EmptyContent,
    Duplicate,
    GateSkipped(GateDecision),
    Cleared,
    Enforced(EnforcementOutcome),
}

/// Point-in-time numbers for the status command.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub communities: usize,
    pub sinks: usize,
    pub dedup_len: usize,
    pub dedup_capacity: usize,
    pub queue_depth: usize,
    pub queue_stats: QueueStats,
    pub shutting_down: bool,
}

pub struct AutomodPipeline<P: ModerationPlatform, A: AiProvider, D: WebhookDelivery> {
    platform: Arc<P>,
    communities: Arc<Vec<CommunityTarget>>,
    dedup: DedupCache,
    gate: HeuristicGate<P>,
    classifier: ScamClassifier<A>,
    enforcement: EnforcementService<P>,
    composer: NotificationComposer<D>,
    shutdown: CancellationToken,
    call_timeout: Duration,
}

impl<P, A, D> AutomodPipeline<P, A, D>
where
    P: ModerationPlatform,
    A: AiProvider,
    D: WebhookDelivery,
{
    pub fn new(
        config: &AutomodConfig,
        platform: Arc<P>,
        provider: A,
        queue: RetryQueue<D>,
        limits: &RateLimits,
        shutdown: CancellationToken,
    ) -> Self {
        let communities = Arc::new(config.communities.clone());

        Self {
            dedup: DedupCache::new(config.dedup_capacity),
            gate: HeuristicGate::new(
                Arc::clone(&platform),
                Arc::clone(&communities),
                config.gate.clone(),
            ),
            classifier: ScamClassifier::new(
                provider,
                config.ai.clone(),
                Arc::clone(&limits.classifier),
                config.classifier.clone(),
            ),
            enforcement: EnforcementService::new(
                Arc::clone(&platform),
                Arc::clone(&communities),
                Arc::clone(&limits.enforcement),
                config.enforcement.clone(),
            ),
            composer: NotificationComposer::new(config.sinks.clone(), queue),
            platform,
            communities,
            shutdown,
            call_timeout: config.http_timeout,
        }
    }

    pub fn communities(&self) -> &[CommunityTarget] {
        &self.communities
    }

    pub fn community(&self, community_id: u64) -> Option<&CommunityTarget> {
        self.communities.iter().find(|c| c.id == community_id)
    }

    pub async fn handle_event(&self, event: ModerationEvent) -> PipelineOutcome {
        let actor_id = event.actor_id;

        if self.shutdown.is_cancelled() {
            tracing::info!(actor_id, "Shutting down, ignoring AutoMod event");
            return PipelineOutcome::ShuttingDown;
        }

        let Some(community) = self.community(event.source_community_id) else {
            tracing::debug!(
                guild_id = event.source_community_id,
                "Guild not in monitoring list"
            );
            return PipelineOutcome::UnmonitoredCommunity;
        };

        if event.content_snippet.trim().is_empty() {
            tracing::info!(actor_id, "No content to analyze, skipping");
            return PipelineOutcome::EmptyContent;
        }

        if !self.dedup.should_process(actor_id).await {
            tracing::info!(actor_id, "User already processed, skipping");
            return PipelineOutcome::Duplicate;
        }

        let decision = self.gate.evaluate(&event).await;
        if decision.skips_classification() {
            tracing::info!(actor_id, ?decision, "Heuristic gate skipped classification");
            return PipelineOutcome::GateSkipped(decision);
        }

        let actor_name = self.actor_name(community.id, actor_id).await;
        tracing::info!(
            actor_id,
            actor = %actor_name,
            guild = %community.display_name,
            "Analyzing flagged content"
        );

        if !self.classifier.classify(&event.content_snippet).await {
            tracing::info!(actor_id, actor = %actor_name, "Message is not a scam");
            self.post_log(community, &cleared_notice(&event, &actor_name))
                .await;
            return PipelineOutcome::Cleared;
        }

        tracing::info!(actor_id, actor = %actor_name, "Scam confirmed, banning everywhere");
        self.dedup.mark_processed(actor_id).await;

        let reason = format!(
            "Scam detected by AutoMod classifier. Original message: {}",
            truncate_chars(&event.content_snippet, REASON_CONTENT_CHARS)
        );
        let outcome = self.enforcement.enforce(actor_id, &reason).await;

        let report = BanReport {
            event: &event,
            actor_name: &actor_name,
            community_name: &community.display_name,
            outcome: &outcome,
        };
        self.composer.notify(&report).await;
        self.post_log(community, &ban_notice(&report)).await;

        PipelineOutcome::Enforced(outcome)
    }

    /// Manual reverse of an enforcement, e.g. after an appeal.
    pub async fn unban(&self, actor_id: u64, reason: &str) -> EnforcementOutcome {
        if self.dedup.forget(actor_id).await {
            tracing::info!(actor_id, "Removed actor from dedup cache");
        }
        self.enforcement.revoke(actor_id, reason).await
    }

    pub async fn status(&self) -> PipelineStatus {
        let queue = self.composer.queue();
        PipelineStatus {
            communities: self.communities.len(),
            sinks: self.composer.sinks().len(),
            dedup_len: self.dedup.len().await,
            dedup_capacity: self.dedup.capacity(),
            queue_depth: queue.depth().await,
            queue_stats: queue.stats(),
            shutting_down: self.shutdown.is_cancelled(),
        }
    }

    async fn actor_name(&self, community_id: u64, actor_id: u64) -> String {
        let lookup = async { Ok(self.platform.member_display_name(community_id, actor_id).await) };
        match bounded(self.call_timeout, lookup).await {
            Ok(Some(name)) => name,
            _ => format!("User {actor_id}"),
        }
    }

    async fn post_log(&self, community: &CommunityTarget, notice: &LogNotice) {
        let Some(channel_id) = community.log_sink_id else {
            return;
        };

        if let Err(e) = bounded(self.call_timeout, self.platform.send_log(channel_id, notice)).await
        {
            tracing::warn!(
                guild_id = community.id,
                channel_id,
                error = %e,
                "Failed to post to log channel"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::AiError;
    use crate::core::automod::PlatformError;
    use crate::core::delivery::NotificationSink;
    use crate::core::testing::{MockPlatform, PlatformCall, RecordingDelivery, ScriptedAi};

    const SOURCE: u64 = 100;
    const ACTOR: u64 = 5_000;

    type TestPipeline = AutomodPipeline<MockPlatform, Arc<ScriptedAi>, Arc<RecordingDelivery>>;

    struct Harness {
        pipeline: TestPipeline,
        platform: Arc<MockPlatform>,
        ai: Arc<ScriptedAi>,
        queue: RetryQueue<Arc<RecordingDelivery>>,
        delivery: Arc<RecordingDelivery>,
        shutdown: CancellationToken,
    }

    fn config(sinks: Vec<NotificationSink>) -> AutomodConfig {
        let mut config = AutomodConfig::from_lookup(|key| {
            let value = match key {
                "DISCORD_TOKEN" => Some("token"),
                "OPENAI_API_KEY" => Some("sk-test"),
                "AUTOMOD_SERVERS" => Some("100:Rust Lounge:900,200:Go Corner:901,300:Zig Zone"),
                "AUTOMOD_ALLOWED_REFERENCES" => Some("github.com"),
                _ => None,
            };
            value.map(str::to_string)
        })
        .unwrap();
        config.sinks = sinks;
        config
    }

    fn harness(ai: ScriptedAi, sinks: Vec<NotificationSink>) -> Harness {
        let config = config(sinks);
        let platform = Arc::new(MockPlatform::new());
        platform.members.insert((SOURCE, ACTOR), "crypto_king".to_string());
        let ai = Arc::new(ai);
        let limits = config.rate_limits();
        let shutdown = CancellationToken::new();
        let delivery = Arc::new(RecordingDelivery::new());
        let queue = RetryQueue::new(
            Arc::clone(&delivery),
            Arc::clone(&limits.webhooks),
            config.retry.clone(),
            &shutdown,
        );

        let pipeline = AutomodPipeline::new(
            &config,
            Arc::clone(&platform),
            Arc::clone(&ai),
            queue.clone(),
            &limits,
            shutdown.clone(),
        );

        Harness {
            pipeline,
            platform,
            ai,
            queue,
            delivery,
            shutdown,
        }
    }

    fn scam_event() -> ModerationEvent {
        ModerationEvent {
            source_community_id: SOURCE,
            actor_id: ACTOR,
            content_snippet: "join my investment group, guaranteed profit".to_string(),
            matched_rule_label: "investment".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scam_from_new_account_is_banned_everywhere() {
        let h = harness(
            ScriptedAi::always("YES: promises guaranteed profit"),
            vec![NotificationSink::new("https://hooks.test/general")],
        );

        let outcome = h.pipeline.handle_event(scam_event()).await;

        let PipelineOutcome::Enforced(result) = outcome else {
            panic!("expected enforcement, got {:?}", outcome);
        };
        assert_eq!(result.ratio(), "3/3");
        assert_eq!(h.platform.ban_calls(), vec![100, 200, 300]);
        assert_eq!(h.ai.calls(), 1);
        // One notification batch: one general sink.
        assert_eq!(h.queue.depth().await, 1);

        let notices = h.platform.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, 900);
        assert!(notices[0].1.title.contains("Banned"));

        h.queue.start().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.queue.stop().await;

        let payloads = h.delivery.payloads();
        assert_eq!(payloads.len(), 1);
        let results = payloads[0].embeds[0]
            .fields
            .iter()
            .find(|f| f.name.contains("Ban results"))
            .expect("ban results field");
        assert_eq!(results.value, "Banned from 3 of 3 servers");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_event_is_suppressed_without_any_calls() {
        let h = harness(ScriptedAi::always("YES: scam"), Vec::new());

        h.pipeline.handle_event(scam_event()).await;
        let calls_before = h.platform.calls().len();

        let outcome = h.pipeline.handle_event(scam_event()).await;

        assert_eq!(outcome, PipelineOutcome::Duplicate);
        assert_eq!(h.ai.calls(), 1);
        assert_eq!(h.platform.calls().len(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_verdict_bans_nobody_and_is_not_remembered() {
        let h = harness(ScriptedAi::always("NO: support question"), Vec::new());

        let outcome = h.pipeline.handle_event(scam_event()).await;

        assert_eq!(outcome, PipelineOutcome::Cleared);
        assert!(h.platform.ban_calls().is_empty());
        assert_eq!(h.platform.notices()[0].1.title, "✅ Message Analyzed");

        // Only positive classifications enter the dedup cache.
        h.pipeline.handle_event(scam_event()).await;
        assert_eq!(h.ai.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_skip_is_not_remembered_in_dedup_cache() {
        let h = harness(ScriptedAi::always("YES: scam"), Vec::new());
        h.platform.contributions.insert((200, ACTOR), 20);

        let outcome = h.pipeline.handle_event(scam_event()).await;
        assert_eq!(
            outcome,
            PipelineOutcome::GateSkipped(GateDecision::EstablishedActor { contributions: 7 })
        );
        assert_eq!(h.ai.calls(), 0);
        assert!(h.platform.ban_calls().is_empty());

        // Same actor, history now gone: the event is evaluated again, not suppressed.
        h.platform.contributions.clear();
        let outcome = h.pipeline.handle_event(scam_event()).await;
        assert!(matches!(outcome, PipelineOutcome::Enforced(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_listed_reference_skips_classifier() {
        let h = harness(ScriptedAi::always("YES: scam"), Vec::new());
        let mut event = scam_event();
        event.content_snippet = "release notes at https://GitHub.com/org/repo".to_string();

        let outcome = h.pipeline.handle_event(event).await;

        assert!(matches!(
            outcome,
            PipelineOutcome::GateSkipped(GateDecision::AllowListed { .. })
        ));
        assert_eq!(h.ai.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_outage_fails_closed() {
        let h = harness(
            ScriptedAi::sequence(
                vec![
                    Err(AiError::Server { status: 503 }),
                    Err(AiError::Server { status: 503 }),
                    Err(AiError::Server { status: 503 }),
                ],
                "YES: unreachable",
            ),
            Vec::new(),
        );

        let outcome = h.pipeline.handle_event(scam_event()).await;

        assert_eq!(outcome, PipelineOutcome::Cleared);
        assert!(h.platform.ban_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_ban_failure_is_reported_in_notification() {
        let h = harness(
            ScriptedAi::always("YES: scam"),
            vec![NotificationSink::new("https://hooks.test/general")],
        );
        h.platform
            .failures
            .insert(200, PlatformError::PermissionDenied("Missing Permissions".into()));

        let outcome = h.pipeline.handle_event(scam_event()).await;

        let PipelineOutcome::Enforced(result) = outcome else {
            panic!("expected enforcement");
        };
        assert_eq!(result.ratio(), "2/3");
        assert_eq!(h.platform.ban_calls(), vec![100, 200, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_affinity_routing_through_pipeline() {
        let h = harness(
            ScriptedAi::always("YES: scam"),
            vec![
                NotificationSink::new("https://hooks.test/general"),
                NotificationSink::new("https://hooks.test/rust").with_affinity("rust lounge"),
                NotificationSink::new("https://hooks.test/go").with_affinity("Go Corner"),
            ],
        );

        h.pipeline.handle_event(scam_event()).await;

        assert_eq!(h.queue.depth().await, 1);
        h.queue.start().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.queue.stop().await;
        assert_eq!(h.queue.stats().delivered, 1);
        assert_eq!(h.delivery.attempts(), vec!["https://hooks.test/rust"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmonitored_and_empty_events_are_ignored() {
        let h = harness(ScriptedAi::always("YES: scam"), Vec::new());

        let mut foreign = scam_event();
        foreign.source_community_id = 999;
        assert_eq!(
            h.pipeline.handle_event(foreign).await,
            PipelineOutcome::UnmonitoredCommunity
        );

        let mut blank = scam_event();
        blank.content_snippet = "   ".to_string();
        assert_eq!(
            h.pipeline.handle_event(blank).await,
            PipelineOutcome::EmptyContent
        );

        assert_eq!(h.ai.calls(), 0);
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_admitting_events() {
        let h = harness(ScriptedAi::always("YES: scam"), Vec::new());
        h.shutdown.cancel();

        assert_eq!(
            h.pipeline.handle_event(scam_event()).await,
            PipelineOutcome::ShuttingDown
        );
        assert!(h.pipeline.status().await.shutting_down);
        assert_eq!(h.ai.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unban_reverses_and_clears_dedup() {
        let h = harness(ScriptedAi::always("YES: scam"), Vec::new());
        h.pipeline.handle_event(scam_event()).await;
        assert_eq!(h.pipeline.status().await.dedup_len, 1);

        let outcome = h.pipeline.unban(ACTOR, "appeal accepted").await;

        assert_eq!(outcome.ratio(), "3/3");
        assert_eq!(h.pipeline.status().await.dedup_len, 0);
        assert!(h
            .platform
            .calls()
            .contains(&PlatformCall::Unban {
                community_id: 300,
                actor_id: ACTOR
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_events_for_different_actors() {
        let h = harness(ScriptedAi::always("YES: scam"), Vec::new());
        let pipeline = Arc::new(h.pipeline);

        let mut handles = Vec::new();
        for actor in 1..=4u64 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                let mut event = scam_event();
                event.actor_id = actor;
                pipeline.handle_event(event).await
            }));
        }

        for handle in handles {
            assert!(matches!(handle.await.unwrap(), PipelineOutcome::Enforced(_)));
        }
        assert_eq!(h.platform.ban_calls().len(), 12);
        assert_eq!(pipeline.status().await.dedup_len, 4);
    }
}
