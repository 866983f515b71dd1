// Cheap pre-filters that decide whether a flagged message is worth a
// classifier call at all.
//
// - Activity history: accounts with more than `activity_threshold` visible
//   messages across our communities are unlikely to be fresh scam accounts.
// - Reference allow-list: messages that mention a trusted reference
//   (domain, project name, ...) are left alone.

use super::automod_models::{CommunityTarget, ModerationEvent};
use super::platform::{bounded, ModerationPlatform};
use std::sync::Arc;
use std::time::Duration;

/// Which filter runs first. Both short-circuit, so this only changes cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateOrder {
    #[default]
    ActivityFirst,
    AllowListFirst,
}

impl GateOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "activity-first" | "activity" => Some(GateOrder::ActivityFirst),
            "allowlist-first" | "allowlist" => Some(GateOrder::AllowListFirst),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Skip classification once the actor has *more* than this many contributions.
    pub activity_threshold: usize,
    pub allowed_references: Vec<String>,
    pub order: GateOrder,
    pub call_timeout: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            activity_threshold: 6,
            allowed_references: Vec::new(),
            order: GateOrder::default(),
            call_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Nothing vouches for the actor; ask the classifier.
    Classify,
    EstablishedActor { contributions: usize },
    AllowListed { reference: String },
}

impl GateDecision {
    pub fn skips_classification(&self) -> bool {
        !matches!(self, GateDecision::Classify)
    }
}

pub struct HeuristicGate<P: ModerationPlatform> {
    platform: Arc<P>,
    communities: Arc<Vec<CommunityTarget>>,
    activity_threshold: usize,
    /// Lower-cased, blanks removed.
    allowed_references: Vec<String>,
    order: GateOrder,
    call_timeout: Duration,
}

impl<P: ModerationPlatform> HeuristicGate<P> {
    pub fn new(
        platform: Arc<P>,
        communities: Arc<Vec<CommunityTarget>>,
        settings: GateSettings,
    ) -> Self {
        let allowed_references = settings
            .allowed_references
            .iter()
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .collect();

        Self {
            platform,
            communities,
            activity_threshold: settings.activity_threshold,
            allowed_references,
            order: settings.order,
            call_timeout: settings.call_timeout,
        }
    }

    pub async fn evaluate(&self, event: &ModerationEvent) -> GateDecision {
        let decision = match self.order {
            GateOrder::ActivityFirst => match self.check_activity(event.actor_id).await {
                Some(decision) => Some(decision),
                None => self.check_allow_list(&event.content_snippet),
            },
            GateOrder::AllowListFirst => match self.check_allow_list(&event.content_snippet) {
                Some(decision) => Some(decision),
                None => self.check_activity(event.actor_id).await,
            },
        };

        decision.unwrap_or(GateDecision::Classify)
    }

    /// Count contributions community by community, stopping as soon as the
    /// threshold is exceeded. A community we can't read counts as zero.
    pub async fn check_activity(&self, actor_id: u64) -> Option<GateDecision> {
        let needed = self.activity_threshold.saturating_add(1);
        let mut total = 0usize;

        for target in self.communities.iter() {
            let remaining = needed - total;
            match bounded(
                self.call_timeout,
                self.platform
                    .count_contributions(target.id, actor_id, remaining),
            )
            .await
            {
                Ok(count) => total += count.min(remaining),
                Err(e) => {
                    tracing::warn!(
                        community_id = target.id,
                        actor_id,
                        error = %e,
                        "Could not read activity history"
                    );
                }
            }

            if total > self.activity_threshold {
                return Some(GateDecision::EstablishedActor {
                    contributions: total,
                });
            }
        }

        tracing::debug!(actor_id, contributions = total, "Actor has little history");
        None
    }

    pub fn check_allow_list(&self, content: &str) -> Option<GateDecision> {
        let lowered = content.to_lowercase();
        self.allowed_references
            .iter()
            .find(|reference| lowered.contains(reference.as_str()))
            .map(|reference| GateDecision::AllowListed {
                reference: reference.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{MockPlatform, PlatformCall};

    const ACTOR: u64 = 900;

    fn communities(ids: &[u64]) -> Arc<Vec<CommunityTarget>> {
        Arc::new(
            ids.iter()
                .map(|id| CommunityTarget {
                    id: *id,
                    display_name: format!("guild-{id}"),
                    log_sink_id: None,
                })
                .collect(),
        )
    }

    fn event(content: &str) -> ModerationEvent {
        ModerationEvent {
            source_community_id: 1,
            actor_id: ACTOR,
            content_snippet: content.to_string(),
            matched_rule_label: "links".to_string(),
        }
    }

    fn gate(platform: Arc<MockPlatform>, order: GateOrder) -> HeuristicGate<MockPlatform> {
        HeuristicGate::new(
            platform,
            communities(&[1, 2, 3]),
            GateSettings {
                activity_threshold: 6,
                allowed_references: vec!["GitHub.com".to_string(), "  ".to_string()],
                order,
                ..Default::default()
            },
        )
    }

    fn count_calls(platform: &MockPlatform) -> usize {
        platform
            .calls()
            .iter()
            .filter(|c| matches!(c, PlatformCall::CountContributions { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_new_account_goes_to_classifier() {
        let platform = Arc::new(MockPlatform::new());
        let gate = gate(Arc::clone(&platform), GateOrder::ActivityFirst);

        let decision = gate.evaluate(&event("guaranteed profit, DM me")).await;

        assert_eq!(decision, GateDecision::Classify);
        assert!(!decision.skips_classification());
        assert_eq!(count_calls(&platform), 3);
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let platform = Arc::new(MockPlatform::new());
        platform.contributions.insert((1, ACTOR), 6);
        let gate = gate(Arc::clone(&platform), GateOrder::ActivityFirst);

        assert_eq!(gate.check_activity(ACTOR).await, None);
    }

    #[tokio::test]
    async fn test_maximum_threshold_never_marks_established() {
        let platform = Arc::new(MockPlatform::new());
        platform.contributions.insert((1, ACTOR), 500);
        let gate = HeuristicGate::new(
            Arc::clone(&platform),
            communities(&[1, 2, 3]),
            GateSettings {
                activity_threshold: usize::MAX,
                ..Default::default()
            },
        );

        assert_eq!(gate.check_activity(ACTOR).await, None);
        assert_eq!(count_calls(&platform), 3);
    }

    #[tokio::test]
    async fn test_activity_across_communities_short_circuits() {
        let platform = Arc::new(MockPlatform::new());
        platform.contributions.insert((1, ACTOR), 4);
        platform.contributions.insert((2, ACTOR), 50);
        platform.contributions.insert((3, ACTOR), 50);
        let gate = gate(Arc::clone(&platform), GateOrder::ActivityFirst);

        let decision = gate.evaluate(&event("hello")).await;

        // 4 + min(50, 3 remaining) = 7 > 6, and community 3 is never asked.
        assert_eq!(decision, GateDecision::EstablishedActor { contributions: 7 });
        assert_eq!(count_calls(&platform), 2);
    }

    #[tokio::test]
    async fn test_allow_list_match_is_case_insensitive() {
        let platform = Arc::new(MockPlatform::new());
        let gate = gate(platform, GateOrder::ActivityFirst);

        let decision = gate
            .evaluate(&event("see HTTPS://GITHUB.COM/org/repo/issues/1"))
            .await;

        assert_eq!(
            decision,
            GateDecision::AllowListed {
                reference: "github.com".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_blank_references_are_ignored() {
        let platform = Arc::new(MockPlatform::new());
        let gate = gate(platform, GateOrder::ActivityFirst);

        assert_eq!(gate.check_allow_list("anything at all"), None);
    }

    #[tokio::test]
    async fn test_allow_list_first_skips_history_lookup() {
        let platform = Arc::new(MockPlatform::new());
        let gate = gate(Arc::clone(&platform), GateOrder::AllowListFirst);

        let decision = gate.evaluate(&event("github.com/rust-lang/rust")).await;

        assert!(decision.skips_classification());
        assert_eq!(count_calls(&platform), 0);
    }

    #[test]
    fn test_parse_gate_order() {
        assert_eq!(GateOrder::parse("activity-first"), Some(GateOrder::ActivityFirst));
        assert_eq!(GateOrder::parse("AllowList-First"), Some(GateOrder::AllowListFirst));
        assert_eq!(GateOrder::parse("random"), None);
    }
}
