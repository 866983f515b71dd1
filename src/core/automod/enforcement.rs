// Ban / unban fan-out across every configured community.
//
// Each community is handled on its own: a failure there is logged and
// recorded as `false`, and the loop moves on. The outcome always has one
// entry per community so the notification shows the real success ratio.

use super::automod_models::{CommunityTarget, EnforcementAction, EnforcementOutcome};
use super::platform::{bounded, ModerationPlatform, PlatformError};
use crate::core::rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EnforcementSettings {
    /// Pause after every ban/unban call.
    pub inter_target_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for EnforcementSettings {
    fn default() -> Self {
        Self {
            inter_target_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(15),
        }
    }
}

pub struct EnforcementService<P: ModerationPlatform> {
    platform: Arc<P>,
    communities: Arc<Vec<CommunityTarget>>,
    limiter: Arc<RateLimiter>,
    settings: EnforcementSettings,
}

impl<P: ModerationPlatform> EnforcementService<P> {
    pub fn new(
        platform: Arc<P>,
        communities: Arc<Vec<CommunityTarget>>,
        limiter: Arc<RateLimiter>,
        settings: EnforcementSettings,
    ) -> Self {
        Self {
            platform,
            communities,
            limiter,
            settings,
        }
    }

    /// Ban the actor everywhere.
    pub async fn enforce(&self, actor_id: u64, reason: &str) -> EnforcementOutcome {
        self.fan_out(EnforcementAction::Ban, actor_id, reason).await
    }

    /// Lift the ban everywhere.
    pub async fn revoke(&self, actor_id: u64, reason: &str) -> EnforcementOutcome {
        self.fan_out(EnforcementAction::Unban, actor_id, reason).await
    }

    async fn fan_out(
        &self,
        action: EnforcementAction,
        actor_id: u64,
        reason: &str,
    ) -> EnforcementOutcome {
        let mut outcome = EnforcementOutcome::default();

        for target in self.communities.iter() {
            self.limiter.acquire().await;
            let success = self.apply(action, target, actor_id, reason).await;
            outcome.record(target.id, success);
        }

        tracing::info!(
            %action,
            actor_id,
            succeeded = outcome.succeeded(),
            total = outcome.total(),
            "Fan-out finished"
        );
        outcome
    }

    async fn apply(
        &self,
        action: EnforcementAction,
        target: &CommunityTarget,
        actor_id: u64,
        reason: &str,
    ) -> bool {
        let timeout = self.settings.call_timeout;

        match bounded(timeout, self.platform.is_banned(target.id, actor_id)).await {
            Ok(banned) if banned == action.desired_ban_state() => {
                tracing::info!(
                    %action,
                    actor_id,
                    community_id = target.id,
                    "Already in the desired state, skipping"
                );
                return true;
            }
            Ok(_) => {}
            Err(e) => {
                // Not fatal: the action itself will tell us whether we can act here.
                tracing::warn!(
                    community_id = target.id,
                    actor_id,
                    error = %e,
                    "Could not read ban state"
                );
            }
        }

        let result = match action {
            EnforcementAction::Ban => {
                bounded(timeout, self.platform.ban(target.id, actor_id, reason)).await
            }
            EnforcementAction::Unban => {
                bounded(timeout, self.platform.unban(target.id, actor_id, reason)).await
            }
        };

        let success = match result {
            Ok(()) => {
                tracing::info!(
                    %action,
                    actor_id,
                    community_id = target.id,
                    community = %target.display_name,
                    "Applied"
                );
                true
            }
            Err(PlatformError::PermissionDenied(detail)) => {
                tracing::error!(
                    %action,
                    actor_id,
                    community_id = target.id,
                    %detail,
                    "Bot lacks permission"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    %action,
                    actor_id,
                    community_id = target.id,
                    kind = e.kind(),
                    error = %e,
                    "Failed"
                );
                false
            }
        };

        tokio::time::sleep(self.settings.inter_target_delay).await;
        success
    }
}
