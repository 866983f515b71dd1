// In-memory doubles for the core ports, shared by the unit tests.

use crate::core::ai::{AiConfig, AiError, AiMessage, AiProvider, AiProviderResponse};
use crate::core::automod::{LogNotice, ModerationPlatform, PlatformError};
use crate::core::delivery::{DeliveryError, NotificationSink, WebhookDelivery, WebhookPayload};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// PLATFORM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    CountContributions { community_id: u64, actor_id: u64 },
    IsBanned { community_id: u64, actor_id: u64 },
    Ban { community_id: u64, actor_id: u64 },
    Unban { community_id: u64, actor_id: u64 },
}

#[derive(Default)]
pub struct MockPlatform {
    pub names: DashMap<u64, String>,
    pub members: DashMap<(u64, u64), String>,
    pub contributions: DashMap<(u64, u64), usize>,
    pub banned: DashSet<(u64, u64)>,
    /// Community id -> error every ban/unban there fails with.
    pub failures: DashMap<u64, PlatformError>,
    pub calls: Mutex<Vec<PlatformCall>>,
    pub notices: Mutex<Vec<(u64, LogNotice)>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ban_calls(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Ban { community_id, .. } => Some(community_id),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<(u64, LogNotice)> {
        self.notices.lock().unwrap().clone()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ModerationPlatform for MockPlatform {
    async fn community_name(&self, community_id: u64) -> Option<String> {
        self.names.get(&community_id).map(|n| n.clone())
    }

    async fn member_display_name(&self, community_id: u64, actor_id: u64) -> Option<String> {
        self.members.get(&(community_id, actor_id)).map(|n| n.clone())
    }

    async fn count_contributions(
        &self,
        community_id: u64,
        actor_id: u64,
        cap: usize,
    ) -> Result<usize, PlatformError> {
        self.record(PlatformCall::CountContributions {
            community_id,
            actor_id,
        });
        let count = self
            .contributions
            .get(&(community_id, actor_id))
            .map(|c| *c)
            .unwrap_or(0);
        Ok(count.min(cap))
    }

    async fn is_banned(&self, community_id: u64, actor_id: u64) -> Result<bool, PlatformError> {
        self.record(PlatformCall::IsBanned {
            community_id,
            actor_id,
        });
        Ok(self.banned.contains(&(community_id, actor_id)))
    }

    async fn ban(
        &self,
        community_id: u64,
        actor_id: u64,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Ban {
            community_id,
            actor_id,
        });
        if let Some(err) = self.failures.get(&community_id) {
            return Err(err.clone());
        }
        self.banned.insert((community_id, actor_id));
        Ok(())
    }

    async fn unban(
        &self,
        community_id: u64,
        actor_id: u64,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Unban {
            community_id,
            actor_id,
        });
        if let Some(err) = self.failures.get(&community_id) {
            return Err(err.clone());
        }
        self.banned.remove(&(community_id, actor_id));
        Ok(())
    }

    async fn send_log(&self, channel_id: u64, notice: &LogNotice) -> Result<(), PlatformError> {
        self.notices
            .lock()
            .unwrap()
            .push((channel_id, notice.clone()));
        Ok(())
    }
}

// ============================================================================
// AI PROVIDER
// ============================================================================

/// Replays scripted replies in order, then falls back to a fixed reply.
pub struct ScriptedAi {
    replies: Mutex<VecDeque<Result<String, AiError>>>,
    fallback: String,
    calls: AtomicUsize,
    pub prompts: Mutex<Vec<Vec<AiMessage>>>,
}

impl ScriptedAi {
    pub fn always(reply: &str) -> Self {
        Self::sequence(Vec::new(), reply)
    }

    pub fn sequence(replies: Vec<Result<String, AiError>>, fallback: &str) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: fallback.to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for Arc<ScriptedAi> {
    async fn chat_complete(
        &self,
        messages: &[AiMessage],
        _config: &AiConfig,
    ) -> Result<AiProviderResponse, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        let content = match next {
            Some(reply) => reply?,
            None => self.fallback.clone(),
        };
        Ok(AiProviderResponse { content })
    }
}

// ============================================================================
// WEBHOOK DELIVERY
// ============================================================================

/// Records every attempt; endpoints can be told to fail a number of times.
#[derive(Default)]
pub struct RecordingDelivery {
    attempts: Mutex<Vec<(String, WebhookPayload)>>,
    remaining_failures: DashMap<String, u32>,
    throttled: DashMap<String, Duration>,
    latency: Duration,
    completed: AtomicUsize,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Fail the next `times` attempts against `endpoint_url` (u32::MAX = forever).
    pub fn fail(&self, endpoint_url: &str, times: u32) {
        self.remaining_failures
            .insert(endpoint_url.to_string(), times);
    }

    /// Answer the next attempt against `endpoint_url` with a 429 and `retry_after`.
    pub fn throttle(&self, endpoint_url: &str, retry_after: Duration) {
        self.throttled.insert(endpoint_url.to_string(), retry_after);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn payloads(&self) -> Vec<WebhookPayload> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookDelivery for Arc<RecordingDelivery> {
    async fn deliver(
        &self,
        sink: &NotificationSink,
        payload: &WebhookPayload,
    ) -> Result<(), DeliveryError> {
        self.attempts
            .lock()
            .unwrap()
            .push((sink.endpoint_url.clone(), payload.clone()));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        if let Some((_, retry_after)) = self.throttled.remove(&sink.endpoint_url) {
            return Err(DeliveryError::RateLimited {
                retry_after: Some(retry_after),
            });
        }
        if let Some(mut remaining) = self.remaining_failures.get_mut(&sink.endpoint_url) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(DeliveryError::UnexpectedStatus { status: 500 });
            }
        }
        Ok(())
    }
}
