// Configuration for the AutoMod pipeline, read from the environment.
//
// `from_env` is a thin wrapper over `from_lookup` so the parsing rules can be
// tested with a plain HashMap.

use super::automod_models::CommunityTarget;
use super::classifier::{BackoffPolicy, ClassifierSettings};
use super::dedup_cache::DEFAULT_DEDUP_CAPACITY;
use super::enforcement::EnforcementSettings;
use super::heuristic_gate::{GateOrder, GateSettings};
use crate::core::ai::AiConfig;
use crate::core::delivery::{NotificationSink, RetrySettings};
use crate::core::rate_limit::{RateBudget, RateLimits};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing {0} environment variable")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone)]
pub struct AutomodConfig {
    pub discord_token: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub ai: AiConfig,
    pub communities: Vec<CommunityTarget>,
    pub sinks: Vec<NotificationSink>,
    pub gate: GateSettings,
    pub dedup_capacity: usize,
    pub classifier: ClassifierSettings,
    pub enforcement: EnforcementSettings,
    pub retry: RetrySettings,
    pub classifier_rate: RateBudget,
    pub enforcement_rate: RateBudget,
    pub webhook_rate: RateBudget,
    pub http_timeout: Duration,
}

impl AutomodConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let discord_token = env.required("DISCORD_TOKEN")?;
        let openai_api_key = env.required("OPENAI_API_KEY")?;
        let communities = parse_communities(&env.required("AUTOMOD_SERVERS")?)?;
        let sinks = match env.optional("AUTOMOD_WEBHOOKS") {
            Some(raw) => parse_sinks(&raw)?,
            None => Vec::new(),
        };

        let http_timeout = Duration::from_secs(env.parsed("HTTP_TIMEOUT_SECS", 15u64)?.max(1));

        let ai = AiConfig {
            model: env
                .optional("OPENAI_MODEL")
                .unwrap_or_else(|| AiConfig::default().model),
            temperature: env.parsed("OPENAI_TEMPERATURE", 0.0f32)?,
            ..AiConfig::default()
        };

        let gate = GateSettings {
            activity_threshold: env.parsed("AUTOMOD_ACTIVITY_THRESHOLD", 6usize)?,
            allowed_references: env
                .optional("AUTOMOD_ALLOWED_REFERENCES")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            order: match env.optional("AUTOMOD_GATE_ORDER") {
                Some(raw) => GateOrder::parse(&raw).ok_or_else(|| {
                    invalid(
                        "AUTOMOD_GATE_ORDER",
                        format!("expected activity-first or allowlist-first, got '{raw}'"),
                    )
                })?,
                None => GateOrder::default(),
            },
            call_timeout: http_timeout,
        };

        let classifier = ClassifierSettings {
            backoff: BackoffPolicy {
                max_attempts: env.parsed("CLASSIFIER_MAX_ATTEMPTS", 3u32)?.max(1),
                base_delay: Duration::from_millis(env.parsed("CLASSIFIER_BACKOFF_MS", 1_000u64)?),
                ..BackoffPolicy::default()
            },
            max_content_chars: env.parsed("CLASSIFIER_MAX_CHARS", 2_000usize)?.max(1),
            call_timeout: http_timeout,
        };

        let enforcement = EnforcementSettings {
            inter_target_delay: Duration::from_millis(env.parsed("ENFORCEMENT_DELAY_MS", 2_000u64)?),
            call_timeout: http_timeout,
        };

        let retry = RetrySettings {
            max_attempts: env.parsed("WEBHOOK_MAX_ATTEMPTS", 3u32)?.max(1),
            attempt_delay: Duration::from_millis(env.parsed("WEBHOOK_DELAY_MS", 1_000u64)?),
            call_timeout: http_timeout,
        };

        Ok(Self {
            discord_token,
            openai_api_key,
            openai_base_url: env
                .optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            ai,
            communities,
            sinks,
            gate,
            dedup_capacity: env
                .parsed("AUTOMOD_DEDUP_CAPACITY", DEFAULT_DEDUP_CAPACITY)?
                .max(1),
            classifier,
            enforcement,
            retry,
            classifier_rate: env.budget("CLASSIFIER_RATE", RateBudget::new(20, Duration::from_secs(60)))?,
            enforcement_rate: env.budget("ENFORCEMENT_RATE", RateBudget::new(5, Duration::from_secs(5)))?,
            webhook_rate: env.budget("WEBHOOK_RATE", RateBudget::new(5, Duration::from_secs(2)))?,
            http_timeout,
        })
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits::new(self.enforcement_rate, self.classifier_rate, self.webhook_rate)
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| invalid(key, format!("'{raw}': {e}"))),
            None => Ok(default),
        }
    }

    fn budget(&self, key: &'static str, default: RateBudget) -> Result<RateBudget, ConfigError> {
        match self.optional(key) {
            Some(raw) => RateBudget::parse(&raw)
                .ok_or_else(|| invalid(key, format!("expected calls/seconds, got '{raw}'"))),
            None => Ok(default),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `guildId:guildName[:logChannelId]`, comma separated.
pub fn parse_communities(raw: &str) -> Result<Vec<CommunityTarget>, ConfigError> {
    const KEY: &str = "AUTOMOD_SERVERS";
    let mut seen = HashSet::new();
    let mut communities = Vec::new();

    for entry in split_list(raw) {
        let (id, rest) = entry
            .split_once(':')
            .ok_or_else(|| invalid(KEY, format!("'{entry}' is not guildId:guildName[:logChannelId]")))?;

        let id = id
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid(KEY, format!("'{id}' is not a guild id")))?;

        // A trailing numeric segment is the log channel; anything else is part of the name.
        let (name, log_sink_id) = match rest.rsplit_once(':') {
            Some((name, channel)) => match channel.trim().parse::<u64>() {
                Ok(channel) => (name, Some(channel)),
                Err(_) => (rest, None),
            },
            None => (rest, None),
        };

        let display_name = name.trim().to_string();
        if display_name.is_empty() {
            return Err(invalid(KEY, format!("guild {id} has no name")));
        }
        if !seen.insert(id) {
            return Err(invalid(KEY, format!("guild {id} is listed twice")));
        }

        tracing::info!(
            guild_id = id,
            guild = %display_name,
            log_channel = ?log_sink_id,
            "Loaded server"
        );
        communities.push(CommunityTarget {
            id,
            display_name,
            log_sink_id,
        });
    }

    if communities.is_empty() {
        return Err(invalid(KEY, "no servers configured"));
    }
    Ok(communities)
}

/// `webhookUrl[|affinityName[|avatarUrl]]`, comma separated.
pub fn parse_sinks(raw: &str) -> Result<Vec<NotificationSink>, ConfigError> {
    const KEY: &str = "AUTOMOD_WEBHOOKS";
    let mut sinks = Vec::new();

    for entry in split_list(raw) {
        let mut parts = entry.split('|').map(str::trim);
        let url = parts.next().unwrap_or_default();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(invalid(KEY, format!("'{url}' is not an http(s) URL")));
        }

        let non_empty = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);
        let sink = NotificationSink {
            endpoint_url: url.to_string(),
            affinity_name: non_empty(parts.next()),
            avatar_url: non_empty(parts.next()),
        };

        tracing::info!(
            webhook = %sink.redacted_url(),
            server = ?sink.affinity_name,
            "Loaded webhook"
        );
        sinks.push(sink);
    }

    Ok(sinks)
}
