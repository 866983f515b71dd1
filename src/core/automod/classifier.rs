// Scam classifier - asks an LLM whether a flagged message is a scam.
//
// The answer is reduced to a bool with a strict prefix rule: only replies
// starting with "YES:" count. Anything else, including provider failures
// after the last retry, is treated as "not a scam" so infrastructure hiccups
// never get anyone banned.

use super::automod_models::truncate_chars;
use crate::core::ai::{AiConfig, AiError, AiMessage, AiProvider};
use crate::core::rate_limit::RateLimiter;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You review chat messages that an automatic filter blocked and decide \
whether they are scams. Links on their own are not suspicious. Treat as scams: Discord invite \
links, URL shorteners, Web3 or crypto job offers, unsolicited recruiting for jobs, and promises \
of easy money, guaranteed returns or investment opportunities. When a message fits these \
patterns, call it a scam.";

const AFFIRMATIVE: &str = "yes:";

/// Exponential backoff with a fixed attempt ceiling.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Delay after failed attempt number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub backoff: BackoffPolicy,
    /// Content is cut to this many characters before it is sent.
    pub max_content_chars: usize,
    pub call_timeout: Duration,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_content_chars: 2_000,
            call_timeout: Duration::from_secs(15),
        }
    }
}

pub struct ScamClassifier<A: AiProvider> {
    provider: A,
    config: AiConfig,
    limiter: Arc<RateLimiter>,
    settings: ClassifierSettings,
}

impl<A: AiProvider> ScamClassifier<A> {
    pub fn new(
        provider: A,
        config: AiConfig,
        limiter: Arc<RateLimiter>,
        settings: ClassifierSettings,
    ) -> Self {
        Self {
            provider,
            config,
            limiter,
            settings,
        }
    }

    /// `true` only when the model positively calls the content a scam.
    pub async fn classify(&self, content: &str) -> bool {
        let content = truncate_chars(content, self.settings.max_content_chars);
        let messages = [
            AiMessage::system(SYSTEM_PROMPT),
            AiMessage::user(format!(
                "AutoMod blocked the following message:\n\n\"{content}\"\n\n\
                 Is this message a scam? Start your answer with 'YES:' or 'NO:'."
            )),
        ];

        let max_attempts = self.settings.backoff.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            self.limiter.acquire().await;

            match self.request(&messages).await {
                Ok(reply) => {
                    let verdict = interpret_verdict(&reply);
                    tracing::info!(
                        model = %self.config.model,
                        verdict,
                        reply = %truncate_chars(reply.trim(), 200),
                        "Classifier replied"
                    );
                    return verdict;
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.settings.backoff.delay_for(attempt) + jitter(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Classifier call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        attempt,
                        error = %err,
                        "Classifier unavailable, treating message as not a scam"
                    );
                    return false;
                }
            }
        }

        false
    }

    async fn request(&self, messages: &[AiMessage]) -> Result<String, AiError> {
        match tokio::time::timeout(
            self.settings.call_timeout,
            self.provider.chat_complete(messages, &self.config),
        )
        .await
        {
            Ok(result) => result.map(|response| response.content),
            Err(_) => Err(AiError::Transport(format!(
                "timed out after {}ms",
                self.settings.call_timeout.as_millis()
            ))),
        }
    }
}

/// Strict prefix rule: the reply must start with "YES:" (any case).
pub fn interpret_verdict(reply: &str) -> bool {
    reply
        .trim_start()
        .get(..AFFIRMATIVE.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(AFFIRMATIVE))
}

/// Up to 250ms of random spread so concurrent retries don't line up.
fn jitter(attempt: u32) -> Duration {
    let ceiling = 250 * u64::from(attempt.min(4));
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling) / 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate_limit::{Dependency, RateBudget};
    use crate::core::testing::ScriptedAi;

    fn classifier(ai: Arc<ScriptedAi>) -> ScamClassifier<Arc<ScriptedAi>> {
        let limiter = Arc::new(RateLimiter::new(
            Dependency::Classifier,
            RateBudget::new(100, Duration::from_secs(60)),
        ));
        let settings = ClassifierSettings {
            max_content_chars: 50,
            ..Default::default()
        };
        ScamClassifier::new(ai, AiConfig::default(), limiter, settings)
    }

    #[test]
    fn test_interpret_verdict() {
        assert!(interpret_verdict("YES: this promises guaranteed returns"));
        assert!(interpret_verdict("  yes: lowercase works too"));
        assert!(!interpret_verdict("NO: looks like a support request"));
        assert!(!interpret_verdict("Yes, definitely a scam"));
        assert!(!interpret_verdict("YESTERDAY I saw this"));
        assert!(!interpret_verdict(""));
        assert!(!interpret_verdict("💰"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_and_negative_replies() {
        let ai = Arc::new(ScriptedAi::always("YES: this promises guaranteed returns"));
        assert!(classifier(ai).classify("join my investment group").await);

        let ai = Arc::new(ScriptedAi::always("NO: looks like a support request"));
        assert!(!classifier(ai).classify("how do I reset my password").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_is_negative() {
        let ai = Arc::new(ScriptedAi::always(""));
        assert!(!classifier(Arc::clone(&ai)).classify("anything").await);
        assert_eq!(ai.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let ai = Arc::new(ScriptedAi::sequence(
            vec![Err(AiError::RateLimited), Err(AiError::Server { status: 502 })],
            "YES: crypto job offer",
        ));

        assert!(classifier(Arc::clone(&ai)).classify("web3 job, DM me").await);
        assert_eq!(ai.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_ceiling_and_returns_false() {
        let ai = Arc::new(ScriptedAi::sequence(
            vec![
                Err(AiError::RateLimited),
                Err(AiError::RateLimited),
                Err(AiError::RateLimited),
            ],
            "YES: should never be reached",
        ));

        assert!(!classifier(Arc::clone(&ai)).classify("free nitro").await);
        assert_eq!(ai.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_fast() {
        let ai = Arc::new(ScriptedAi::sequence(
            vec![Err(AiError::Rejected {
                status: 401,
                body: "invalid api key".into(),
            })],
            "YES: unreachable",
        ));

        assert!(!classifier(Arc::clone(&ai)).classify("free nitro").await);
        assert_eq!(ai.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_is_truncated_before_submission() {
        let ai = Arc::new(ScriptedAi::always("NO: fine"));
        let long = "a".repeat(500);

        classifier(Arc::clone(&ai)).classify(&long).await;

        let prompts = ai.prompts.lock().unwrap();
        let user = &prompts[0][1];
        assert_eq!(user.role, "user");
        assert!(user.content.contains(&format!("{}...", "a".repeat(50))));
        assert!(!user.content.contains(&"a".repeat(51)));
    }
}
