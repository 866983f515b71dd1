// Sliding-window rate limiting for outbound calls.
//
// Every external dependency (Discord ban endpoints, the classifier, the
// notification webhooks) gets its own limiter with its own budget. Callers
// just `acquire().await` before making the call; there is no error path, the
// only effect is a delay.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The outbound dependencies we budget calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Enforcement,
    Classifier,
    Webhooks,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Enforcement => write!(f, "enforcement"),
            Dependency::Classifier => write!(f, "classifier"),
            Dependency::Webhooks => write!(f, "webhooks"),
        }
    }
}

/// At most `max_calls` admissions within any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub max_calls: usize,
    pub window: Duration,
}

impl RateBudget {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            // A zero budget would never admit anything.
            max_calls: max_calls.max(1),
            window,
        }
    }

    /// Parse the `calls/seconds` form used in the environment, e.g. `5/2`.
    pub fn parse(value: &str) -> Option<Self> {
        let (calls, secs) = value.trim().split_once('/')?;
        let calls = calls.trim().parse::<usize>().ok()?;
        let secs = secs.trim().parse::<f64>().ok()?;
        if calls == 0 || !secs.is_finite() || secs <= 0.0 {
            return None;
        }
        let window = Duration::try_from_secs_f64(secs).ok()?;
        Some(Self::new(calls, window))
    }
}

impl fmt::Display for RateBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.max_calls, self.window)
    }
}

/// Admission control for a single dependency.
pub struct RateLimiter {
    dependency: Dependency,
    budget: RateBudget,
    /// Timestamps of admitted calls, oldest first. Never longer than `max_calls`.
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(dependency: Dependency, budget: RateBudget) -> Self {
        Self {
            dependency,
            budget,
            admitted: Mutex::new(VecDeque::with_capacity(budget.max_calls)),
        }
    }

    pub fn budget(&self) -> RateBudget {
        self.budget
    }

    /// Wait until one more call fits in the window, then record it.
    ///
    /// The lock is held across the sleep. tokio's mutex is fair, so concurrent
    /// callers are admitted in arrival order.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();

            while let Some(&oldest) = admitted.front() {
                if now.duration_since(oldest) >= self.budget.window {
                    admitted.pop_front();
                } else {
                    break;
                }
            }

            if admitted.len() < self.budget.max_calls {
                admitted.push_back(now);
                return;
            }

            let wait = match admitted.front() {
                Some(&oldest) => self.budget.window - now.duration_since(oldest),
                None => Duration::ZERO,
            };

            tracing::debug!(
                dependency = %self.dependency,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    #[cfg(test)]
    async fn admitted_len(&self) -> usize {
        self.admitted.lock().await.len()
    }
}

/// One limiter per dependency, shared by every component that calls out.
#[derive(Clone)]
pub struct RateLimits {
    pub enforcement: Arc<RateLimiter>,
    pub classifier: Arc<RateLimiter>,
    pub webhooks: Arc<RateLimiter>,
}

impl RateLimits {
    pub fn new(enforcement: RateBudget, classifier: RateBudget, webhooks: RateBudget) -> Self {
        Self {
            enforcement: Arc::new(RateLimiter::new(Dependency::Enforcement, enforcement)),
            classifier: Arc::new(RateLimiter::new(Dependency::Classifier, classifier)),
            webhooks: Arc::new(RateLimiter::new(Dependency::Webhooks, webhooks)),
        }
    }
}
