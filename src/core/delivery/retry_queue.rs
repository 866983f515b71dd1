// In-memory notification queue with a single background drain worker.
//
// Producers `enqueue` and return immediately. The worker pops the head,
// waits for the webhook rate limiter, attempts delivery and either forgets
// the message (delivered / exhausted) or re-appends it at the tail.
//
// Nothing here survives a restart.

use super::delivery_models::{
    DeliveryError, NotificationSink, QueuedMessage, WebhookDelivery, WebhookPayload,
};
use crate::core::rate_limit::RateLimiter;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total delivery attempts per message, including the first.
    pub max_attempts: u32,
    /// Pause after every attempt, success or failure. A sink's Retry-After
    /// stretches it.
    pub attempt_delay: Duration,
    /// Upper bound on a single delivery call.
    pub call_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(15),
        }
    }
}

/// Snapshot of the worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub delivered: u64,
    pub retried: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

struct QueueInner<D: WebhookDelivery> {
    delivery: D,
    limiter: Arc<RateLimiter>,
    settings: RetrySettings,
    pending: Mutex<VecDeque<QueuedMessage>>,
    wakeup: Notify,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

/// Cheap to clone; every clone feeds the same queue and worker.
pub struct RetryQueue<D: WebhookDelivery> {
    inner: Arc<QueueInner<D>>,
}

impl<D: WebhookDelivery> Clone for RetryQueue<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: WebhookDelivery> RetryQueue<D> {
    /// `shutdown` is usually the process-wide token; the queue listens on a child of it.
    pub fn new(
        delivery: D,
        limiter: Arc<RateLimiter>,
        settings: RetrySettings,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                delivery,
                limiter,
                settings,
                pending: Mutex::new(VecDeque::new()),
                wakeup: Notify::new(),
                shutdown: shutdown.child_token(),
                worker: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    pub async fn enqueue(&self, sink: NotificationSink, payload: WebhookPayload) {
        let message = QueuedMessage::new(sink, payload, self.inner.settings.max_attempts);
        let depth = {
            let mut pending = self.inner.pending.lock().await;
            pending.push_back(message);
            pending.len()
        };
        tracing::debug!(depth, "Notification queued");
        self.inner.wakeup.notify_one();
    }

    pub async fn depth(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    pub fn stats(&self) -> QueueStats {
        let counters = &self.inner.counters;
        QueueStats {
            delivered: counters.delivered.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Spawn the drain worker. Returns `false` if it is already running or the
    /// queue has been stopped.
    pub async fn start(&self) -> bool {
        let mut worker = self.inner.worker.lock().await;

        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Notification worker already running");
            return false;
        }
        if self.inner.shutdown.is_cancelled() {
            tracing::warn!("Refusing to start notification worker after shutdown");
            return false;
        }

        let inner = Arc::clone(&self.inner);
        *worker = Some(tokio::spawn(async move { inner.run().await }));
        true
    }

    /// Ask the worker to stop and wait for it. An in-flight attempt is allowed
    /// to finish; anything still pending afterwards is abandoned.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();

        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Notification worker panicked: {}", e);
            }
        }

        let abandoned = self.depth().await;
        if abandoned > 0 {
            tracing::warn!(abandoned, "Notification queue stopped with undelivered messages");
        }
    }
}

impl<D: WebhookDelivery> QueueInner<D> {
    async fn run(&self) {
        tracing::info!("Notification worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let next = self.pending.lock().await.pop_front();
            let Some(message) = next else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.wakeup.notified() => {}
                }
                continue;
            };

            let pause = match self.attempt(message).await {
                Some(retry_after) => retry_after.max(self.settings.attempt_delay),
                None => self.settings.attempt_delay,
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Notification worker stopped");
    }

    /// Returns the back-off the sink asked for, if any.
    async fn attempt(&self, mut message: QueuedMessage) -> Option<Duration> {
        self.limiter.acquire().await;

        let result = match tokio::time::timeout(
            self.settings.call_timeout,
            self.delivery.deliver(&message.sink, &message.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transport(format!(
                "timed out after {}ms",
                self.settings.call_timeout.as_millis()
            ))),
        };

        match result {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    sink = %message.sink.redacted_url(),
                    attempt = message.attempt_count + 1,
                    "Notification delivered"
                );
            }
            Err(err) => {
                message.attempt_count += 1;
                let retry_after = err.retry_after();

                if message.attempt_count < message.max_attempts {
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        sink = %message.sink.redacted_url(),
                        attempt = message.attempt_count,
                        max_attempts = message.max_attempts,
                        error = %err,
                        "Notification delivery failed, will retry"
                    );
                    self.pending.lock().await.push_back(message);
                    return retry_after;
                } else {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    let exhausted = DeliveryError::Exhausted {
                        attempts: message.attempt_count,
                        last_error: err.to_string(),
                    };
                    tracing::error!(
                        sink = %message.sink.redacted_url(),
                        error = %exhausted,
                        "Dropping notification"
                    );
                }
            }
        }

        None
    }
}
