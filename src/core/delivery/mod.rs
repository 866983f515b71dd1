// Outbound notifications - webhook payload models and the retry queue.

pub mod delivery_models;
pub mod retry_queue;

pub use delivery_models::*;
pub use retry_queue::{QueueStats, RetryQueue, RetrySettings};
