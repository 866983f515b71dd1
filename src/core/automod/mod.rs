pub mod automod_config;
pub mod automod_models;
pub mod classifier;
pub mod dedup_cache;
pub mod enforcement;
pub mod heuristic_gate;
pub mod notifications;
pub mod pipeline;
pub mod platform;

pub use automod_config::AutomodConfig;
pub use automod_models::ModerationEvent;
pub use pipeline::AutomodPipeline;
pub use platform::{LogNotice, ModerationPlatform, PlatformError};
