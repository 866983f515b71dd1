// Discord layer - commands and event handlers.

#[path = "automod/mod.rs"]
pub mod automod;

use crate::core::automod::AutomodPipeline;
use crate::infra::ai::OpenAiClient;
use crate::infra::webhooks::WebhookClient;
use automod::SerenityPlatform;
use std::sync::Arc;

pub type BotPipeline = AutomodPipeline<SerenityPlatform, OpenAiClient, WebhookClient>;

/// Shared state handed to every command and event handler.
pub struct Data {
    pub pipeline: Arc<BotPipeline>,
    pub platform: Arc<SerenityPlatform>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
