// This is the entry point of the AutoMod bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (HTTP APIs)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Shut everything down in order on SIGINT / SIGTERM

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::automod::{AutomodConfig, AutomodPipeline};
use crate::core::delivery::RetryQueue;
use crate::discord::automod::{commands, events, SerenityPlatform};
use crate::discord::{Data, Error};
use crate::infra::ai::OpenAiClient;
use crate::infra::webhooks::WebhookClient;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Event handler for non-command Discord events.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::AutoModActionExecution { execution } = event {
        events::handle_execution(data, execution);
    }

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // RUST_LOG wins; otherwise info for us, warn for the Discord stack.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,serenity=warn,poise=warn")),
        )
        .init();

    let config = AutomodConfig::from_env().context("Invalid AutoMod configuration")?;
    tracing::info!(
        servers = config.communities.len(),
        webhooks = config.sinks.len(),
        model = %config.ai.model,
        "Configuration loaded"
    );

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Everything the pipeline needs except the Discord HTTP client, which only
    // exists once the framework is up.

    let shutdown = CancellationToken::new();
    let limits = config.rate_limits();
    tracing::info!(
        enforcement = %limits.enforcement.budget(),
        classifier = %limits.classifier.budget(),
        webhooks = %limits.webhooks.budget(),
        "Rate limits"
    );

    let webhook_client =
        WebhookClient::new(config.http_timeout).context("Failed to create webhook client")?;
    let queue = RetryQueue::new(
        webhook_client,
        Arc::clone(&limits.webhooks),
        config.retry.clone(),
        &shutdown,
    );

    let ai_client = OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.http_timeout,
    )
    .context("Failed to create OpenAI client")?;

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::AUTO_MODERATION_EXECUTION
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT; // Needed for the activity history

    let token = config.discord_token.clone();
    let setup_queue = queue.clone();
    let setup_shutdown = shutdown.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![commands::automod()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!("🤖 Bot is starting up...");

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("✅ Commands registered!");

                let platform = Arc::new(SerenityPlatform::new(
                    Arc::clone(&ctx.http),
                    Arc::clone(&ctx.cache),
                ));
                let pipeline = Arc::new(AutomodPipeline::new(
                    &config,
                    Arc::clone(&platform),
                    ai_client,
                    setup_queue.clone(),
                    &limits,
                    setup_shutdown,
                ));

                setup_queue.start().await;

                let data = Data { pipeline, platform };
                events::report_connectivity(ready, &data).await;
                tracing::info!("🚀 Bot is ready!");

                Ok(data)
            })
        })
        .build();

    let mut settings = serenity::cache::Settings::default();
    settings.max_messages = 10000;

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .cache_settings(settings)
        .await
        .context("Error creating client")?;

    // Stop admitting events, let the queue finish its in-flight delivery,
    // then close the gateway. HTTP clients drop with the client afterwards.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown requested");
        shutdown.cancel();
        queue.stop().await;
        shard_manager.shutdown_all().await;
    });

    client.start().await.context("Error running bot")?;
    tracing::info!("Bot stopped");
    Ok(())
}
