//! Babelhook CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use babelhook::gateway::Handler;
use babelhook::impersonate::ImpersonationManager;
use babelhook::platform::DiscordPlatform;
use babelhook::policy::PolicyStore;
use babelhook::relay::RelayDispatcher;
use babelhook::translate::{OpenRouterEngine, Translator};

/// Name given to the webhooks this bot creates; also how it recognizes
/// its own webhooks when re-listing a channel.
const WEBHOOK_NAME: &str = "babelhook";

#[derive(Parser)]
#[command(name = "babelhook")]
#[command(about = "Translate Discord messages and repost them under the original author")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = babelhook::config::Config::load().context("failed to load configuration")?;
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let engine = Arc::new(OpenRouterEngine::new(
        config.translator.api_key.clone(),
        config.translator.model.clone(),
    ));
    let translator = Arc::new(Translator::new(engine, config.translator.clone()));

    let policies = Arc::new(
        PolicyStore::load(config.policy_path()).context("failed to load channel policies")?,
    );

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let platform = Arc::new(DiscordPlatform::new(http));
    let webhooks = Arc::new(ImpersonationManager::new(platform.clone(), WEBHOOK_NAME));

    let dispatcher = Arc::new(RelayDispatcher::new(
        policies.clone(),
        translator.clone(),
        webhooks.clone(),
        platform,
    ));

    let handler = Handler::new(dispatcher, policies, translator, webhooks);

    let mut client = serenity::Client::builder(&config.discord_token, Handler::intents())
        .event_handler(handler)
        .await
        .context("failed to build discord client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => {
            result.context("discord client stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shard_manager.shutdown_all().await;
        }
    }

    tracing::info!("babelhook stopped");
    Ok(())
}
