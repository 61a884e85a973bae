//! Discord gateway adapter for the identity-link runtime.

pub mod cli;
pub mod event_bridge;
pub mod serenity_platform;

use std::sync::Arc;

use anyhow::{Context, Result};
use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tau_link_runtime::{HttpProfileResolver, LinkRuntime};
use tau_link_store::{LinkStore, SqliteLinkStore};

pub use cli::Cli;
pub use event_bridge::DiscordEventBridge;
pub use serenity_platform::SerenityPlatform;

pub fn gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
}

/// Opens the store, wires the runtime, and runs the gateway client until it stops.
pub async fn run_link_bot(cli: Cli) -> Result<()> {
    let config = cli.runtime_config();
    let store = SqliteLinkStore::new(&cli.database_path).with_context(|| {
        format!(
            "failed to open link database {}",
            cli.database_path.display()
        )
    })?;
    let database = store.path().display().to_string();
    let store: Arc<dyn LinkStore> = Arc::new(store);
    let resolver = Arc::new(HttpProfileResolver::new(config.resolver.clone())?);

    let http = Arc::new(serenity::http::Http::new(&cli.discord_bot_token));
    let platform = Arc::new(SerenityPlatform::new(http));
    let runtime = Arc::new(LinkRuntime::new(config, store, resolver, platform));

    let mut client = Client::builder(&cli.discord_bot_token, gateway_intents())
        .event_handler(DiscordEventBridge::new(runtime))
        .await
        .context("failed to build discord client")?;
    tracing::info!(%database, "starting discord gateway");
    client.start().await.context("discord gateway stopped")
}
