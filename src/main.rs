use std::env;

use anyhow::{Context as _, Result};
use log::{error, info};
use serenity::prelude::*;

use crate::app_config::AppConfig;
use crate::event_handler::Handler;

mod announcements;
mod app_config;
mod automation;
mod commands;
mod community_db;
mod embeds;
mod event_handler;
mod permissions;
mod punishment;
mod rule_index;
mod ticket_system;
mod transcript;

#[tokio::main]
async fn main() -> Result<()> {
    log4rs::init_file("log4rs.yml", Default::default())
        .context("failed to initialize logging")?;

    let app_config = AppConfig::load_config().context("failed to load configuration")?;
    info!(
        "configuration loaded for guild {}",
        app_config.discord.guild_id
    );

    let handler = Handler::new(app_config).await?;

    // Login with a bot token from the environment
    let token = env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?;
    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(token, intents)
        .event_handler(handler)
        .await
        .context("failed to create the Discord client")?;

    // start listening for events by starting a single shard
    if let Err(why) = client.start().await {
        error!("an error occurred while running the client: {:?}", why);
    }
    Ok(())
}
