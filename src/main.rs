// This is the entry point of the skin market bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite, in-memory)
// - `discord/` = Discord-specific adapters (slash commands)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;
mod settings;

use crate::core::market::{AccountService, FavoritesService, ListingService, TransferEngine};
use crate::discord::{Data, Error};
use crate::infra::market::{SqliteAuditLog, SqliteMarketStore};
use crate::settings::Settings;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Log unexpected command failures and give the user a generic reply.
/// Declined requests never get here; the commands answer those themselves.
async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            tracing::error!(
                command = %ctx.command().qualified_name,
                user_id = ctx.author().id.get(),
                "Command failed: {}",
                error
            );
            let reply = poise::CreateReply::default()
                .content("Something went wrong on our side. Nothing was changed, please try again.")
                .ephemeral(true);
            if let Err(e) = ctx.send(reply).await {
                tracing::warn!("Failed to send error reply: {}", e);
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                tracing::error!("Error while handling error: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let store = SqliteMarketStore::new(&settings.database_path, settings.busy_timeout)
        .await
        .with_context(|| format!("Failed to open market database at {}", settings.database_path))?;

    // The audit history lives in the same database file.
    let audit = SqliteAuditLog::new(store.pool().clone());
    audit
        .migrate()
        .await
        .context("Failed to migrate audit history")?;

    tracing::info!(
        database = %settings.database_path,
        starting_balance = settings.starting_balance(),
        admins = settings.market.admin_ids.len(),
        allow_self_trade = settings.market.allow_self_trade,
        "Market storage ready"
    );

    let data = Data {
        listings: Arc::new(ListingService::new(store.clone(), audit.clone())),
        transfers: Arc::new(TransferEngine::new(
            store.clone(),
            audit.clone(),
            settings.market.clone(),
        )),
        favorites: Arc::new(FavoritesService::new(store.clone())),
        accounts: Arc::new(AccountService::new(store, audit, settings.market.clone())),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    // Slash commands only need the guild gateway events.
    let intents = serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                discord::commands::market::market(),
                discord::commands::admin::admin(),
            ],
            on_error: |error| Box::pin(on_error(error)),
            pre_command: |ctx| {
                Box::pin(async move {
                    tracing::debug!(
                        command = %ctx.command().qualified_name,
                        user_id = ctx.author().id.get(),
                        "Running command"
                    );
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("🤖 Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("✅ Commands registered, bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&settings.discord_token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
