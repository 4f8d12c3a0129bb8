// Shared command types and helpers for the market commands.
//
// Same shape as every command file: resolve the caller, call a core service,
// render the result. No business rules live here.

use crate::core::market::{
    format_cents, AccountService, CurrentUser, FavoritesService, ListingService, ListingView,
    MarketError, TransferEngine,
};
use crate::infra::market::{SqliteAuditLog, SqliteMarketStore};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Shared state handed to every command.
pub struct Data {
    pub listings: Arc<ListingService<SqliteMarketStore, SqliteAuditLog>>,
    pub transfers: Arc<TransferEngine<SqliteMarketStore, SqliteAuditLog>>,
    pub favorites: Arc<FavoritesService<SqliteMarketStore>>,
    pub accounts: Arc<AccountService<SqliteMarketStore, SqliteAuditLog>>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub const COLOR_MARKET: u32 = 0x5865F2; // Blurple
pub const COLOR_SUCCESS: u32 = 0x00FF00;
pub const COLOR_WARNING: u32 = 0xFFA500;
pub const COLOR_DECLINED: u32 = 0xFF0000;

/// Discord caps embed descriptions at 4096 characters.
const DESCRIPTION_LIMIT: usize = 4000;

/// Resolve the invoking Discord user into a market account.
pub async fn current_user(ctx: Context<'_>) -> Result<CurrentUser, Error> {
    let author = ctx.author();
    let user = ctx
        .data()
        .accounts
        .ensure_user(author.id.get(), &author.name)
        .await?;
    Ok(user)
}

/// Unwrap a service result, or tell the caller why their request was
/// declined. Storage failures are propagated to the framework's error handler.
pub async fn or_decline<T>(
    ctx: Context<'_>,
    result: Result<T, MarketError>,
) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_declined() => {
            tracing::warn!(
                command = %ctx.command().qualified_name,
                user_id = ctx.author().id.get(),
                "Request declined: {}",
                err
            );
            let embed = serenity::CreateEmbed::new()
                .title("❌ Request Declined")
                .description(err.to_string())
                .color(COLOR_DECLINED);
            ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
                .await?;
            Ok(None)
        }
        Err(err) => {
            tracing::error!(command = %ctx.command().qualified_name, "Market storage error: {}", err);
            Err(err.into())
        }
    }
}

/// One line per listing, e.g. "`#42` **AK-47 | Redline** · 12.50 by @seller ⭐".
pub fn listing_line(listing: &ListingView) -> String {
    let mut line = format!(
        "`#{}` **{}** · 🪙 {} by <@{}>",
        listing.skin_id,
        listing.name,
        format_cents(listing.price),
        listing.seller_id
    );
    if listing.is_favorite {
        line.push_str(" ⭐");
    }
    if listing.is_owned_by_user {
        line.push_str(" (yours)");
    }
    line
}

/// Join lines into an embed description, cutting off before Discord's limit.
pub fn join_lines(lines: impl IntoIterator<Item = String>, empty: &str) -> String {
    let mut out = String::new();
    for line in lines {
        if out.len() + line.len() + 1 > DESCRIPTION_LIMIT {
            out.push_str("…");
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    }
    if out.is_empty() {
        empty.to_string()
    } else {
        out
    }
}
