// Discord commands for the skin market.
//
// 1. Resolve the caller through the account service
// 2. Call the listing, transfer or favorites service
// 3. Render the result (declines become an ephemeral embed)

use super::common::{
    current_user, join_lines, listing_line, or_decline, Context, Error, COLOR_MARKET,
    COLOR_SUCCESS, COLOR_WARNING,
};
use crate::core::market::{format_cents, parse_cents, ListingStatus, MarketError};
use poise::serenity_prelude as serenity;
use std::time::Duration;

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Browse, buy and sell skins.
#[poise::command(
    slash_command,
    subcommands(
        "browse",
        "sell",
        "unlist",
        "buy",
        "favorite",
        "favorites",
        "profile",
        "history"
    )
)]
pub async fn market(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show every skin currently for sale.
#[poise::command(slash_command)]
pub async fn browse(ctx: Context<'_>) -> Result<(), Error> {
    let viewer = current_user(ctx).await?;
    let result = ctx.data().listings.active_listings(Some(&viewer)).await;
    let Some(listings) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let count = listings.len();
    let embed = serenity::CreateEmbed::new()
        .title("🛒 Skin Market")
        .description(join_lines(
            listings.iter().map(listing_line),
            "Nothing is for sale right now.",
        ))
        .color(COLOR_MARKET)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "{} listing(s) · Use /market buy <skin_id> to purchase",
            count
        )));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Put one of your skins up for sale.
#[poise::command(slash_command)]
pub async fn sell(
    ctx: Context<'_>,
    #[description = "Skin id from your profile"] skin_id: u64,
    #[description = "Asking price, e.g. 12.50"] price: String,
) -> Result<(), Error> {
    let seller = current_user(ctx).await?;
    let price = match parse_cents(&price) {
        Some(cents) => cents,
        None => {
            ctx.send(
                poise::CreateReply::default()
                    .content(format!("`{}` is not a valid price. Try something like `12.50`.", price))
                    .ephemeral(true),
            )
            .await?;
            return Ok(());
        }
    };

    let result = ctx.data().listings.create_listing(skin_id, &seller, price).await;
    let Some(listing) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let embed = serenity::CreateEmbed::new()
        .title("✅ Listed for Sale")
        .description(format!(
            "Skin `#{}` is now on the market for 🪙 **{}**.",
            listing.skin_id,
            format_cents(listing.price)
        ))
        .color(COLOR_SUCCESS)
        .footer(serenity::CreateEmbedFooter::new(
            "Changed your mind? Use /market unlist",
        ));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Take your skin off the market.
#[poise::command(slash_command)]
pub async fn unlist(
    ctx: Context<'_>,
    #[description = "Skin id of the listing"] skin_id: u64,
) -> Result<(), Error> {
    let caller = current_user(ctx).await?;
    let result = ctx.data().listings.remove_listing(skin_id, &caller).await;
    if or_decline(ctx, result).await?.is_none() {
        return Ok(());
    }

    ctx.say(format!("✅ Skin `#{}` is no longer for sale.", skin_id))
        .await?;
    Ok(())
}

/// Buy a listed skin. Shows the price and asks for confirmation first.
#[poise::command(slash_command)]
pub async fn buy(
    ctx: Context<'_>,
    #[description = "Skin id of the listing"] skin_id: u64,
) -> Result<(), Error> {
    let buyer = current_user(ctx).await?;
    let result = ctx.data().transfers.preview_purchase(skin_id, &buyer).await;
    let Some(preview) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let affordable = preview.buyer_balance >= preview.price;
    let embed = serenity::CreateEmbed::new()
        .title(format!("🧾 Buy {}?", preview.name))
        .color(if affordable { COLOR_MARKET } else { COLOR_WARNING })
        .field("Price", format!("🪙 {}", format_cents(preview.price)), true)
        .field("Seller", format!("<@{}>", preview.seller_id), true)
        .field(
            "Your Balance",
            format!("🪙 {}", format_cents(preview.buyer_balance)),
            true,
        )
        .footer(serenity::CreateEmbedFooter::new(
            "This offer expires in 60 seconds",
        ));

    let components = vec![serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new("market_confirm")
            .label("Confirm")
            .style(serenity::ButtonStyle::Success)
            .disabled(!affordable),
        serenity::CreateButton::new("market_cancel")
            .label("Cancel")
            .style(serenity::ButtonStyle::Secondary),
    ])];

    let reply = ctx
        .send(
            poise::CreateReply::default()
                .embed(embed)
                .components(components)
                .ephemeral(true),
        )
        .await?;
    let msg_id = reply.message().await?.id;

    let interaction = serenity::ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(CONFIRM_TIMEOUT)
        .filter(move |mci| mci.message.id == msg_id)
        .await;

    let Some(mci) = interaction else {
        let expired = serenity::CreateEmbed::new()
            .title("⏰ Purchase Expired")
            .description("No confirmation received. Nothing was charged.")
            .color(COLOR_WARNING);
        reply
            .edit(
                ctx,
                poise::CreateReply::default()
                    .embed(expired)
                    .components(vec![]),
            )
            .await?;
        return Ok(());
    };

    if let Err(e) = mci.defer(ctx.http()).await {
        tracing::warn!("Error deferring interaction: {:?}", e);
    }

    if mci.data.custom_id != "market_confirm" {
        let cancelled = serenity::CreateEmbed::new()
            .title("Purchase Cancelled")
            .color(COLOR_MARKET);
        reply
            .edit(
                ctx,
                poise::CreateReply::default()
                    .embed(cancelled)
                    .components(vec![]),
            )
            .await?;
        return Ok(());
    }

    // The engine re-checks everything against the store.
    // Buy at the price shown in the confirmation, not whatever it is now.
    let outcome = ctx
        .data()
        .transfers
        .execute_purchase(skin_id, &buyer, preview.price)
        .await;
    let done = match outcome {
        Ok(tx) => serenity::CreateEmbed::new()
            .title("✅ Purchase Complete")
            .description(format!(
                "You bought **{}** for 🪙 **{}**.",
                preview.name,
                format_cents(tx.price)
            ))
            .color(COLOR_SUCCESS)
            .footer(serenity::CreateEmbedFooter::new(format!(
                "Transaction #{}",
                tx.id
            ))),
        Err(err) if err.is_declined() => serenity::CreateEmbed::new()
            .title("❌ Purchase Failed")
            .description(decline_hint(&err))
            .color(COLOR_WARNING),
        Err(err) => return Err(err.into()),
    };

    reply
        .edit(
            ctx,
            poise::CreateReply::default()
                .embed(done)
                .components(vec![]),
        )
        .await?;
    Ok(())
}

fn decline_hint(err: &MarketError) -> String {
    match err {
        MarketError::ListingNotFound { .. } => {
            "Someone else got there first, or the seller took it off the market.".to_string()
        }
        MarketError::InsufficientFunds {
            required,
            available,
        } => format!(
            "You need 🪙 **{}** but only have 🪙 **{}**.",
            format_cents(*required),
            format_cents(*available)
        ),
        MarketError::PriceChanged { current, .. } => format!(
            "The seller changed the price to 🪙 **{}**. Nothing was charged, run `/market buy` again to see the new offer.",
            format_cents(*current)
        ),
        other => other.to_string(),
    }
}

/// Add or remove a skin from your favorites.
#[poise::command(slash_command)]
pub async fn favorite(
    ctx: Context<'_>,
    #[description = "Skin id"] skin_id: u64,
) -> Result<(), Error> {
    let user = current_user(ctx).await?;
    let result = ctx.data().favorites.toggle_favorite(user.id, skin_id).await;
    let Some(now_favorite) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let message = if now_favorite {
        format!("⭐ Skin `#{}` added to your favorites.", skin_id)
    } else {
        format!("Skin `#{}` removed from your favorites.", skin_id)
    };
    ctx.send(poise::CreateReply::default().content(message).ephemeral(true))
        .await?;
    Ok(())
}

/// Your favorite skins that are currently for sale.
#[poise::command(slash_command)]
pub async fn favorites(ctx: Context<'_>) -> Result<(), Error> {
    let user = current_user(ctx).await?;
    let result = ctx.data().favorites.favorite_listings(user.id).await;
    let Some(listings) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let embed = serenity::CreateEmbed::new()
        .title("⭐ Favorites on Sale")
        .description(join_lines(
            listings.iter().map(listing_line),
            "None of your favorites are for sale right now.",
        ))
        .color(COLOR_MARKET);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Show a balance, owned skins and recent trades.
#[poise::command(slash_command)]
pub async fn profile(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    // Registers the caller on first use so their own profile always exists.
    current_user(ctx).await?;
    let target = user.as_ref().unwrap_or_else(|| ctx.author());
    let target_id = target.id.get();

    let result = ctx.data().accounts.profile(target_id).await;
    let Some(profile) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let skins = join_lines(
        profile.skins.iter().map(|s| {
            let tag = if s.is_for_sale { " 🏷️ for sale" } else { "" };
            format!(
                "`#{}` **{}** · 🪙 {}{}",
                s.skin_id,
                s.name,
                format_cents(s.price),
                tag
            )
        }),
        "No skins yet",
    );

    let trades = join_lines(
        profile.recent_transactions.iter().map(|t| {
            let (verb, sign) = if t.buyer_id == target_id {
                ("Bought", "-")
            } else {
                ("Sold", "+")
            };
            format!(
                "{} `#{}` {}{} 🪙 <t:{}:R>",
                verb,
                t.skin_id,
                sign,
                format_cents(t.price),
                t.created_at.timestamp()
            )
        }),
        "No trades yet",
    );

    let mut embed = serenity::CreateEmbed::new()
        .title(format!("💼 {}'s Profile", profile.user.username))
        .color(0xFFD700) // Gold
        .thumbnail(target.face())
        .field(
            "Balance",
            format!("🪙 **{}**", format_cents(profile.user.balance)),
            true,
        )
        .field("Skins", profile.skins.len().to_string(), true);
    if profile.user.is_admin {
        embed = embed.field("Role", "🛡️ Admin", true);
    }
    embed = embed
        .field("Inventory", truncate_field(skins), false)
        .field("Recent Trades", truncate_field(trades), false);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Every listing ever opened for a skin.
#[poise::command(slash_command)]
pub async fn history(
    ctx: Context<'_>,
    #[description = "Skin id"] skin_id: u64,
) -> Result<(), Error> {
    let result = ctx.data().listings.listing_history(skin_id).await;
    let Some(listings) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let lines = listings.iter().map(|l| {
        let status = match l.status {
            ListingStatus::Active => "🟢 active",
            ListingStatus::Sold => "💸 sold",
            ListingStatus::Cancelled => "⚪ cancelled",
        };
        format!(
            "{} · 🪙 {} by <@{}> <t:{}:d>",
            status,
            format_cents(l.price),
            l.seller_id,
            l.created_at.timestamp()
        )
    });

    let embed = serenity::CreateEmbed::new()
        .title(format!("📜 Listing History for #{}", skin_id))
        .description(join_lines(lines, "This skin has never been listed."))
        .color(COLOR_MARKET);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Embed field values are capped at 1024 characters.
fn truncate_field(mut value: String) -> String {
    const FIELD_LIMIT: usize = 1000;
    if value.len() > FIELD_LIMIT {
        let mut cut = FIELD_LIMIT;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
        value.push('…');
    }
    value
}
