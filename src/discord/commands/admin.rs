// Admin commands for the skin market.
//
// Authorization is the account's admin flag, checked by the core services,
// not Discord guild permissions.

use super::common::{
    current_user, join_lines, or_decline, Context, Error, COLOR_MARKET, COLOR_SUCCESS,
};
use crate::core::market::{format_cents, parse_cents};
use poise::serenity_prelude as serenity;

const AUDIT_PAGE: usize = 15;

/// Market administration.
#[poise::command(
    slash_command,
    subcommands("set_balance", "unlist", "add_skin", "grant", "users", "audit")
)]
pub async fn admin(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

async fn reply_invalid_amount(ctx: Context<'_>, raw: &str) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(format!("`{}` is not a valid amount. Try something like `12.50`.", raw))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Overwrite a user's balance.
#[poise::command(slash_command)]
pub async fn set_balance(
    ctx: Context<'_>,
    #[description = "User to update"] user: serenity::User,
    #[description = "New balance, e.g. 100.00"] amount: String,
) -> Result<(), Error> {
    let caller = current_user(ctx).await?;
    let Some(balance) = parse_cents(&amount) else {
        return reply_invalid_amount(ctx, &amount).await;
    };

    let result = ctx
        .data()
        .accounts
        .set_balance(&caller, user.id.get(), balance)
        .await;
    if or_decline(ctx, result).await?.is_none() {
        return Ok(());
    }

    ctx.say(format!(
        "✅ Set <@{}>'s balance to 🪙 **{}**.",
        user.id,
        format_cents(balance)
    ))
    .await?;
    Ok(())
}

/// Remove any listing from the market.
#[poise::command(slash_command)]
pub async fn unlist(
    ctx: Context<'_>,
    #[description = "Skin id of the listing"] skin_id: u64,
) -> Result<(), Error> {
    let caller = current_user(ctx).await?;
    if !caller.is_admin {
        // Non-admins remove their own listings with /market unlist.
        ctx.send(
            poise::CreateReply::default()
                .content("❌ This command is for market admins.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let result = ctx.data().listings.remove_listing(skin_id, &caller).await;
    let Some(listing) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    ctx.say(format!(
        "✅ Removed the listing for skin `#{}` (seller <@{}>).",
        listing.skin_id, listing.seller_id
    ))
    .await?;
    Ok(())
}

/// Add a skin to the catalog.
#[poise::command(slash_command)]
pub async fn add_skin(
    ctx: Context<'_>,
    #[description = "Display name"] name: String,
    #[description = "Reference price, e.g. 12.50"] price: String,
) -> Result<(), Error> {
    let caller = current_user(ctx).await?;
    let Some(price) = parse_cents(&price) else {
        return reply_invalid_amount(ctx, &price).await;
    };

    let result = ctx.data().accounts.create_skin(&caller, &name, price).await;
    let Some(skin) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let embed = serenity::CreateEmbed::new()
        .title("🆕 Skin Added")
        .color(COLOR_SUCCESS)
        .field("Id", format!("`#{}`", skin.id), true)
        .field("Name", skin.name, true)
        .field("Price", format!("🪙 {}", format_cents(skin.price)), true)
        .footer(serenity::CreateEmbedFooter::new(
            "Use /admin grant to give it to someone",
        ));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Give an unowned skin to a user.
#[poise::command(slash_command)]
pub async fn grant(
    ctx: Context<'_>,
    #[description = "Skin id"] skin_id: u64,
    #[description = "New owner"] user: serenity::User,
) -> Result<(), Error> {
    let caller = current_user(ctx).await?;
    // Non-admins are refused before the recipient gets an account.
    let result = ctx
        .data()
        .accounts
        .grant_skin_to(&caller, skin_id, user.id.get(), &user.name)
        .await;
    if or_decline(ctx, result).await?.is_none() {
        return Ok(());
    }

    ctx.say(format!("✅ Skin `#{}` now belongs to <@{}>.", skin_id, user.id))
        .await?;
    Ok(())
}

/// List every market account.
#[poise::command(slash_command)]
pub async fn users(ctx: Context<'_>) -> Result<(), Error> {
    let caller = current_user(ctx).await?;
    let result = ctx.data().accounts.list_users(&caller).await;
    let Some(users) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let count = users.len();
    let lines = users.into_iter().map(|u| {
        let badge = if u.is_admin { " 🛡️" } else { "" };
        format!(
            "<@{}> **{}**{} · 🪙 {}",
            u.id,
            u.username,
            badge,
            format_cents(u.balance)
        )
    });

    let embed = serenity::CreateEmbed::new()
        .title("👥 Market Users")
        .description(join_lines(lines, "No users yet."))
        .color(COLOR_MARKET)
        .footer(serenity::CreateEmbedFooter::new(format!("{} user(s)", count)));

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Recent audit history for a user.
#[poise::command(slash_command)]
pub async fn audit(
    ctx: Context<'_>,
    #[description = "User to inspect"] user: serenity::User,
) -> Result<(), Error> {
    let caller = current_user(ctx).await?;
    let result = ctx
        .data()
        .accounts
        .audit_history(&caller, user.id.get(), AUDIT_PAGE)
        .await;
    let Some(entries) = or_decline(ctx, result).await? else {
        return Ok(());
    };

    let lines = entries.iter().map(|e| {
        format!(
            "<t:{}:f> `{}` {}",
            e.created_at.timestamp(),
            e.action.as_str(),
            e.description
        )
    });

    let embed = serenity::CreateEmbed::new()
        .title(format!("📋 Audit History for {}", user.name))
        .description(join_lines(lines, "No recorded actions."))
        .color(COLOR_MARKET)
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}
