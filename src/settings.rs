// Runtime settings read from the environment (and `.env` via dotenv).

use crate::core::market::{parse_cents, Cents, MarketConfig};
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DATABASE_PATH: &str = "data/market.db";
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: String,
    pub database_path: String,
    pub busy_timeout: Duration,
    pub market: MarketConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Missing or malformed optional
    /// values fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.")?;

        let database_path = lookup("MARKET_DATABASE_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

        let busy_timeout = Duration::from_secs(parse_or(
            &lookup,
            "MARKET_BUSY_TIMEOUT_SECS",
            DEFAULT_BUSY_TIMEOUT_SECS,
        ));

        let defaults = MarketConfig::default();

        let starting_balance = match lookup("MARKET_STARTING_BALANCE") {
            Some(raw) => match parse_cents(&raw) {
                Some(cents) if cents >= 0 => cents,
                _ => {
                    tracing::warn!(value = %raw, "Invalid MARKET_STARTING_BALANCE, using default");
                    defaults.starting_balance
                }
            },
            None => defaults.starting_balance,
        };

        let admin_ids = lookup("MARKET_ADMIN_IDS")
            .map(|raw| parse_id_list(&raw))
            .unwrap_or_default();

        let market = MarketConfig {
            starting_balance,
            admin_ids,
            allow_self_trade: parse_or(&lookup, "MARKET_ALLOW_SELF_TRADE", defaults.allow_self_trade),
            history_limit: parse_or(&lookup, "MARKET_HISTORY_LIMIT", defaults.history_limit),
        };

        Ok(Self {
            discord_token,
            database_path,
            busy_timeout,
            market,
        })
    }

    pub fn starting_balance(&self) -> Cents {
        self.market.starting_balance
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid setting, using default");
            default
        }),
        None => default,
    }
}

fn parse_id_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = s, "Ignoring invalid admin id");
                None
            }
        })
        .collect()
}
