// Domain models for the skin market.
//
// Plain data only: these types are what the stores hand back and what the
// Discord layer renders. Money is always an i64 amount of cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Money in minor units (cents).
pub type Cents = i64;

// ============================================================================
// ENTITIES
// ============================================================================

/// A marketplace account. The id is the caller's Discord user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub balance: Cents,
    pub is_admin: bool,
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skin {
    pub id: u64,
    pub name: String,
    pub price: Cents,
}

/// Status flag stored on an inventory row while the item is listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryStatus {
    ForSale,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::ForSale => "for_sale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "for_sale" => Some(InventoryStatus::ForSale),
            _ => None,
        }
    }
}

/// Binding of one skin to its current owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub skin_id: u64,
    pub user_id: u64,
    pub status: Option<InventoryStatus>,
}

/// Lifecycle of a listing: `Active -> Sold | Cancelled`.
///
/// Closed listings keep their row so the history of an item stays queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Active,
    Sold,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Sold => "sold",
            ListingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ListingStatus::Active),
            "sold" => Some(ListingStatus::Sold),
            "cancelled" => Some(ListingStatus::Cancelled),
            _ => None,
        }
    }
}

/// An offer to sell a specific inventory item at a fixed price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: u64,
    pub skin_id: u64,
    pub seller_id: u64,
    pub price: Cents,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub user_id: u64,
    pub skin_id: u64,
}

/// Append-only record of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub buyer_id: u64,
    pub seller_id: u64,
    pub skin_id: u64,
    pub price: Cents,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// The caller of an operation, resolved by the identity provider and passed
/// explicitly into every service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: u64,
    pub balance: Cents,
    pub is_admin: bool,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            balance: user.balance,
            is_admin: user.is_admin,
        }
    }
}

/// Everything the store needs to settle a purchase that the engine has
/// already validated. The store re-checks it under its own atomicity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    pub skin_id: u64,
    pub buyer_id: u64,
    pub seller_id: u64,
    pub price: Cents,
}

// ============================================================================
// READ MODELS
// ============================================================================

/// An active listing joined with its skin and current owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingView {
    pub skin_id: u64,
    pub name: String,
    pub price: Cents,
    pub seller_id: u64,
    pub is_owned_by_user: bool,
    pub is_favorite: bool,
}

/// A skin in a user's inventory, priced at its listing price when listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedSkin {
    pub skin_id: u64,
    pub name: String,
    pub price: Cents,
    pub is_for_sale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasePreview {
    pub skin_id: u64,
    pub name: String,
    pub price: Cents,
    pub seller_id: u64,
    pub buyer_balance: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user: User,
    pub skins: Vec<OwnedSkin>,
    pub recent_transactions: Vec<TransactionRecord>,
}

// ============================================================================
// MONEY HELPERS
// ============================================================================

/// Parse a user supplied amount such as `"12"`, `"12.5"` or `"12.50"`.
///
/// At most two fractional digits are accepted; anything else is `None`.
pub fn parse_cents(input: &str) -> Option<Cents> {
    let input = input.trim();
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > 2 || !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    let cents = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -cents } else { cents })
}

/// Format cents as a decimal amount with thousands separators, e.g. `1,234.50`.
pub fn format_cents(cents: Cents) -> String {
    let negative = cents < 0;
    let abs = cents.unsigned_abs();
    let whole = (abs / 100).to_string();

    let mut grouped = String::new();
    for (i, c) in whole.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.insert(0, ',');
        }
        grouped.insert(0, c);
    }

    format!(
        "{}{}.{:02}",
        if negative { "-" } else { "" },
        grouped,
        abs % 100
    )
}
