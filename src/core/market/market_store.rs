// Market ports: errors, configuration and the storage trait.
//
// The services in this module only talk to persistence through `MarketStore`.
// Anything that has to be atomic across several tables is a single trait
// method, so each implementation decides how to make it all-or-nothing.

use super::market_models::{
    Cents, FavoriteRecord, InventoryRecord, Listing, ListingView, OwnedSkin, PurchaseOrder, Skin,
    TransactionRecord, User,
};
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Skin {skin_id} is not listed for sale")]
    ListingNotFound { skin_id: u64 },

    #[error("You do not own skin {skin_id}")]
    NotOwner { skin_id: u64 },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Insufficient funds: need {required} cents, but only have {available}")]
    InsufficientFunds { required: Cents, available: Cents },

    #[error("Skin {skin_id} is already listed for sale")]
    AlreadyListed { skin_id: u64 },

    #[error("Skin {skin_id} already has an owner")]
    AlreadyOwned { skin_id: u64 },

    #[error("You cannot buy your own listing")]
    SelfTrade,

    #[error("The price of skin {skin_id} changed from {expected} to {current} cents")]
    PriceChanged {
        skin_id: u64,
        expected: Cents,
        current: Cents,
    },

    #[error("Balance of user {user_id} would exceed the maximum amount")]
    BalanceOverflow { user_id: u64 },

    #[error("Invalid amount: {0}")]
    InvalidPrice(Cents),

    #[error("Name must not be empty")]
    EmptyName,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MarketError {
    /// Business declines are reported back to the caller with their reason;
    /// storage failures are not the caller's fault.
    pub fn is_declined(&self) -> bool {
        !matches!(self, MarketError::Storage(_))
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Cents credited to a user the first time they are seen.
    pub starting_balance: Cents,

    /// Discord ids that are promoted to admin on first contact.
    pub admin_ids: Vec<u64>,

    /// Whether a user may buy their own listing.
    pub allow_self_trade: bool,

    /// How many transactions a profile shows.
    pub history_limit: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            starting_balance: 0,
            admin_ids: Vec::new(),
            allow_self_trade: false,
            history_limit: 5,
        }
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Persistence for users, catalog, inventory, listings, favorites and the
/// transaction log.
///
/// Methods documented as atomic must either apply every write or none.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Get a user, creating it with `starting_balance` if it doesn't exist.
    async fn ensure_user(
        &self,
        user_id: u64,
        username: &str,
        starting_balance: Cents,
    ) -> Result<User, MarketError>;

    async fn get_user(&self, user_id: u64) -> Result<Option<User>, MarketError>;

    async fn list_users(&self) -> Result<Vec<User>, MarketError>;

    /// Overwrite a balance. Returns false if the user doesn't exist.
    async fn set_balance(&self, user_id: u64, balance: Cents) -> Result<bool, MarketError>;

    async fn set_admin(&self, user_id: u64, is_admin: bool) -> Result<(), MarketError>;

    async fn create_skin(&self, name: &str, price: Cents) -> Result<Skin, MarketError>;

    async fn get_skin(&self, skin_id: u64) -> Result<Option<Skin>, MarketError>;

    /// Give an unowned skin to a user. Fails with `AlreadyOwned` if the skin
    /// already has an inventory record.
    async fn grant_skin(&self, skin_id: u64, user_id: u64)
        -> Result<InventoryRecord, MarketError>;

    async fn get_inventory_record(
        &self,
        skin_id: u64,
    ) -> Result<Option<InventoryRecord>, MarketError>;

    /// Skins owned by a user with their effective price.
    async fn user_inventory(&self, user_id: u64) -> Result<Vec<OwnedSkin>, MarketError>;

    /// The active listing for a skin joined with its current owner.
    /// Caller-relative flags are left false.
    async fn active_listing(&self, skin_id: u64) -> Result<Option<ListingView>, MarketError>;

    /// All active listings. Caller-relative flags are left false.
    async fn active_listings(&self) -> Result<Vec<ListingView>, MarketError>;

    /// Every listing ever opened for a skin, newest first.
    async fn listing_history(&self, skin_id: u64) -> Result<Vec<Listing>, MarketError>;

    /// Atomically open a listing and flag the inventory row `for_sale`.
    ///
    /// Fails with `NotFound` if the skin has no inventory record, `NotOwner`
    /// if `seller_id` does not own it and `AlreadyListed` if an active listing
    /// exists.
    async fn open_listing(
        &self,
        skin_id: u64,
        seller_id: u64,
        price: Cents,
    ) -> Result<Listing, MarketError>;

    /// Atomically cancel the active listing and clear the inventory status.
    ///
    /// With `required_owner` set, the call fails with `Forbidden` unless that
    /// user owns the skin. Fails with `ListingNotFound` if nothing is listed.
    async fn cancel_listing(
        &self,
        skin_id: u64,
        required_owner: Option<u64>,
    ) -> Result<Listing, MarketError>;

    /// Atomically settle a purchase: mark the listing sold, move the funds,
    /// transfer ownership and append the transaction record.
    ///
    /// Fails with `ListingNotFound` if the listing is no longer active with
    /// the ordered price and seller, with `InsufficientFunds` if the buyer
    /// can no longer cover the price and with `BalanceOverflow` if the
    /// seller's balance cannot hold the credit. On failure nothing is written.
    async fn settle_purchase(&self, order: PurchaseOrder)
        -> Result<TransactionRecord, MarketError>;

    /// Atomically delete the pair if present, insert it otherwise.
    /// Returns whether the pair exists after the call.
    async fn toggle_favorite(&self, favorite: FavoriteRecord) -> Result<bool, MarketError>;

    /// Favorited skins that currently have an active listing.
    async fn favorite_listings(&self, user_id: u64) -> Result<Vec<ListingView>, MarketError>;

    /// Transactions where the user was buyer or seller, newest first.
    async fn transactions_for_user(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, MarketError>;
}
