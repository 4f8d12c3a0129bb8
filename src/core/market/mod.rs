// Market module - domain logic for listing, buying and bookmarking skins.

mod account_service;
pub mod audit;
mod favorites_service;
mod listing_service;
mod market_models;
mod market_store;
mod transfer_engine;

pub use account_service::AccountService;
pub use audit::{AuditAction, AuditEntry, AuditLog};
pub use favorites_service::FavoritesService;
pub use listing_service::ListingService;
pub use market_models::{
    format_cents, parse_cents, Cents, CurrentUser, FavoriteRecord, InventoryRecord,
    InventoryStatus, Listing, ListingStatus, ListingView, OwnedSkin, PurchaseOrder, Skin,
    TransactionRecord, User,
};
pub use market_store::{MarketConfig, MarketError, MarketStore};
pub use transfer_engine::TransferEngine;
