// Listing service - opening and closing sale listings, plus the browse views.
//
// Ownership and "one active listing per skin" are enforced by the store under
// its own atomicity; this layer adds price validation, the admin override and
// the audit trail.

use super::audit::{record_best_effort, AuditAction, AuditLog};
use super::market_models::{Cents, CurrentUser, Listing, ListingView};
use super::market_store::{MarketError, MarketStore};
use std::collections::HashSet;

pub struct ListingService<S: MarketStore, A: AuditLog> {
    store: S,
    audit: A,
}

impl<S: MarketStore, A: AuditLog> ListingService<S, A> {
    pub fn new(store: S, audit: A) -> Self {
        Self { store, audit }
    }

    /// Put a skin the caller owns up for sale.
    pub async fn create_listing(
        &self,
        skin_id: u64,
        seller: &CurrentUser,
        price: Cents,
    ) -> Result<Listing, MarketError> {
        if price <= 0 {
            return Err(MarketError::InvalidPrice(price));
        }

        let listing = self.store.open_listing(skin_id, seller.id, price).await?;
        tracing::info!(skin_id, seller_id = seller.id, price, "Skin listed for sale");

        record_best_effort(
            &self.audit,
            seller.id,
            AuditAction::Sell,
            format!("skin_id: {}, price: {}", skin_id, price),
        )
        .await;

        Ok(listing)
    }

    /// Take a listing down. Admins may remove any listing, everyone else only
    /// listings on skins they own.
    pub async fn remove_listing(
        &self,
        skin_id: u64,
        caller: &CurrentUser,
    ) -> Result<Listing, MarketError> {
        let required_owner = if caller.is_admin {
            None
        } else {
            Some(caller.id)
        };

        let listing = self.store.cancel_listing(skin_id, required_owner).await?;

        // Attribute the entry to whoever owns the skin, which differs from the
        // caller when an admin removes someone else's listing.
        let owner_id = match self.store.get_inventory_record(skin_id).await {
            Ok(Some(record)) => record.user_id,
            _ => listing.seller_id,
        };

        tracing::info!(
            skin_id,
            caller_id = caller.id,
            owner_id,
            by_admin = caller.is_admin,
            "Listing removed"
        );

        record_best_effort(
            &self.audit,
            owner_id,
            AuditAction::RemoveSell,
            format!("skin_id: {}", skin_id),
        )
        .await;

        Ok(listing)
    }

    /// All active listings, flagged relative to the viewer when there is one.
    pub async fn active_listings(
        &self,
        viewer: Option<&CurrentUser>,
    ) -> Result<Vec<ListingView>, MarketError> {
        let mut listings = self.store.active_listings().await?;

        if let Some(viewer) = viewer {
            let favorites: HashSet<u64> = self
                .store
                .favorite_listings(viewer.id)
                .await?
                .into_iter()
                .map(|view| view.skin_id)
                .collect();

            for listing in &mut listings {
                listing.is_owned_by_user = listing.seller_id == viewer.id;
                listing.is_favorite = favorites.contains(&listing.skin_id);
            }
        }

        Ok(listings)
    }

    /// Every listing ever opened for a skin, newest first.
    pub async fn listing_history(&self, skin_id: u64) -> Result<Vec<Listing>, MarketError> {
        if self.store.get_skin(skin_id).await?.is_none() {
            return Err(MarketError::NotFound(format!("skin {}", skin_id)));
        }
        self.store.listing_history(skin_id).await
    }
}
