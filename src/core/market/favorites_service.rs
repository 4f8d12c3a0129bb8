use super::market_models::{FavoriteRecord, ListingView};
use super::market_store::{MarketError, MarketStore};

/// Bookmarks between users and skins.
pub struct FavoritesService<S: MarketStore> {
    store: S,
}

impl<S: MarketStore> FavoritesService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Flip the bookmark for a skin. Returns whether it is a favorite now.
    pub async fn toggle_favorite(&self, user_id: u64, skin_id: u64) -> Result<bool, MarketError> {
        if self.store.get_skin(skin_id).await?.is_none() {
            return Err(MarketError::NotFound(format!("skin {}", skin_id)));
        }

        self.store
            .toggle_favorite(FavoriteRecord { user_id, skin_id })
            .await
    }

    /// Favorited skins that are currently for sale.
    pub async fn favorite_listings(&self, user_id: u64) -> Result<Vec<ListingView>, MarketError> {
        let mut listings = self.store.favorite_listings(user_id).await?;
        for listing in &mut listings {
            listing.is_favorite = true;
            listing.is_owned_by_user = listing.seller_id == user_id;
        }
        Ok(listings)
    }
}
