// In-memory implementation of MarketStore.
//
// All tables live behind a single mutex, so every trait method observes and
// mutates one consistent snapshot. Multi-table operations validate first and
// only then write, which makes them all-or-nothing without a rollback path.

use crate::core::market::{
    Cents, FavoriteRecord, InventoryRecord, InventoryStatus, Listing, ListingStatus, ListingView,
    MarketError, MarketStore, OwnedSkin, PurchaseOrder, Skin, TransactionRecord, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MarketState {
    users: BTreeMap<u64, User>,
    skins: BTreeMap<u64, Skin>,
    /// skin_id -> inventory row (one owner per skin)
    inventory: BTreeMap<u64, InventoryRecord>,
    listings: Vec<Listing>,
    favorites: HashSet<FavoriteRecord>,
    transactions: Vec<TransactionRecord>,
    next_skin_id: u64,
}

impl MarketState {
    fn active_listing_mut(&mut self, skin_id: u64) -> Option<&mut Listing> {
        self.listings
            .iter_mut()
            .find(|l| l.skin_id == skin_id && l.status == ListingStatus::Active)
    }

    fn view(&self, listing: &Listing) -> Option<ListingView> {
        let skin = self.skins.get(&listing.skin_id)?;
        let owner = self.inventory.get(&listing.skin_id)?;
        Some(ListingView {
            skin_id: listing.skin_id,
            name: skin.name.clone(),
            price: listing.price,
            seller_id: owner.user_id,
            is_owned_by_user: false,
            is_favorite: false,
        })
    }

    fn active_views(&self) -> Vec<ListingView> {
        self.listings
            .iter()
            .filter(|l| l.status == ListingStatus::Active)
            .filter_map(|l| self.view(l))
            .collect()
    }
}

/// Shared in-memory store. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryMarketStore {
    state: Arc<Mutex<MarketState>>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_favorite(&self, user_id: u64, skin_id: u64) -> bool {
        self.state
            .lock()
            .map(|state| state.favorites.contains(&FavoriteRecord { user_id, skin_id }))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MarketState>, MarketError> {
        self.state
            .lock()
            .map_err(|_| MarketError::Storage("market state lock poisoned".to_string()))
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn ensure_user(
        &self,
        user_id: u64,
        username: &str,
        starting_balance: Cents,
    ) -> Result<User, MarketError> {
        let mut state = self.lock()?;
        let user = state.users.entry(user_id).or_insert_with(|| User {
            id: user_id,
            username: username.to_string(),
            balance: starting_balance,
            is_admin: false,
        });
        // Display names change; the balance only starts once.
        user.username = username.to_string();
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: u64) -> Result<Option<User>, MarketError> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, MarketError> {
        Ok(self.lock()?.users.values().cloned().collect())
    }

    async fn set_balance(&self, user_id: u64, balance: Cents) -> Result<bool, MarketError> {
        let mut state = self.lock()?;
        match state.users.get_mut(&user_id) {
            Some(user) => {
                user.balance = balance;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_admin(&self, user_id: u64, is_admin: bool) -> Result<(), MarketError> {
        let mut state = self.lock()?;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.is_admin = is_admin;
        }
        Ok(())
    }

    async fn create_skin(&self, name: &str, price: Cents) -> Result<Skin, MarketError> {
        let mut state = self.lock()?;
        state.next_skin_id += 1;
        let skin = Skin {
            id: state.next_skin_id,
            name: name.to_string(),
            price,
        };
        state.skins.insert(skin.id, skin.clone());
        Ok(skin)
    }

    async fn get_skin(&self, skin_id: u64) -> Result<Option<Skin>, MarketError> {
        Ok(self.lock()?.skins.get(&skin_id).cloned())
    }

    async fn grant_skin(
        &self,
        skin_id: u64,
        user_id: u64,
    ) -> Result<InventoryRecord, MarketError> {
        let mut state = self.lock()?;
        if !state.skins.contains_key(&skin_id) {
            return Err(MarketError::NotFound(format!("skin {}", skin_id)));
        }
        if !state.users.contains_key(&user_id) {
            return Err(MarketError::NotFound(format!("user {}", user_id)));
        }
        if state.inventory.contains_key(&skin_id) {
            return Err(MarketError::AlreadyOwned { skin_id });
        }

        let record = InventoryRecord {
            skin_id,
            user_id,
            status: None,
        };
        state.inventory.insert(skin_id, record.clone());
        Ok(record)
    }

    async fn get_inventory_record(
        &self,
        skin_id: u64,
    ) -> Result<Option<InventoryRecord>, MarketError> {
        Ok(self.lock()?.inventory.get(&skin_id).cloned())
    }

    async fn user_inventory(&self, user_id: u64) -> Result<Vec<OwnedSkin>, MarketError> {
        let state = self.lock()?;
        let owned = state
            .inventory
            .values()
            .filter(|record| record.user_id == user_id)
            .filter_map(|record| {
                let skin = state.skins.get(&record.skin_id)?;
                let listed_price = state
                    .listings
                    .iter()
                    .find(|l| l.skin_id == record.skin_id && l.status == ListingStatus::Active)
                    .map(|l| l.price);
                Some(OwnedSkin {
                    skin_id: skin.id,
                    name: skin.name.clone(),
                    price: listed_price.unwrap_or(skin.price),
                    is_for_sale: record.status == Some(InventoryStatus::ForSale),
                })
            })
            .collect();
        Ok(owned)
    }

    async fn active_listing(&self, skin_id: u64) -> Result<Option<ListingView>, MarketError> {
        let state = self.lock()?;
        Ok(state
            .listings
            .iter()
            .find(|l| l.skin_id == skin_id && l.status == ListingStatus::Active)
            .and_then(|l| state.view(l)))
    }

    async fn active_listings(&self) -> Result<Vec<ListingView>, MarketError> {
        Ok(self.lock()?.active_views())
    }

    async fn listing_history(&self, skin_id: u64) -> Result<Vec<Listing>, MarketError> {
        let state = self.lock()?;
        Ok(state
            .listings
            .iter()
            .rev()
            .filter(|l| l.skin_id == skin_id)
            .cloned()
            .collect())
    }

    async fn open_listing(
        &self,
        skin_id: u64,
        seller_id: u64,
        price: Cents,
    ) -> Result<Listing, MarketError> {
        let mut state = self.lock()?;
        let owner = state
            .inventory
            .get(&skin_id)
            .map(|record| record.user_id)
            .ok_or_else(|| MarketError::NotFound(format!("inventory record for skin {}", skin_id)))?;
        if owner != seller_id {
            return Err(MarketError::NotOwner { skin_id });
        }
        if state.active_listing_mut(skin_id).is_some() {
            return Err(MarketError::AlreadyListed { skin_id });
        }

        let listing = Listing {
            id: state.listings.len() as u64 + 1,
            skin_id,
            seller_id,
            price,
            status: ListingStatus::Active,
            created_at: Utc::now(),
            closed_at: None,
        };
        state.listings.push(listing.clone());
        if let Some(record) = state.inventory.get_mut(&skin_id) {
            record.status = Some(InventoryStatus::ForSale);
        }
        Ok(listing)
    }

    async fn cancel_listing(
        &self,
        skin_id: u64,
        required_owner: Option<u64>,
    ) -> Result<Listing, MarketError> {
        let mut state = self.lock()?;
        if state.active_listing_mut(skin_id).is_none() {
            return Err(MarketError::ListingNotFound { skin_id });
        }
        let owner = state.inventory.get(&skin_id).map(|record| record.user_id);
        if let Some(required) = required_owner {
            if owner != Some(required) {
                return Err(MarketError::Forbidden(format!(
                    "skin {} belongs to another user",
                    skin_id
                )));
            }
        }

        let listing = match state.active_listing_mut(skin_id) {
            Some(listing) => {
                listing.status = ListingStatus::Cancelled;
                listing.closed_at = Some(Utc::now());
                listing.clone()
            }
            None => return Err(MarketError::ListingNotFound { skin_id }),
        };
        if let Some(record) = state.inventory.get_mut(&skin_id) {
            record.status = None;
        }
        Ok(listing)
    }

    async fn settle_purchase(
        &self,
        order: PurchaseOrder,
    ) -> Result<TransactionRecord, MarketError> {
        let mut state = self.lock()?;
        let skin_id = order.skin_id;

        // Validate everything before the first write.
        let still_listed = state
            .listings
            .iter()
            .any(|l| l.skin_id == skin_id && l.status == ListingStatus::Active && l.price == order.price);
        let owner = state.inventory.get(&skin_id).map(|record| record.user_id);
        if !still_listed || owner != Some(order.seller_id) {
            return Err(MarketError::ListingNotFound { skin_id });
        }
        let available = state
            .users
            .get(&order.buyer_id)
            .map(|u| u.balance)
            .ok_or_else(|| MarketError::NotFound(format!("user {}", order.buyer_id)))?;
        if available < order.price {
            return Err(MarketError::InsufficientFunds {
                required: order.price,
                available,
            });
        }
        let seller_balance = state
            .users
            .get(&order.seller_id)
            .map(|u| u.balance)
            .ok_or_else(|| MarketError::NotFound(format!("user {}", order.seller_id)))?;
        // A self-trade debits before it credits, so it cannot overflow.
        if order.seller_id != order.buyer_id && seller_balance.checked_add(order.price).is_none() {
            return Err(MarketError::BalanceOverflow {
                user_id: order.seller_id,
            });
        }

        let now = Utc::now();
        if let Some(listing) = state.active_listing_mut(skin_id) {
            listing.status = ListingStatus::Sold;
            listing.closed_at = Some(now);
        }
        if let Some(buyer) = state.users.get_mut(&order.buyer_id) {
            buyer.balance -= order.price;
        }
        if let Some(seller) = state.users.get_mut(&order.seller_id) {
            seller.balance += order.price;
        }
        if let Some(record) = state.inventory.get_mut(&skin_id) {
            record.user_id = order.buyer_id;
            record.status = None;
        }

        let transaction = TransactionRecord {
            id: state.transactions.len() as u64 + 1,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            skin_id,
            price: order.price,
            created_at: now,
        };
        state.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn toggle_favorite(&self, favorite: FavoriteRecord) -> Result<bool, MarketError> {
        let mut state = self.lock()?;
        if state.favorites.remove(&favorite) {
            Ok(false)
        } else {
            Ok(state.favorites.insert(favorite))
        }
    }

    async fn favorite_listings(&self, user_id: u64) -> Result<Vec<ListingView>, MarketError> {
        let state = self.lock()?;
        Ok(state
            .active_views()
            .into_iter()
            .filter(|view| {
                state.favorites.contains(&FavoriteRecord {
                    user_id,
                    skin_id: view.skin_id,
                })
            })
            .collect())
    }

    async fn transactions_for_user(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, MarketError> {
        let state = self.lock()?;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.buyer_id == user_id || t.seller_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_user_keeps_existing_balance() {
        let store = InMemoryMarketStore::new();

        let user = store.ensure_user(1, "alice", 500).await.unwrap();
        assert_eq!(user.balance, 500);

        store.set_balance(1, 20).await.unwrap();
        let user = store.ensure_user(1, "alice", 500).await.unwrap();
        assert_eq!(user.balance, 20);
    }

    #[tokio::test]
    async fn test_grant_skin_twice_fails() {
        let store = InMemoryMarketStore::new();
        store.ensure_user(1, "alice", 0).await.unwrap();
        store.ensure_user(2, "bob", 0).await.unwrap();
        let skin = store.create_skin("AK-47 | Redline", 1500).await.unwrap();

        store.grant_skin(skin.id, 1).await.unwrap();
        let err = store.grant_skin(skin.id, 2).await.unwrap_err();
        assert_eq!(err, MarketError::AlreadyOwned { skin_id: skin.id });
    }

    #[tokio::test]
    async fn test_stale_order_is_rejected_without_writes() {
        let store = InMemoryMarketStore::new();
        store.ensure_user(1, "seller", 0).await.unwrap();
        store.ensure_user(2, "buyer", 1000).await.unwrap();
        let skin = store.create_skin("Glock | Fade", 300).await.unwrap();
        store.grant_skin(skin.id, 1).await.unwrap();
        store.open_listing(skin.id, 1, 400).await.unwrap();

        // Ordered at an outdated price.
        let err = store
            .settle_purchase(PurchaseOrder {
                skin_id: skin.id,
                buyer_id: 2,
                seller_id: 1,
                price: 300,
            })
            .await
            .unwrap_err();
        assert_eq!(err, MarketError::ListingNotFound { skin_id: skin.id });

        assert_eq!(store.get_user(2).await.unwrap().unwrap().balance, 1000);
        assert!(store.active_listing(skin.id).await.unwrap().is_some());
        assert!(store.transactions_for_user(2, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seller_balance_overflow_is_rejected_without_writes() {
        let store = InMemoryMarketStore::new();
        store.ensure_user(1, "seller", i64::MAX - 10).await.unwrap();
        store.ensure_user(2, "buyer", 5_000).await.unwrap();
        let skin = store.create_skin("M4A4 | Howl", 1_000).await.unwrap();
        store.grant_skin(skin.id, 1).await.unwrap();
        store.open_listing(skin.id, 1, 1_000).await.unwrap();

        let err = store
            .settle_purchase(PurchaseOrder {
                skin_id: skin.id,
                buyer_id: 2,
                seller_id: 1,
                price: 1_000,
            })
            .await
            .unwrap_err();
        assert_eq!(err, MarketError::BalanceOverflow { user_id: 1 });

        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, i64::MAX - 10);
        assert_eq!(store.get_user(2).await.unwrap().unwrap().balance, 5_000);
        assert!(store.active_listing(skin.id).await.unwrap().is_some());
        assert!(store.transactions_for_user(2, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_favorite_flips_pair() {
        let store = InMemoryMarketStore::new();
        let pair = FavoriteRecord {
            user_id: 1,
            skin_id: 3,
        };

        assert!(store.toggle_favorite(pair.clone()).await.unwrap());
        assert!(store.is_favorite(1, 3));
        assert!(!store.toggle_favorite(pair).await.unwrap());
        assert!(!store.is_favorite(1, 3));
    }
}
