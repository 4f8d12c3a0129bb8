// Transfer engine - the buy side of the market.
//
// A purchase is validated here against the current listing and the buyer's
// balance, then handed to the store as a `PurchaseOrder`. The store settles
// the order in one atomic unit and re-checks it, so a listing that was sold
// or repriced in between is reported as `ListingNotFound` instead of being
// bought twice or at a stale price. The buyer also names the price they
// confirmed, and a listing that no longer asks that price is declined with
// `PriceChanged`.

use super::audit::{record_best_effort, AuditAction, AuditLog};
use super::market_models::{
    Cents, CurrentUser, PurchaseOrder, PurchasePreview, TransactionRecord,
};
use super::market_store::{MarketConfig, MarketError, MarketStore};

pub struct TransferEngine<S: MarketStore, A: AuditLog> {
    store: S,
    audit: A,
    config: MarketConfig,
}

impl<S: MarketStore, A: AuditLog> TransferEngine<S, A> {
    pub fn new(store: S, audit: A, config: MarketConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// What the buyer is about to pay for, without changing anything.
    pub async fn preview_purchase(
        &self,
        skin_id: u64,
        buyer: &CurrentUser,
    ) -> Result<PurchasePreview, MarketError> {
        let listing = self
            .store
            .active_listing(skin_id)
            .await?
            .ok_or(MarketError::ListingNotFound { skin_id })?;
        let buyer_balance = self.buyer_balance(buyer.id).await?;

        Ok(PurchasePreview {
            skin_id,
            name: listing.name,
            price: listing.price,
            seller_id: listing.seller_id,
            buyer_balance,
        })
    }

    /// Buy the active listing for `skin_id` at `expected_price`, the price
    /// the buyer was shown and agreed to.
    ///
    /// On success the buyer has paid the listing price to the current owner,
    /// owns the skin, the listing is closed as sold and exactly one
    /// transaction record exists for the transfer. On any error nothing has
    /// changed.
    pub async fn execute_purchase(
        &self,
        skin_id: u64,
        buyer: &CurrentUser,
        expected_price: Cents,
    ) -> Result<TransactionRecord, MarketError> {
        let listing = self
            .store
            .active_listing(skin_id)
            .await?
            .ok_or(MarketError::ListingNotFound { skin_id })?;

        // The settlement re-checks this price, so a listing repriced after
        // this read still fails with `ListingNotFound`.
        if listing.price != expected_price {
            tracing::info!(
                skin_id,
                buyer_id = buyer.id,
                expected = expected_price,
                current = listing.price,
                "Purchase declined: price changed"
            );
            return Err(MarketError::PriceChanged {
                skin_id,
                expected: expected_price,
                current: listing.price,
            });
        }

        if listing.seller_id == buyer.id && !self.config.allow_self_trade {
            return Err(MarketError::SelfTrade);
        }

        // Read the balance from the store, the caller's snapshot may be stale.
        let available = self.buyer_balance(buyer.id).await?;
        if available < listing.price {
            return Err(MarketError::InsufficientFunds {
                required: listing.price,
                available,
            });
        }

        let order = PurchaseOrder {
            skin_id,
            buyer_id: buyer.id,
            seller_id: listing.seller_id,
            price: listing.price,
        };

        let transaction = match self.store.settle_purchase(order).await {
            Ok(transaction) => transaction,
            Err(e) => {
                if e.is_declined() {
                    tracing::info!(skin_id, buyer_id = buyer.id, "Purchase declined: {}", e);
                } else {
                    tracing::error!(skin_id, buyer_id = buyer.id, "Purchase rolled back: {}", e);
                }
                return Err(e);
            }
        };

        tracing::info!(
            skin_id,
            buyer_id = transaction.buyer_id,
            seller_id = transaction.seller_id,
            price = transaction.price,
            "Skin purchased"
        );

        record_best_effort(
            &self.audit,
            buyer.id,
            AuditAction::Buy,
            format!(
                "skin_id: {}, seller_id: {}, price: {}",
                skin_id, transaction.seller_id, transaction.price
            ),
        )
        .await;

        Ok(transaction)
    }

    async fn buyer_balance(&self, buyer_id: u64) -> Result<Cents, MarketError> {
        self.store
            .get_user(buyer_id)
            .await?
            .map(|user| user.balance)
            .ok_or_else(|| MarketError::NotFound(format!("user {}", buyer_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::audit::testing::RecordingAuditLog;
    use crate::core::market::{ListingStatus, User};
    use crate::infra::market::InMemoryMarketStore;

    const SELLER: u64 = 10;
    const BUYER: u64 = 20;

    /// Seller owns one listed skin at `price`; buyer holds `buyer_balance`.
    async fn market_with_listing(
        price: Cents,
        buyer_balance: Cents,
    ) -> (
        TransferEngine<InMemoryMarketStore, RecordingAuditLog>,
        InMemoryMarketStore,
        RecordingAuditLog,
        u64,
    ) {
        let store = InMemoryMarketStore::new();
        let audit = RecordingAuditLog::default();
        store.ensure_user(SELLER, "seller", 5_000).await.unwrap();
        store.ensure_user(BUYER, "buyer", buyer_balance).await.unwrap();
        let skin = store.create_skin("Karambit | Doppler", 90_000).await.unwrap();
        store.grant_skin(skin.id, SELLER).await.unwrap();
        store.open_listing(skin.id, SELLER, price).await.unwrap();

        let engine = TransferEngine::new(store.clone(), audit.clone(), MarketConfig::default());
        (engine, store, audit, skin.id)
    }

    async fn current(store: &InMemoryMarketStore, id: u64) -> CurrentUser {
        let user: User = store.get_user(id).await.unwrap().unwrap();
        CurrentUser::from(&user)
    }

    async fn total_balance(store: &InMemoryMarketStore) -> Cents {
        store
            .list_users()
            .await
            .unwrap()
            .iter()
            .map(|u| u.balance)
            .sum()
    }

    #[tokio::test]
    async fn test_purchase_moves_funds_and_ownership() {
        let (engine, store, audit, skin_id) = market_with_listing(10_000, 15_000).await;
        let buyer = current(&store, BUYER).await;
        let total_before = total_balance(&store).await;

        let transaction = engine
            .execute_purchase(skin_id, &buyer, 10_000)
            .await
            .unwrap();

        assert_eq!(transaction.buyer_id, BUYER);
        assert_eq!(transaction.seller_id, SELLER);
        assert_eq!(transaction.price, 10_000);

        let buyer_after = store.get_user(BUYER).await.unwrap().unwrap();
        let seller_after = store.get_user(SELLER).await.unwrap().unwrap();
        assert_eq!(buyer_after.balance, 5_000);
        assert_eq!(seller_after.balance, 15_000);
        assert_eq!(total_balance(&store).await, total_before);

        let record = store.get_inventory_record(skin_id).await.unwrap().unwrap();
        assert_eq!(record.user_id, BUYER);
        assert_eq!(record.status, None);

        assert!(store.active_listing(skin_id).await.unwrap().is_none());
        let history = store.listing_history(skin_id).await.unwrap();
        assert_eq!(history[0].status, ListingStatus::Sold);

        assert_eq!(store.transactions_for_user(BUYER, 10).await.unwrap().len(), 1);
        assert_eq!(audit.actions(), vec![(BUYER, AuditAction::Buy)]);
    }

    #[tokio::test]
    async fn test_exact_balance_is_enough() {
        let (engine, store, _, skin_id) = market_with_listing(10_000, 10_000).await;
        let buyer = current(&store, BUYER).await;

        engine.execute_purchase(skin_id, &buyer, 10_000).await.unwrap();

        let buyer_after = store.get_user(BUYER).await.unwrap().unwrap();
        assert_eq!(buyer_after.balance, 0);
    }

    #[tokio::test]
    async fn test_one_cent_short_is_declined() {
        let (engine, store, audit, skin_id) = market_with_listing(10_000, 9_999).await;
        let buyer = current(&store, BUYER).await;

        let err = engine
            .execute_purchase(skin_id, &buyer, 10_000)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MarketError::InsufficientFunds {
                required: 10_000,
                available: 9_999
            }
        );

        assert_eq!(store.get_user(BUYER).await.unwrap().unwrap().balance, 9_999);
        assert_eq!(store.get_user(SELLER).await.unwrap().unwrap().balance, 5_000);
        assert_eq!(
            store.get_inventory_record(skin_id).await.unwrap().unwrap().user_id,
            SELLER
        );
        assert!(store.active_listing(skin_id).await.unwrap().is_some());
        assert!(store.transactions_for_user(BUYER, 10).await.unwrap().is_empty());
        assert!(audit.actions().is_empty());
    }

    #[tokio::test]
    async fn test_stale_caller_snapshot_uses_store_balance() {
        let (engine, store, _, skin_id) = market_with_listing(10_000, 15_000).await;
        let mut buyer = current(&store, BUYER).await;
        buyer.balance = 1_000_000;
        store.set_balance(BUYER, 50).await.unwrap();

        let err = engine
            .execute_purchase(skin_id, &buyer, 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_second_purchase_sees_listing_gone() {
        let (engine, store, _, skin_id) = market_with_listing(1_000, 5_000).await;
        store.ensure_user(30, "late buyer", 5_000).await.unwrap();
        let buyer = current(&store, BUYER).await;
        let late = current(&store, 30).await;

        engine.execute_purchase(skin_id, &buyer, 1_000).await.unwrap();
        let err = engine
            .execute_purchase(skin_id, &late, 1_000)
            .await
            .unwrap_err();

        assert_eq!(err, MarketError::ListingNotFound { skin_id });
        assert_eq!(store.get_user(30).await.unwrap().unwrap().balance, 5_000);
        assert_eq!(store.transactions_for_user(SELLER, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_listing() {
        let (engine, store, _, _) = market_with_listing(1_000, 5_000).await;
        let buyer = current(&store, BUYER).await;

        let err = engine.execute_purchase(404, &buyer, 1_000).await.unwrap_err();
        assert_eq!(err, MarketError::ListingNotFound { skin_id: 404 });
    }

    #[tokio::test]
    async fn test_self_trade_rejected_by_default() {
        let (engine, store, _, skin_id) = market_with_listing(1_000, 5_000).await;
        let seller = current(&store, SELLER).await;

        let err = engine
            .execute_purchase(skin_id, &seller, 1_000)
            .await
            .unwrap_err();
        assert_eq!(err, MarketError::SelfTrade);
        assert!(store.active_listing(skin_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_self_trade_allowed_when_configured() {
        let (_, store, audit, skin_id) = market_with_listing(1_000, 5_000).await;
        let config = MarketConfig {
            allow_self_trade: true,
            ..MarketConfig::default()
        };
        let engine = TransferEngine::new(store.clone(), audit, config);
        let seller = current(&store, SELLER).await;

        engine.execute_purchase(skin_id, &seller, 1_000).await.unwrap();

        // Paid to themselves: balance unchanged, listing closed.
        assert_eq!(store.get_user(SELLER).await.unwrap().unwrap().balance, 5_000);
        assert!(store.active_listing(skin_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_preview_reports_price_and_balance() {
        let (engine, store, _, skin_id) = market_with_listing(2_500, 4_000).await;
        let buyer = current(&store, BUYER).await;

        let preview = engine.preview_purchase(skin_id, &buyer).await.unwrap();
        assert_eq!(preview.name, "Karambit | Doppler");
        assert_eq!(preview.price, 2_500);
        assert_eq!(preview.seller_id, SELLER);
        assert_eq!(preview.buyer_balance, 4_000);
    }

    #[tokio::test]
    async fn test_relisted_at_higher_price_is_declined() {
        let (engine, store, audit, skin_id) = market_with_listing(1_000, 100_000).await;
        let buyer = current(&store, BUYER).await;

        // The buyer is shown 1_000, then the seller relists at 90_000
        // before the confirmation arrives.
        let preview = engine.preview_purchase(skin_id, &buyer).await.unwrap();
        store.cancel_listing(skin_id, Some(SELLER)).await.unwrap();
        store.open_listing(skin_id, SELLER, 90_000).await.unwrap();

        let err = engine
            .execute_purchase(skin_id, &buyer, preview.price)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MarketError::PriceChanged {
                skin_id,
                expected: 1_000,
                current: 90_000
            }
        );
        assert!(err.is_declined());

        assert_eq!(store.get_user(BUYER).await.unwrap().unwrap().balance, 100_000);
        assert_eq!(
            store.get_inventory_record(skin_id).await.unwrap().unwrap().user_id,
            SELLER
        );
        assert_eq!(store.active_listing(skin_id).await.unwrap().unwrap().price, 90_000);
        assert!(store.transactions_for_user(BUYER, 10).await.unwrap().is_empty());
        assert!(audit.actions().is_empty());
    }

    #[tokio::test]
    async fn test_price_drop_is_declined_too() {
        let (engine, store, _, skin_id) = market_with_listing(5_000, 10_000).await;
        let buyer = current(&store, BUYER).await;
        store.cancel_listing(skin_id, Some(SELLER)).await.unwrap();
        store.open_listing(skin_id, SELLER, 4_000).await.unwrap();

        let err = engine
            .execute_purchase(skin_id, &buyer, 5_000)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::PriceChanged { current: 4_000, .. }));
        assert_eq!(store.get_user(BUYER).await.unwrap().unwrap().balance, 10_000);
    }

    #[tokio::test]
    async fn test_audit_failure_keeps_purchase() {
        let (_, store, _, skin_id) = market_with_listing(1_000, 5_000).await;
        let engine = TransferEngine::new(
            store.clone(),
            RecordingAuditLog::failing(),
            MarketConfig::default(),
        );
        let buyer = current(&store, BUYER).await;

        engine.execute_purchase(skin_id, &buyer, 1_000).await.unwrap();
        assert_eq!(
            store.get_inventory_record(skin_id).await.unwrap().unwrap().user_id,
            BUYER
        );
    }
}
