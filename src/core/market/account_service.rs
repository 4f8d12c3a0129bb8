// Account service - identity resolution, profiles and admin operations.
//
// `ensure_user` is the identity-provider seam: the presentation layer hands
// over whatever id and name it authenticated, and gets back the
// request-scoped `CurrentUser` that every other operation takes.

use super::audit::{record_best_effort, AuditAction, AuditEntry, AuditLog};
use super::market_models::{Cents, CurrentUser, InventoryRecord, Profile, Skin, User};
use super::market_store::{MarketConfig, MarketError, MarketStore};

pub struct AccountService<S: MarketStore, A: AuditLog> {
    store: S,
    audit: A,
    config: MarketConfig,
}

impl<S: MarketStore, A: AuditLog> AccountService<S, A> {
    pub fn new(store: S, audit: A, config: MarketConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Resolve the caller, creating the account on first contact.
    pub async fn ensure_user(&self, user_id: u64, username: &str) -> Result<CurrentUser, MarketError> {
        let mut user = self
            .store
            .ensure_user(user_id, username, self.config.starting_balance)
            .await?;

        if !user.is_admin && self.config.admin_ids.contains(&user_id) {
            self.store.set_admin(user_id, true).await?;
            user.is_admin = true;
            tracing::info!(user_id, "Promoted configured admin");
        }

        Ok(CurrentUser::from(&user))
    }

    pub async fn profile(&self, user_id: u64) -> Result<Profile, MarketError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("user {}", user_id)))?;
        let skins = self.store.user_inventory(user_id).await?;
        let recent_transactions = self
            .store
            .transactions_for_user(user_id, self.config.history_limit)
            .await?;

        Ok(Profile {
            user,
            skins,
            recent_transactions,
        })
    }

    /// Admin override of a user's balance.
    pub async fn set_balance(
        &self,
        admin: &CurrentUser,
        user_id: u64,
        new_balance: Cents,
    ) -> Result<(), MarketError> {
        require_admin(admin)?;
        if new_balance < 0 {
            return Err(MarketError::InvalidPrice(new_balance));
        }
        if !self.store.set_balance(user_id, new_balance).await? {
            return Err(MarketError::NotFound(format!("user {}", user_id)));
        }

        tracing::info!(admin_id = admin.id, user_id, new_balance, "Balance overridden");
        record_best_effort(
            &self.audit,
            user_id,
            AuditAction::UpdateBalance,
            format!("amount: {}", new_balance),
        )
        .await;
        Ok(())
    }

    pub async fn list_users(&self, admin: &CurrentUser) -> Result<Vec<User>, MarketError> {
        require_admin(admin)?;
        self.store.list_users().await
    }

    pub async fn create_skin(
        &self,
        admin: &CurrentUser,
        name: &str,
        price: Cents,
    ) -> Result<Skin, MarketError> {
        require_admin(admin)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MarketError::EmptyName);
        }
        if price < 0 {
            return Err(MarketError::InvalidPrice(price));
        }
        let skin = self.store.create_skin(name, price).await?;
        tracing::info!(skin_id = skin.id, price, "Skin added to catalog");
        Ok(skin)
    }

    pub async fn grant_skin(
        &self,
        admin: &CurrentUser,
        skin_id: u64,
        user_id: u64,
    ) -> Result<InventoryRecord, MarketError> {
        require_admin(admin)?;
        let record = self.store.grant_skin(skin_id, user_id).await?;
        tracing::info!(skin_id, user_id, "Skin granted");
        Ok(record)
    }

    /// Grant a skin to a member who may not have an account yet. The admin
    /// check comes first, so a refused grant creates no account.
    pub async fn grant_skin_to(
        &self,
        admin: &CurrentUser,
        skin_id: u64,
        user_id: u64,
        username: &str,
    ) -> Result<InventoryRecord, MarketError> {
        require_admin(admin)?;
        let recipient = self.ensure_user(user_id, username).await?;
        self.grant_skin(admin, skin_id, recipient.id).await
    }

    /// Recent audit entries for a user. Admin only.
    pub async fn audit_history(
        &self,
        admin: &CurrentUser,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, MarketError> {
        require_admin(admin)?;
        self.audit
            .recent(user_id, limit)
            .await
            .map_err(|e| MarketError::Storage(e.to_string()))
    }
}

fn require_admin(caller: &CurrentUser) -> Result<(), MarketError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(MarketError::Forbidden("admin only".to_string()))
    }
}
