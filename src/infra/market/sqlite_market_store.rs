// SQLite implementation of the MarketStore trait
//
// Tables:
// - users: balances and admin flag, keyed by Discord user id
// - skins: immutable catalog
// - inventory: one owner per skin, `status = 'for_sale'` while listed
// - skin_sales: listings, kept after closing with status sold/cancelled
// - favorites: (user_id, skin_id) bookmarks
// - transactions: append-only transfer log
//
// Every multi-table operation runs in one sqlx transaction whose first
// statement is a conditional write. That takes SQLite's write lock up front,
// so two buyers racing for the same listing are serialised and the second
// one finds the listing already closed.

use crate::core::market::{
    Cents, FavoriteRecord, InventoryRecord, InventoryStatus, Listing, ListingStatus, ListingView,
    MarketError, MarketStore, OwnedSkin, PurchaseOrder, Skin, TransactionRecord, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL,
        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        is_admin BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS skins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        price INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        skin_id INTEGER NOT NULL UNIQUE REFERENCES skins(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        status TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_inventory_user ON inventory(user_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS skin_sales (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        skin_id INTEGER NOT NULL REFERENCES skins(id),
        seller_id INTEGER NOT NULL REFERENCES users(id),
        price INTEGER NOT NULL CHECK (price > 0),
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        closed_at TEXT
    )
    "#,
    // At most one active listing per skin.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_skin_sales_one_active
    ON skin_sales(skin_id) WHERE status = 'active'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS favorites (
        user_id INTEGER NOT NULL REFERENCES users(id),
        skin_id INTEGER NOT NULL REFERENCES skins(id),
        PRIMARY KEY (user_id, skin_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        buyer_id INTEGER NOT NULL,
        seller_id INTEGER NOT NULL,
        skin_id INTEGER NOT NULL,
        price INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_buyer ON transactions(buyer_id, id DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_seller ON transactions(seller_id, id DESC)
    "#,
];

const LISTING_VIEW_SELECT: &str = r#"
    SELECT skins.id AS skin_id, skins.name AS name, skin_sales.price AS price,
           inventory.user_id AS seller_id
    FROM skin_sales
    JOIN skins ON skins.id = skin_sales.skin_id
    JOIN inventory ON inventory.skin_id = skin_sales.skin_id
"#;

fn storage(e: sqlx::Error) -> MarketError {
    MarketError::Storage(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, MarketError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MarketError::Storage(format!("bad timestamp {:?}: {}", value, e)))
}

fn id(row: &SqliteRow, column: &str) -> Result<u64, MarketError> {
    row.try_get::<i64, _>(column)
        .map(|v| v as u64)
        .map_err(storage)
}

fn map_user(row: &SqliteRow) -> Result<User, MarketError> {
    Ok(User {
        id: id(row, "id")?,
        username: row.try_get("username").map_err(storage)?,
        balance: row.try_get("balance").map_err(storage)?,
        is_admin: row.try_get("is_admin").map_err(storage)?,
    })
}

fn map_skin(row: &SqliteRow) -> Result<Skin, MarketError> {
    Ok(Skin {
        id: id(row, "id")?,
        name: row.try_get("name").map_err(storage)?,
        price: row.try_get("price").map_err(storage)?,
    })
}

fn map_inventory(row: &SqliteRow) -> Result<InventoryRecord, MarketError> {
    let status: Option<String> = row.try_get("status").map_err(storage)?;
    let status = match status {
        Some(s) => Some(
            InventoryStatus::parse(&s)
                .ok_or_else(|| MarketError::Storage(format!("unknown inventory status {:?}", s)))?,
        ),
        None => None,
    };

    Ok(InventoryRecord {
        skin_id: id(row, "skin_id")?,
        user_id: id(row, "user_id")?,
        status,
    })
}

fn map_listing(row: &SqliteRow) -> Result<Listing, MarketError> {
    let status: String = row.try_get("status").map_err(storage)?;
    let status = ListingStatus::parse(&status)
        .ok_or_else(|| MarketError::Storage(format!("unknown listing status {:?}", status)))?;
    let created_at: String = row.try_get("created_at").map_err(storage)?;
    let closed_at: Option<String> = row.try_get("closed_at").map_err(storage)?;

    Ok(Listing {
        id: id(row, "id")?,
        skin_id: id(row, "skin_id")?,
        seller_id: id(row, "seller_id")?,
        price: row.try_get("price").map_err(storage)?,
        status,
        created_at: parse_timestamp(&created_at)?,
        closed_at: closed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn map_listing_view(row: &SqliteRow) -> Result<ListingView, MarketError> {
    Ok(ListingView {
        skin_id: id(row, "skin_id")?,
        name: row.try_get("name").map_err(storage)?,
        price: row.try_get("price").map_err(storage)?,
        seller_id: id(row, "seller_id")?,
        is_owned_by_user: false,
        is_favorite: false,
    })
}

fn map_transaction(row: &SqliteRow) -> Result<TransactionRecord, MarketError> {
    let created_at: String = row.try_get("created_at").map_err(storage)?;
    Ok(TransactionRecord {
        id: id(row, "id")?,
        buyer_id: id(row, "buyer_id")?,
        seller_id: id(row, "seller_id")?,
        skin_id: id(row, "skin_id")?,
        price: row.try_get("price").map_err(storage)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[derive(Clone)]
pub struct SqliteMarketStore {
    pool: SqlitePool,
}

impl SqliteMarketStore {
    /// Open (or create) the market database at `database_path` and migrate it.
    pub async fn new(database_path: &str, busy_timeout: Duration) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// The underlying pool, shared with the audit log.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations to create tables.
    async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Finish a unit of work: commit on success, roll back otherwise.
    async fn finish<T>(
        tx: Transaction<'static, Sqlite>,
        result: Result<T, MarketError>,
    ) -> Result<T, MarketError> {
        match result {
            Ok(value) => {
                tx.commit().await.map_err(storage)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn open_listing_in(
        tx: &mut Transaction<'static, Sqlite>,
        skin_id: u64,
        seller_id: u64,
        price: Cents,
    ) -> Result<Listing, MarketError> {
        let flagged = sqlx::query(
            r#"
            UPDATE inventory SET status = ?
            WHERE skin_id = ? AND user_id = ? AND status IS NULL
            "#,
        )
        .bind(InventoryStatus::ForSale.as_str())
        .bind(skin_id as i64)
        .bind(seller_id as i64)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        if flagged.rows_affected() != 1 {
            let row = sqlx::query("SELECT skin_id, user_id, status FROM inventory WHERE skin_id = ?")
                .bind(skin_id as i64)
                .fetch_optional(&mut **tx)
                .await
                .map_err(storage)?;
            return Err(match row.as_ref().map(map_inventory).transpose()? {
                None => MarketError::NotFound(format!("inventory record for skin {}", skin_id)),
                Some(record) if record.user_id != seller_id => MarketError::NotOwner { skin_id },
                Some(_) => MarketError::AlreadyListed { skin_id },
            });
        }

        let created_at = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO skin_sales (skin_id, seller_id, price, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(skin_id as i64)
        .bind(seller_id as i64)
        .bind(price)
        .bind(ListingStatus::Active.as_str())
        .bind(created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MarketError::AlreadyListed { skin_id }
            } else {
                storage(e)
            }
        })?;

        Ok(Listing {
            id: inserted.last_insert_rowid() as u64,
            skin_id,
            seller_id,
            price,
            status: ListingStatus::Active,
            created_at,
            closed_at: None,
        })
    }

    async fn cancel_listing_in(
        tx: &mut Transaction<'static, Sqlite>,
        skin_id: u64,
        required_owner: Option<u64>,
    ) -> Result<Listing, MarketError> {
        let closed = sqlx::query(
            r#"
            UPDATE skin_sales SET status = ?, closed_at = ?
            WHERE skin_id = ? AND status = ?
            "#,
        )
        .bind(ListingStatus::Cancelled.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(skin_id as i64)
        .bind(ListingStatus::Active.as_str())
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        if closed.rows_affected() == 0 {
            return Err(MarketError::ListingNotFound { skin_id });
        }

        if let Some(required) = required_owner {
            let owner: Option<i64> =
                sqlx::query_scalar("SELECT user_id FROM inventory WHERE skin_id = ?")
                    .bind(skin_id as i64)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(storage)?;
            if owner != Some(required as i64) {
                return Err(MarketError::Forbidden(format!(
                    "skin {} belongs to another user",
                    skin_id
                )));
            }
        }

        sqlx::query("UPDATE inventory SET status = NULL WHERE skin_id = ?")
            .bind(skin_id as i64)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;

        let row = sqlx::query(
            r#"
            SELECT id, skin_id, seller_id, price, status, created_at, closed_at
            FROM skin_sales
            WHERE skin_id = ? AND status = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(skin_id as i64)
        .bind(ListingStatus::Cancelled.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)?;

        map_listing(&row)
    }

    async fn settle_purchase_in(
        tx: &mut Transaction<'static, Sqlite>,
        order: &PurchaseOrder,
    ) -> Result<TransactionRecord, MarketError> {
        let skin_id = order.skin_id;
        let now = Utc::now();

        // Close the listing first: this is the conflict point between buyers.
        let closed = sqlx::query(
            r#"
            UPDATE skin_sales SET status = ?, closed_at = ?
            WHERE skin_id = ? AND status = ? AND price = ?
            "#,
        )
        .bind(ListingStatus::Sold.as_str())
        .bind(now.to_rfc3339())
        .bind(skin_id as i64)
        .bind(ListingStatus::Active.as_str())
        .bind(order.price)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        if closed.rows_affected() != 1 {
            return Err(MarketError::ListingNotFound { skin_id });
        }

        let owner: Option<i64> = sqlx::query_scalar("SELECT user_id FROM inventory WHERE skin_id = ?")
            .bind(skin_id as i64)
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage)?;
        if owner != Some(order.seller_id as i64) {
            return Err(MarketError::ListingNotFound { skin_id });
        }

        let debited = sqlx::query(
            r#"
            UPDATE users SET balance = balance - ?
            WHERE id = ? AND balance >= ?
            "#,
        )
        .bind(order.price)
        .bind(order.buyer_id as i64)
        .bind(order.price)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        if debited.rows_affected() != 1 {
            let available: Option<i64> = sqlx::query_scalar("SELECT balance FROM users WHERE id = ?")
                .bind(order.buyer_id as i64)
                .fetch_optional(&mut **tx)
                .await
                .map_err(storage)?;
            return Err(match available {
                Some(available) => MarketError::InsufficientFunds {
                    required: order.price,
                    available,
                },
                None => MarketError::NotFound(format!("user {}", order.buyer_id)),
            });
        }

        // The guard keeps the credit inside i64; SQLite would otherwise
        // fail the statement with an integer overflow error.
        let credited = sqlx::query(
            r#"
            UPDATE users SET balance = balance + ?
            WHERE id = ? AND balance <= ?
            "#,
        )
        .bind(order.price)
        .bind(order.seller_id as i64)
        .bind(i64::MAX - order.price)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        if credited.rows_affected() != 1 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
                .bind(order.seller_id as i64)
                .fetch_optional(&mut **tx)
                .await
                .map_err(storage)?;
            return Err(match exists {
                Some(_) => MarketError::BalanceOverflow {
                    user_id: order.seller_id,
                },
                None => MarketError::NotFound(format!("user {}", order.seller_id)),
            });
        }

        sqlx::query("UPDATE inventory SET user_id = ?, status = NULL WHERE skin_id = ?")
            .bind(order.buyer_id as i64)
            .bind(skin_id as i64)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (buyer_id, seller_id, skin_id, price, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(order.buyer_id as i64)
        .bind(order.seller_id as i64)
        .bind(skin_id as i64)
        .bind(order.price)
        .bind(now.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        Ok(TransactionRecord {
            id: inserted.last_insert_rowid() as u64,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            skin_id,
            price: order.price,
            created_at: now,
        })
    }

    async fn toggle_favorite_in(
        tx: &mut Transaction<'static, Sqlite>,
        favorite: &FavoriteRecord,
    ) -> Result<bool, MarketError> {
        let removed = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND skin_id = ?")
            .bind(favorite.user_id as i64)
            .bind(favorite.skin_id as i64)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;
        if removed.rows_affected() > 0 {
            return Ok(false);
        }

        sqlx::query("INSERT OR IGNORE INTO favorites (user_id, skin_id) VALUES (?, ?)")
            .bind(favorite.user_id as i64)
            .bind(favorite.skin_id as i64)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;
        Ok(true)
    }
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    async fn ensure_user(
        &self,
        user_id: u64,
        username: &str,
        starting_balance: Cents,
    ) -> Result<User, MarketError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, balance)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET username = excluded.username
            "#,
        )
        .bind(user_id as i64)
        .bind(username)
        .bind(starting_balance)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_user(user_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("user {}", user_id)))
    }

    async fn get_user(&self, user_id: u64) -> Result<Option<User>, MarketError> {
        let row = sqlx::query("SELECT id, username, balance, is_admin FROM users WHERE id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(map_user).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, MarketError> {
        let rows = sqlx::query("SELECT id, username, balance, is_admin FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(map_user).collect()
    }

    async fn set_balance(&self, user_id: u64, balance: Cents) -> Result<bool, MarketError> {
        let result = sqlx::query("UPDATE users SET balance = ? WHERE id = ?")
            .bind(balance)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_admin(&self, user_id: u64, is_admin: bool) -> Result<(), MarketError> {
        sqlx::query("UPDATE users SET is_admin = ? WHERE id = ?")
            .bind(is_admin)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn create_skin(&self, name: &str, price: Cents) -> Result<Skin, MarketError> {
        let result = sqlx::query("INSERT INTO skins (name, price) VALUES (?, ?)")
            .bind(name)
            .bind(price)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(Skin {
            id: result.last_insert_rowid() as u64,
            name: name.to_string(),
            price,
        })
    }

    async fn get_skin(&self, skin_id: u64) -> Result<Option<Skin>, MarketError> {
        let row = sqlx::query("SELECT id, name, price FROM skins WHERE id = ?")
            .bind(skin_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(map_skin).transpose()
    }

    async fn grant_skin(
        &self,
        skin_id: u64,
        user_id: u64,
    ) -> Result<InventoryRecord, MarketError> {
        if self.get_skin(skin_id).await?.is_none() {
            return Err(MarketError::NotFound(format!("skin {}", skin_id)));
        }
        if self.get_user(user_id).await?.is_none() {
            return Err(MarketError::NotFound(format!("user {}", user_id)));
        }

        sqlx::query("INSERT INTO inventory (skin_id, user_id, status) VALUES (?, ?, NULL)")
            .bind(skin_id as i64)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MarketError::AlreadyOwned { skin_id }
                } else {
                    storage(e)
                }
            })?;

        Ok(InventoryRecord {
            skin_id,
            user_id,
            status: None,
        })
    }

    async fn get_inventory_record(
        &self,
        skin_id: u64,
    ) -> Result<Option<InventoryRecord>, MarketError> {
        let row = sqlx::query("SELECT skin_id, user_id, status FROM inventory WHERE skin_id = ?")
            .bind(skin_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(map_inventory).transpose()
    }

    async fn user_inventory(&self, user_id: u64) -> Result<Vec<OwnedSkin>, MarketError> {
        let rows = sqlx::query(
            r#"
            SELECT skins.id AS skin_id,
                   skins.name AS name,
                   COALESCE(skin_sales.price, skins.price) AS price,
                   inventory.status AS status
            FROM inventory
            JOIN skins ON inventory.skin_id = skins.id
            LEFT JOIN skin_sales
                ON skin_sales.skin_id = skins.id AND skin_sales.status = 'active'
            WHERE inventory.user_id = ?
            ORDER BY skins.id
            "#,
        )
        .bind(user_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let status: Option<String> = row.try_get("status").map_err(storage)?;
                Ok(OwnedSkin {
                    skin_id: id(row, "skin_id")?,
                    name: row.try_get("name").map_err(storage)?,
                    price: row.try_get("price").map_err(storage)?,
                    is_for_sale: status.as_deref().and_then(InventoryStatus::parse)
                        == Some(InventoryStatus::ForSale),
                })
            })
            .collect()
    }

    async fn active_listing(&self, skin_id: u64) -> Result<Option<ListingView>, MarketError> {
        let query = format!(
            "{} WHERE skin_sales.skin_id = ? AND skin_sales.status = 'active'",
            LISTING_VIEW_SELECT
        );
        let row = sqlx::query(&query)
            .bind(skin_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(map_listing_view).transpose()
    }

    async fn active_listings(&self) -> Result<Vec<ListingView>, MarketError> {
        let query = format!(
            "{} WHERE skin_sales.status = 'active' ORDER BY skin_sales.id",
            LISTING_VIEW_SELECT
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(map_listing_view).collect()
    }

    async fn listing_history(&self, skin_id: u64) -> Result<Vec<Listing>, MarketError> {
        let rows = sqlx::query(
            r#"
            SELECT id, skin_id, seller_id, price, status, created_at, closed_at
            FROM skin_sales
            WHERE skin_id = ?
            ORDER BY id DESC
            "#,
        )
        .bind(skin_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(map_listing).collect()
    }

    async fn open_listing(
        &self,
        skin_id: u64,
        seller_id: u64,
        price: Cents,
    ) -> Result<Listing, MarketError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = Self::open_listing_in(&mut tx, skin_id, seller_id, price).await;
        Self::finish(tx, result).await
    }

    async fn cancel_listing(
        &self,
        skin_id: u64,
        required_owner: Option<u64>,
    ) -> Result<Listing, MarketError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = Self::cancel_listing_in(&mut tx, skin_id, required_owner).await;
        Self::finish(tx, result).await
    }

    async fn settle_purchase(
        &self,
        order: PurchaseOrder,
    ) -> Result<TransactionRecord, MarketError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = Self::settle_purchase_in(&mut tx, &order).await;
        Self::finish(tx, result).await
    }

    async fn toggle_favorite(&self, favorite: FavoriteRecord) -> Result<bool, MarketError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = Self::toggle_favorite_in(&mut tx, &favorite).await;
        Self::finish(tx, result).await
    }

    async fn favorite_listings(&self, user_id: u64) -> Result<Vec<ListingView>, MarketError> {
        let query = format!(
            r#"{}
            JOIN favorites ON favorites.skin_id = skin_sales.skin_id
            WHERE favorites.user_id = ? AND skin_sales.status = 'active'
            ORDER BY skin_sales.id"#,
            LISTING_VIEW_SELECT
        );
        let rows = sqlx::query(&query)
            .bind(user_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(map_listing_view).collect()
    }

    async fn transactions_for_user(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, MarketError> {
        let rows = sqlx::query(
            r#"
            SELECT id, buyer_id, seller_id, skin_id, price, created_at
            FROM transactions
            WHERE buyer_id = ? OR seller_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id as i64)
        .bind(user_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(map_transaction).collect()
    }
}
