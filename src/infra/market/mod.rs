// Market persistence: SQLite for the running bot, in-memory for tests.

#[cfg(test)]
mod in_memory;
mod sqlite_audit_log;
mod sqlite_market_store;

#[cfg(test)]
pub use in_memory::InMemoryMarketStore;
pub use sqlite_audit_log::SqliteAuditLog;
pub use sqlite_market_store::SqliteMarketStore;
