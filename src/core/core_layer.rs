// The core module contains all business logic.

#[path = "market/mod.rs"]
pub mod market;
