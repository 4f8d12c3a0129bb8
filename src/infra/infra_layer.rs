// The infra module contains implementations of core traits.

#[path = "market/mod.rs"]
pub mod market;
