// Discord layer - slash commands that adapt the market services.

#[path = "commands/command_catalog.rs"]
pub mod commands;

// Re-export command types for convenience
pub use commands::common::{Data, Error};
