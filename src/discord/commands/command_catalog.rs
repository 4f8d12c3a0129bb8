// Discord commands module.
// Each command group gets its own file.

pub mod common;

pub mod market;

pub mod admin;
