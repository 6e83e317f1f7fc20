pub mod client;
pub mod commands;
pub mod config;
pub mod protocol;
pub mod server;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
