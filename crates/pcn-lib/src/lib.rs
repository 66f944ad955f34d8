mod config;
pub use config::{ChainConfig, Config, NodeConfig, MAX_SETTLE_TIMEOUT};

#[cfg(test)]
pub mod tests;

pub mod api;
pub use api::NodeApi;
pub mod chain;
pub mod channel;
pub mod connection;
pub mod events;
pub mod ledger;
pub mod lock_manager;
pub mod rpc;
pub mod serde_utils;
pub mod store;
pub mod tasks;
pub mod transfer;
pub mod types;
pub mod waiting;

mod errors;
pub use errors::{Error, Result};

use git_version::git_version;

const GIT_VERSION: &str = git_version!(fallback = "unknown");

pub fn get_git_version() -> &'static str {
    GIT_VERSION
}

pub fn get_node_prefix() -> &'static str {
    static INSTANCE: once_cell::sync::OnceCell<String> = once_cell::sync::OnceCell::new();
    INSTANCE.get_or_init(|| std::env::var("LOG_PREFIX").unwrap_or_else(|_| "".to_string()))
}
