//! Key-value storage abstraction for the broker.
//!
//! Responsibilities:
//! - Atomic multi-key get/put/delete (multi-puts are all-or-nothing).
//! - Lexicographic prefix listing with direction, limit and cursor.
//!
//! Non-responsibilities:
//! - The round alarm (a broker-internal timer, see `broker::alarm`).
//! - Any interpretation of values; callers own encoding.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Key namespace for client balances, decimal-encoded integers.
pub const BALANCE_PREFIX: &str = "balance:";
/// Key namespace for client display names.
pub const NAME_PREFIX: &str = "name:";
/// Key namespace for accepted messages, JSON-encoded.
pub const MESSAGE_PREFIX: &str = "message:";

pub fn balance_key(token: &str) -> String {
    format!("{BALANCE_PREFIX}{token}")
}

pub fn name_key(token: &str) -> String {
    format!("{NAME_PREFIX}{token}")
}

/// Parameters for a prefix listing.
///
/// `end`, when set, is an exclusive upper bound on returned keys in both
/// directions: a reverse page that stopped at key K continues by passing
/// `end = K` and receives strictly smaller keys.
#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub prefix: String,
    pub reverse: bool,
    pub limit: Option<usize>,
    pub end: Option<String>,
}

impl ListQuery {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}

/// Durable key-value store used for balances, names and accepted messages.
///
/// Implementations must make `put_many` and `delete_many` atomic with
/// respect to concurrent reads and listings.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Multi-key get. Missing keys are absent from the returned map,
    /// distinguishable from a present empty value.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>>;

    /// All-or-nothing write of every entry.
    async fn put_many(&self, entries: &[(String, String)]) -> Result<()>;

    /// Atomic delete; returns the number of keys removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    /// Ordered prefix listing per `ListQuery` semantics.
    async fn list(&self, query: &ListQuery) -> Result<Vec<(String, String)>>;
}
