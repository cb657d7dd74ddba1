//! Opaque key/value persistence for proxy credentials
//!
//! This crate provides:
//! - The [`CredentialStore`] trait consumed by the proxy core
//! - A durable SQLite implementation ([`SqliteStore`])
//! - A process-local implementation for tests and ephemeral runs ([`MemoryStore`])
//!
//! Values are whole JSON documents. There are no transactions and no partial
//! updates: a `set` replaces the previous value and the last writer wins.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Get/set persistence addressed by fixed names
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the value stored under `name`, or `None` if nothing was ever written
    async fn get(&self, name: &str) -> Result<Option<Value>>;

    /// Overwrite the value stored under `name`
    async fn set(&self, name: &str, value: Value) -> Result<()>;
}
