//! In-memory credential store

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::CredentialStore;

/// Process-local store. Contents vanish when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(name.to_string(), value);
        Ok(())
    }
}
