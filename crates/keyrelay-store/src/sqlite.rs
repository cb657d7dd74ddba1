//! SQLite-backed credential store

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::CredentialStore;

/// SQLite key/value table (thread-safe via Arc<Mutex>)
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and its schema
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        info!("Initializing credential store at {:?}", path);
        warn!(
            "Credential store is NOT encrypted. Provider secrets are stored in plaintext at {:?}",
            path
        );

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create kv table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        let conn = Arc::clone(&self.conn);
        let name = name.to_owned();

        tokio::task::spawn_blocking(move || -> Result<Option<Value>> {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let raw: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE name = ?1", params![&name], |row| {
                    row.get(0)
                })
                .optional()?;

            match raw {
                Some(raw) => {
                    let value = serde_json::from_str(&raw)
                        .with_context(|| format!("Stored value for '{}' is not valid JSON", name))?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let name = name.to_owned();
        let raw = serde_json::to_string(&value)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            conn.execute(
                "INSERT INTO kv (name, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![&name, &raw, Utc::now().to_rfc3339()],
            )?;
            debug!("Stored value for '{}' ({} bytes)", name, raw.len());
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_roundtrip_and_overwrite() -> Result<()> {
        let dir = tempdir()?;
        let store = SqliteStore::new(dir.path().join("relay.db"))?;

        assert!(store.get("api_keys").await?.is_none());

        store
            .set("api_keys", json!([{"platform": "openai", "secretKey": "sk-1"}]))
            .await?;
        store
            .set("api_keys", json!([{"platform": "kimi", "secretKey": "sk-2"}]))
            .await?;

        let value = store.get("api_keys").await?.unwrap();
        assert_eq!(value[0]["platform"], "kimi");
        Ok(())
    }

    #[tokio::test]
    async fn test_values_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("relay.db");
        {
            let store = SqliteStore::new(&path)?;
            store.set("unified_api_key", json!("sk-relay-abc")).await?;
        }
        let store = SqliteStore::new(&path)?;
        assert_eq!(
            store.get("unified_api_key").await?,
            Some(json!("sk-relay-abc"))
        );
        Ok(())
    }
}
