//! Unified secret issuance: the single bearer token callers present to `/proxy`

use std::sync::Arc;

use keyrelay_store::CredentialStore;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::RelayError;
use crate::record::mask_secret;

/// Store name of the unified secret
pub const UNIFIED_SECRET_KEY: &str = "unified_api_key";

/// Prefix marking a token as issued by this proxy
pub const UNIFIED_KEY_PREFIX: &str = "sk-relay-";

/// Mint a new token: prefix plus two v4 UUIDs (244 random bits from the OS CSPRNG)
pub fn mint_unified_key() -> String {
    format!(
        "{}{}{}",
        UNIFIED_KEY_PREFIX,
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

#[derive(Clone)]
pub struct UnifiedSecretIssuer {
    store: Arc<dyn CredentialStore>,
}

impl UnifiedSecretIssuer {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Persisted secret, minting one on first use.
    ///
    /// Two concurrent first reads may both mint; whichever write lands last is
    /// the secret from then on.
    pub async fn get_or_create(&self) -> Result<String, RelayError> {
        if let Some(existing) = self.current().await? {
            return Ok(existing);
        }
        let fresh = mint_unified_key();
        self.persist(&fresh).await?;
        info!("Issued unified key {}", mask_secret(&fresh));
        Ok(fresh)
    }

    /// Replace the secret. The previous value stops working immediately.
    pub async fn reset(&self) -> Result<String, RelayError> {
        let previous = self.current().await?;
        let mut fresh = mint_unified_key();
        while previous.as_deref() == Some(fresh.as_str()) {
            fresh = mint_unified_key();
        }
        self.persist(&fresh).await?;
        info!("Unified key reset to {}", mask_secret(&fresh));
        Ok(fresh)
    }

    /// Persisted secret without minting one. Caller authentication reads
    /// through here so a rejected request never writes to the store.
    pub async fn current(&self) -> Result<Option<String>, RelayError> {
        let value = self
            .store
            .get(UNIFIED_SECRET_KEY)
            .await
            .map_err(RelayError::Storage)?;
        Ok(match value {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        })
    }

    async fn persist(&self, secret: &str) -> Result<(), RelayError> {
        self.store
            .set(UNIFIED_SECRET_KEY, Value::String(secret.to_string()))
            .await
            .map_err(RelayError::Storage)
    }
}
