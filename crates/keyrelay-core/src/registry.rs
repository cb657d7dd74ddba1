//! Ordered provider list persisted in the credential store

use std::sync::Arc;

use keyrelay_store::CredentialStore;
use tracing::{debug, info};
use url::Url;

use crate::error::RelayError;
use crate::record::{Platform, ProviderRecord};

/// Store name of the provider list
pub const PROVIDER_LIST_KEY: &str = "api_keys";

/// Loads and replaces the provider list. List order is failover order.
#[derive(Clone)]
pub struct ProviderRegistry {
    store: Arc<dyn CredentialStore>,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Current list, empty if none was ever written
    pub async fn list(&self) -> Result<Vec<ProviderRecord>, RelayError> {
        let Some(value) = self
            .store
            .get(PROVIDER_LIST_KEY)
            .await
            .map_err(RelayError::Storage)?
        else {
            return Ok(Vec::new());
        };

        let records: Vec<ProviderRecord> = serde_json::from_value(value).map_err(|e| {
            RelayError::Storage(anyhow::anyhow!("stored provider list is malformed: {}", e))
        })?;
        Ok(records)
    }

    /// List for dispatch. Absent and empty are both a configuration failure.
    pub async fn load(&self) -> Result<Vec<ProviderRecord>, RelayError> {
        let records = self.list().await?;
        if records.is_empty() {
            return Err(RelayError::NoProvidersConfigured);
        }
        debug!("Loaded {} provider(s)", records.len());
        Ok(records)
    }

    /// Validate and overwrite the whole list. Concurrent writers are not
    /// coordinated; the last one wins.
    pub async fn replace(&self, records: &[ProviderRecord]) -> Result<(), RelayError> {
        validate_provider_list(records)?;
        let value = serde_json::to_value(records)
            .map_err(|e| RelayError::Storage(anyhow::Error::new(e)))?;
        self.store
            .set(PROVIDER_LIST_KEY, value)
            .await
            .map_err(RelayError::Storage)?;
        info!("Provider list replaced ({} entries)", records.len());
        Ok(())
    }
}

/// Write-time checks. `model` is deliberately not required here; a missing
/// model only fails its own entry at dispatch time.
pub fn validate_provider_list(records: &[ProviderRecord]) -> Result<(), RelayError> {
    for (idx, record) in records.iter().enumerate() {
        let platform: Platform = record.platform.parse().map_err(|_| {
            RelayError::InvalidProviderList(format!(
                "entry {}: unknown platform '{}'",
                idx, record.platform
            ))
        })?;

        if record.secret_key.trim().is_empty() {
            return Err(RelayError::InvalidProviderList(format!(
                "entry {} ({}): secretKey must not be empty",
                idx, platform
            )));
        }

        match record.configured_base_url() {
            Some(raw) => {
                let parsed = Url::parse(raw).map_err(|e| {
                    RelayError::InvalidProviderList(format!(
                        "entry {} ({}): invalid baseURL '{}': {}",
                        idx, platform, raw, e
                    ))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(RelayError::InvalidProviderList(format!(
                        "entry {} ({}): baseURL must use http or https",
                        idx, platform
                    )));
                }
            }
            None if platform.requires_base_url() => {
                return Err(RelayError::InvalidProviderList(format!(
                    "entry {} ({}): baseURL is required for this platform",
                    idx, platform
                )));
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_store::MemoryStore;
    use serde_json::json;

    fn registry() -> (Arc<MemoryStore>, ProviderRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = ProviderRegistry::new(store.clone());
        (store, registry)
    }

    #[tokio::test]
    async fn test_load_absent_is_not_configured() {
        let (_, registry) = registry();
        assert!(matches!(
            registry.load().await,
            Err(RelayError::NoProvidersConfigured)
        ));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_empty_is_not_configured() {
        let (store, registry) = registry();
        store.set(PROVIDER_LIST_KEY, json!([])).await.unwrap();
        assert!(matches!(
            registry.load().await,
            Err(RelayError::NoProvidersConfigured)
        ));
    }

    #[tokio::test]
    async fn test_replace_preserves_order() {
        let (_, registry) = registry();
        let records = vec![
            ProviderRecord::new(Platform::Kimi, "sk-kimi").with_model("moonshot-v1-8k"),
            ProviderRecord::new(Platform::Openai, "sk-openai").with_model("gpt-4o-mini"),
            ProviderRecord::new(Platform::Llama, "ollama")
                .with_base_url("http://localhost:11434")
                .with_model("llama3"),
        ];
        registry.replace(&records).await.unwrap();
        assert_eq!(registry.load().await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_load_keeps_unknown_platforms() {
        let (store, registry) = registry();
        store
            .set(
                PROVIDER_LIST_KEY,
                json!([{"platform": "legacy-thing", "key": "abc"}]),
            )
            .await
            .unwrap();
        let records = registry.load().await.unwrap();
        assert_eq!(records[0].platform, "legacy-thing");
    }

    #[tokio::test]
    async fn test_malformed_stored_list_is_storage_error() {
        let (store, registry) = registry();
        store.set(PROVIDER_LIST_KEY, json!(["sk-1", "sk-2"])).await.unwrap();
        assert!(matches!(registry.load().await, Err(RelayError::Storage(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_platform() {
        let records = vec![ProviderRecord {
            platform: "mistral".into(),
            secret_key: "k".into(),
            base_url: None,
            model: None,
        }];
        let err = validate_provider_list(&records).unwrap_err();
        assert!(err.to_string().contains("unknown platform 'mistral'"));
    }

    #[test]
    fn test_validate_rejects_blank_secret() {
        let records = vec![ProviderRecord::new(Platform::Openai, "   ")];
        assert!(validate_provider_list(&records).is_err());
    }

    #[test]
    fn test_validate_requires_base_url_for_self_hosted() {
        let records = vec![
            ProviderRecord::new(Platform::Openai, "sk-1"),
            ProviderRecord::new(Platform::OpenaiCompatible, "sk-2"),
        ];
        let err = validate_provider_list(&records).unwrap_err();
        assert!(err.to_string().contains("entry 1 (openai-compatible)"));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let records =
            vec![ProviderRecord::new(Platform::Openai, "sk-1").with_base_url("ftp://example.com")];
        assert!(validate_provider_list(&records).is_err());
        let records = vec![ProviderRecord::new(Platform::Openai, "sk-1").with_base_url("not a url")];
        assert!(validate_provider_list(&records).is_err());
    }

    #[test]
    fn test_validate_allows_missing_model() {
        let records = vec![ProviderRecord::new(Platform::Anthropic, "sk-ant")];
        assert!(validate_provider_list(&records).is_ok());
    }
}
