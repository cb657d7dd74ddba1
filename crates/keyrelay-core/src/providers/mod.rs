//! Provider adapters
//!
//! Each platform family implements [`ProviderAdapter`]; adapters are looked up
//! by [`Platform`] through an [`AdapterRegistry`]. Every adapter returns the
//! normalized [`ChatResponse`].

pub mod anthropic;
pub mod azure;
pub mod google;
pub mod ollama;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::ProviderError;
use crate::record::{Platform, ProviderRecord};
use crate::types::{ChatRequest, ChatResponse};

pub use anthropic::AnthropicAdapter;
pub use azure::AzureOpenAiAdapter;
pub use google::GoogleAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiChatAdapter;

/// Upstream error bodies are cut to this many characters
const MAX_ERROR_BODY_CHARS: usize = 512;

/// One platform's wire translation
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Platform this adapter is registered under
    fn platform(&self) -> Platform;

    /// Call the upstream for `record` and normalize its answer
    async fn invoke(
        &self,
        record: &ProviderRecord,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError>;
}

/// Lookup table from platform to adapter
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with an adapter for every known platform, sharing one client
    pub fn with_defaults(client: Client) -> Self {
        let mut registry = Self::empty();
        for platform in Platform::ALL {
            let adapter: Arc<dyn ProviderAdapter> = match platform {
                Platform::AzureOpenai => Arc::new(AzureOpenAiAdapter::new(client.clone())),
                Platform::Anthropic => Arc::new(AnthropicAdapter::new(client.clone())),
                Platform::Google => Arc::new(GoogleAdapter::new(client.clone())),
                Platform::Llama => Arc::new(OllamaAdapter::new(client.clone())),
                Platform::Openai
                | Platform::Baichuan
                | Platform::Iflytek
                | Platform::Zhipuai
                | Platform::Wenxinyiyan
                | Platform::Kimi
                | Platform::Siliconflow
                | Platform::OpenaiCompatible => {
                    Arc::new(OpenAiChatAdapter::new(client.clone(), platform))
                }
            };
            registry.register(adapter);
        }
        registry
    }

    /// Add or replace the adapter for its platform
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    /// Adapter for a raw platform tag
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let platform: Platform = tag.parse()?;
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or_else(|| ProviderError::UnsupportedPlatform(tag.to_string()))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// HTTP client shared by all adapters
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Record model first, then the caller's model; no platform defaults
pub(crate) fn resolve_model(
    platform: Platform,
    record: &ProviderRecord,
    request: &ChatRequest,
) -> Result<String, ProviderError> {
    record
        .configured_model()
        .or_else(|| {
            request
                .model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
        })
        .map(str::to_string)
        .ok_or(ProviderError::MissingModel { platform })
}

/// Record `baseURL` if supplied, else the platform default, without a trailing slash
pub(crate) fn resolve_base_url(
    platform: Platform,
    record: &ProviderRecord,
) -> Result<String, ProviderError> {
    record
        .configured_base_url()
        .or_else(|| platform.default_base_url())
        .map(|url| url.trim_end_matches('/').to_string())
        .ok_or(ProviderError::MissingBaseUrl { platform })
}

/// Check the status and decode a JSON body, describing failures with `label`
pub(crate) async fn read_json_response<T: DeserializeOwned>(
    response: reqwest::Response,
    label: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(anyhow!(
            "{} request failed with status {}: {}",
            label,
            status,
            truncate_error_body(&error_text)
        ));
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", label))
}

fn truncate_error_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{}…", cut)
}
