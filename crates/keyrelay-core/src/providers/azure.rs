//! Azure OpenAI deployments

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::ProviderError;
use crate::record::{Platform, ProviderRecord};
use crate::types::{ChatRequest, ChatResponse};

use super::openai::{OpenAiApiResponse, build_chat_body, from_openai_response};
use super::{ProviderAdapter, read_json_response, resolve_base_url, resolve_model};

/// Data-plane API version sent on every call
pub const AZURE_API_VERSION: &str = "2024-06-01";

/// Azure OpenAI adapter. The resolved model is used as the deployment name.
#[derive(Debug)]
pub struct AzureOpenAiAdapter {
    client: Client,
}

impl AzureOpenAiAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for AzureOpenAiAdapter {
    fn platform(&self) -> Platform {
        Platform::AzureOpenai
    }

    async fn invoke(
        &self,
        record: &ProviderRecord,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let base_url = resolve_base_url(Platform::AzureOpenai, record)?;
        let deployment = resolve_model(Platform::AzureOpenai, record, request)?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            base_url, deployment, AZURE_API_VERSION
        );
        let body = build_chat_body(None, request);

        debug!(
            "Azure OpenAI request: deployment={}, messages={}",
            deployment,
            request.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("api-key", &record.secret_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Azure OpenAI API")?;

        let api_response: OpenAiApiResponse =
            read_json_response(response, "Azure OpenAI API").await?;

        Ok(from_openai_response(
            Platform::AzureOpenai,
            api_response,
            &deployment,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_invoke_targets_deployment() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/openai/deployments/gpt4o-prod/chat/completions")
                .query_param("api-version", AZURE_API_VERSION)
                .header("api-key", "azure-secret")
                .json_body_includes(json!({"stream": false}).to_string());
            then.status(200).json_body(json!({
                "id": "chatcmpl-az",
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "from azure"},
                    "finish_reason": "stop"
                }]
            }));
        });

        let adapter = AzureOpenAiAdapter::new(Client::new());
        let record = ProviderRecord::new(Platform::AzureOpenai, "azure-secret")
            .with_base_url(format!("{}/", server.base_url()))
            .with_model("gpt4o-prod");
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };

        let response = adapter.invoke(&record, &request).await.unwrap();
        mock.assert();
        assert_eq!(response.provider, "azure-openai");
        assert_eq!(response.text(), Some("from azure"));
    }

    #[tokio::test]
    async fn test_invoke_requires_base_url() {
        let adapter = AzureOpenAiAdapter::new(Client::new());
        let record = ProviderRecord::new(Platform::AzureOpenai, "k").with_model("d");
        let err = adapter
            .invoke(&record, &ChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingBaseUrl { .. }));
    }
}
