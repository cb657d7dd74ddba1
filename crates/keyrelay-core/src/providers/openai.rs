//! OpenAI-shaped chat completions
//!
//! Serves OpenAI itself plus every vendor that speaks the same wire format
//! (Baichuan, iFlytek Spark, Zhipu GLM, Baidu Qianfan, Moonshot Kimi,
//! SiliconFlow) and arbitrary `openai-compatible` endpoints. The message
//! history is passed through unchanged.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::record::{Platform, ProviderRecord};
use crate::types::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatUsage};

use super::{ProviderAdapter, read_json_response, resolve_base_url, resolve_model};

/// Adapter for one OpenAI-shaped platform
pub struct OpenAiChatAdapter {
    client: Client,
    platform: Platform,
}

impl std::fmt::Debug for OpenAiChatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatAdapter")
            .field("platform", &self.platform)
            .finish()
    }
}

impl OpenAiChatAdapter {
    pub fn new(client: Client, platform: Platform) -> Self {
        Self { client, platform }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiChatAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn invoke(
        &self,
        record: &ProviderRecord,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let base_url = resolve_base_url(self.platform, record)?;
        let model = resolve_model(self.platform, record, request)?;
        let url = format!("{}/chat/completions", base_url);
        let body = build_chat_body(Some(&model), request);

        debug!(
            "{} request: model={}, messages={}",
            self.platform,
            model,
            request.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", record.secret_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {} API", self.platform))?;

        let api_response: OpenAiApiResponse =
            read_json_response(response, &format!("{} API", self.platform)).await?;

        Ok(from_openai_response(self.platform, api_response, &model)?)
    }
}

/// Convert generic messages to OpenAI wire format
pub(super) fn to_openai_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    messages
        .iter()
        .map(|m| OpenAiMessage {
            role: m.role.to_string(),
            content: m.content.to_text(),
        })
        .collect()
}

/// Request body shared by OpenAI and Azure OpenAI. Azure selects the model
/// through the URL, so `model` is omitted there.
pub(super) fn build_chat_body(model: Option<&str>, request: &ChatRequest) -> Value {
    let mut body = serde_json::json!({
        "messages": to_openai_messages(&request.messages),
        "stream": false,
    });
    if let Some(model) = model {
        body["model"] = Value::String(model.to_string());
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = Value::from(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = Value::from(temperature);
    }
    body
}

/// Convert an OpenAI response to the normalized shape
pub(super) fn from_openai_response(
    platform: Platform,
    resp: OpenAiApiResponse,
    requested_model: &str,
) -> anyhow::Result<ChatResponse> {
    if resp.choices.is_empty() {
        return Err(anyhow!("{} response had no choices", platform));
    }

    let choices = resp
        .choices
        .into_iter()
        .enumerate()
        .map(|(pos, choice)| {
            ChatChoice::assistant(
                choice.index.unwrap_or(pos as u32),
                choice.message.content.unwrap_or_default(),
                choice.finish_reason,
            )
        })
        .collect();

    let usage = resp.usage.map(|u| ChatUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u
            .total_tokens
            .unwrap_or_else(|| u.prompt_tokens.saturating_add(u.completion_tokens)),
    });

    let model = resp
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| requested_model.to_string());

    Ok(ChatResponse::new(platform.as_str(), resp.id, model, choices).with_usage(usage))
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct OpenAiApiResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    index: Option<u32>,
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}
