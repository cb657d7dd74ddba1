//! Anthropic Messages API

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::record::{Platform, ProviderRecord};
use crate::types::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage};

use super::{ProviderAdapter, read_json_response, resolve_base_url, resolve_model};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory upstream; used when the caller sends none
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug)]
pub struct AnthropicAdapter {
    client: Client,
}

impl AnthropicAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn platform(&self) -> Platform {
        Platform::Anthropic
    }

    async fn invoke(
        &self,
        record: &ProviderRecord,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let base_url = resolve_base_url(Platform::Anthropic, record)?;
        let model = resolve_model(Platform::Anthropic, record, request)?;
        let url = format!("{}/v1/messages", base_url);

        let body = AnthropicRequest {
            model: model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system_prompt(),
            messages: to_anthropic_messages(&request.messages),
            temperature: request.temperature,
        };

        debug!(
            "Anthropic request: model={}, messages={}",
            model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &record.secret_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let api_response: AnthropicApiResponse =
            read_json_response(response, "Anthropic API").await?;

        debug!(
            "Anthropic response: stop_reason={:?}, blocks={}",
            api_response.stop_reason,
            api_response.content.len()
        );

        Ok(from_anthropic_response(api_response, &model)?)
    }
}

/// System turns are lifted into the top-level `system` field, so only user
/// and assistant turns remain here.
fn to_anthropic_messages(messages: &[ChatMessage]) -> Vec<AnthropicMessage> {
    messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| AnthropicMessage {
            role: m.role.to_string(),
            content: m.content.to_text(),
        })
        .collect()
}

fn from_anthropic_response(
    resp: AnthropicApiResponse,
    requested_model: &str,
) -> anyhow::Result<ChatResponse> {
    let texts: Vec<String> = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicBlock::Text { text } => Some(text),
            AnthropicBlock::Other => None,
        })
        .collect();

    if texts.is_empty() && resp.stop_reason.is_none() {
        return Err(anyhow!("Anthropic response had no content"));
    }

    let finish_reason = resp.stop_reason.as_deref().map(|reason| {
        match reason {
            "end_turn" | "stop_sequence" => "stop",
            "max_tokens" => "length",
            other => other,
        }
        .to_string()
    });

    let choice = ChatChoice::assistant(0, texts.join(""), finish_reason);
    let model = resp
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| requested_model.to_string());

    Ok(ChatResponse::new(
        Platform::Anthropic.as_str(),
        resp.id,
        model,
        vec![choice],
    )
    .with_usage(
        resp.usage
            .map(|u| ChatUsage::new(u.input_tokens, u.output_tokens)),
    ))
}

// ── Anthropic wire types ──

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicApiResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
