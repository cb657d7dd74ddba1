//! Self-hosted Llama through Ollama's `/api/generate`
//!
//! The generate endpoint is single-turn: only the most recent user message is
//! sent as the prompt and earlier history is dropped.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::record::{Platform, ProviderRecord};
use crate::types::{ChatChoice, ChatRequest, ChatResponse, ChatUsage};

use super::{ProviderAdapter, read_json_response, resolve_base_url, resolve_model};

#[derive(Debug)]
pub struct OllamaAdapter {
    client: Client,
}

impl OllamaAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn platform(&self) -> Platform {
        Platform::Llama
    }

    async fn invoke(
        &self,
        record: &ProviderRecord,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let base_url = resolve_base_url(Platform::Llama, record)?;
        let model = resolve_model(Platform::Llama, record, request)?;
        let body = build_generate_request(&model, request)?;
        let url = format!("{}/api/generate", base_url);

        debug!(
            "Ollama request: model={}, prompt_chars={}, dropped_messages={}",
            model,
            body.prompt.len(),
            request.messages.len().saturating_sub(1)
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(token) = bearer_token(&record.secret_key) {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Ollama API")?;

        let api_response: OllamaGenerateResponse =
            read_json_response(response, "Ollama API").await?;

        Ok(from_generate_response(api_response, &model))
    }
}

/// Local Ollama needs no auth; `-` or blank means "send no header"
fn bearer_token(secret: &str) -> Option<&str> {
    let secret = secret.trim();
    (!secret.is_empty() && secret != "-").then_some(secret)
}

fn build_generate_request(
    model: &str,
    request: &ChatRequest,
) -> anyhow::Result<OllamaGenerateRequest> {
    let prompt = request
        .last_user_message()
        .map(|m| m.content.to_text())
        .ok_or_else(|| anyhow!("Ollama generate needs at least one user message"))?;

    let options = if request.max_tokens.is_some() || request.temperature.is_some() {
        Some(OllamaOptions {
            num_predict: request.max_tokens,
            temperature: request.temperature,
        })
    } else {
        None
    };

    Ok(OllamaGenerateRequest {
        model: model.to_string(),
        prompt,
        stream: false,
        options,
    })
}

fn from_generate_response(resp: OllamaGenerateResponse, requested_model: &str) -> ChatResponse {
    let finish_reason = resp
        .done_reason
        .or_else(|| resp.done.then(|| "stop".to_string()));

    let usage = match (resp.prompt_eval_count, resp.eval_count) {
        (None, None) => None,
        (prompt, completion) => Some(ChatUsage::new(
            prompt.unwrap_or(0),
            completion.unwrap_or(0),
        )),
    };

    let model = resp
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| requested_model.to_string());

    ChatResponse::new(
        Platform::Llama.as_str(),
        None,
        model,
        vec![ChatChoice::assistant(0, resp.response, finish_reason)],
    )
    .with_usage(usage)
}

// ── Ollama wire types ──

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}
