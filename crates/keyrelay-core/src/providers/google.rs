//! Google Gemini provider (generateContent)

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::record::{Platform, ProviderRecord};
use crate::types::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage};

use super::{ProviderAdapter, read_json_response, resolve_base_url, resolve_model};

#[derive(Debug)]
pub struct GoogleAdapter {
    client: Client,
}

impl GoogleAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn platform(&self) -> Platform {
        Platform::Google
    }

    async fn invoke(
        &self,
        record: &ProviderRecord,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let base_url = resolve_base_url(Platform::Google, record)?;
        let model = resolve_model(Platform::Google, record, request)?;
        let url = format!("{}/v1beta/models/{}:generateContent", base_url, model);
        let body = build_body(request);

        debug!(
            "Gemini request: model={}, messages={}",
            model,
            request.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &record.secret_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        let api_response: GeminiResponse = read_json_response(response, "Gemini API").await?;

        Ok(from_gemini_response(api_response, &model)?)
    }
}

/// Gemini calls the assistant role "model"; system turns go to `systemInstruction`
fn to_gemini_contents(messages: &[ChatMessage]) -> Vec<GeminiContent> {
    messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| GeminiContent {
            role: match m.role {
                ChatRole::Assistant => "model".to_string(),
                _ => "user".to_string(),
            },
            parts: vec![GeminiPart {
                text: Some(m.content.to_text()),
            }],
        })
        .collect()
}

fn build_body(request: &ChatRequest) -> Value {
    let mut body = serde_json::json!({
        "contents": to_gemini_contents(&request.messages),
    });

    if let Some(system) = request.system_prompt() {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{"text": system}]
        });
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), Value::from(temperature));
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }

    body
}

fn from_gemini_response(resp: GeminiResponse, model: &str) -> anyhow::Result<ChatResponse> {
    if resp.candidates.is_empty() {
        return Err(anyhow!("Gemini response had no candidates"));
    }

    let choices = resp
        .candidates
        .into_iter()
        .enumerate()
        .map(|(pos, candidate)| {
            let text = candidate
                .content
                .map(|c| {
                    c.parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            let finish_reason = candidate.finish_reason.map(|reason| match reason.as_str() {
                "STOP" => "stop".to_string(),
                "MAX_TOKENS" => "length".to_string(),
                other => other.to_ascii_lowercase(),
            });
            ChatChoice::assistant(candidate.index.unwrap_or(pos as u32), text, finish_reason)
        })
        .collect();

    let usage = resp.usage_metadata.map(|u| ChatUsage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u
            .total_token_count
            .unwrap_or_else(|| u.prompt_token_count.saturating_add(u.candidates_token_count)),
    });

    let model = resp
        .model_version
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| model.to_string());

    Ok(ChatResponse::new(Platform::Google.as_str(), resp.response_id, model, choices)
        .with_usage(usage))
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion", default)]
    model_version: Option<String>,
    #[serde(rename = "responseId", default)]
    response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
    #[serde(default)]
    index: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: Option<u32>,
}
