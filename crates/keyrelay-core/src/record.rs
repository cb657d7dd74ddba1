//! Provider records and the closed set of supported platforms

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Known upstream platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Openai,
    AzureOpenai,
    Anthropic,
    Google,
    Llama,
    Baichuan,
    Iflytek,
    Zhipuai,
    Wenxinyiyan,
    Kimi,
    Siliconflow,
    OpenaiCompatible,
}

impl Platform {
    pub const ALL: [Platform; 12] = [
        Platform::Openai,
        Platform::AzureOpenai,
        Platform::Anthropic,
        Platform::Google,
        Platform::Llama,
        Platform::Baichuan,
        Platform::Iflytek,
        Platform::Zhipuai,
        Platform::Wenxinyiyan,
        Platform::Kimi,
        Platform::Siliconflow,
        Platform::OpenaiCompatible,
    ];

    /// Tag used in persisted provider lists
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::AzureOpenai => "azure-openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Llama => "llama",
            Self::Baichuan => "baichuan",
            Self::Iflytek => "iflytek",
            Self::Zhipuai => "zhipuai",
            Self::Wenxinyiyan => "wenxinyiyan",
            Self::Kimi => "kimi",
            Self::Siliconflow => "siliconflow",
            Self::OpenaiCompatible => "openai-compatible",
        }
    }

    /// Endpoint root used when a record carries no `baseURL`.
    /// `None` means the record must supply one.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("https://api.openai.com/v1"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Google => Some("https://generativelanguage.googleapis.com"),
            Self::Baichuan => Some("https://api.baichuan-ai.com/v1"),
            Self::Iflytek => Some("https://spark-api-open.xf-yun.com/v1"),
            Self::Zhipuai => Some("https://open.bigmodel.cn/api/paas/v4"),
            Self::Wenxinyiyan => Some("https://qianfan.baidubce.com/v2"),
            Self::Kimi => Some("https://api.moonshot.cn/v1"),
            Self::Siliconflow => Some("https://api.siliconflow.cn/v1"),
            Self::AzureOpenai | Self::Llama | Self::OpenaiCompatible => None,
        }
    }

    pub fn requires_base_url(self) -> bool {
        self.default_base_url().is_none()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ProviderError::UnsupportedPlatform(tag.to_string()))
    }
}

/// One configured upstream credential.
///
/// `platform` stays a raw tag so a stored list with an unknown platform still
/// loads; the entry fails on its own when it is attempted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub platform: String,
    #[serde(rename = "secretKey", alias = "key", alias = "secret_key")]
    pub secret_key: String,
    #[serde(
        rename = "baseURL",
        alias = "baseUrl",
        alias = "base_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("platform", &self.platform)
            .field("secret_key", &mask_secret(&self.secret_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderRecord {
    pub fn new(platform: Platform, secret_key: impl Into<String>) -> Self {
        Self {
            platform: platform.as_str().to_string(),
            secret_key: secret_key.into(),
            base_url: None,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn resolve_platform(&self) -> Result<Platform, ProviderError> {
        self.platform.parse()
    }

    /// `baseURL` if set and non-blank
    pub fn configured_base_url(&self) -> Option<&str> {
        self.base_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// `model` if set and non-blank
    pub fn configured_model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}
