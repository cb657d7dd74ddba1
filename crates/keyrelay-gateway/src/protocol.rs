//! JSON bodies of the admin endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response header naming the list index of the provider that answered
pub const PROVIDER_INDEX_HEADER: &str = "x-relay-provider";

/// Body of `/auth`, `/keys` and `/manage`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    /// Provider list for `/manage`; parsed separately for a precise 400
    #[serde(default)]
    pub keys: Option<Value>,
}

/// What `/keys` was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysAction {
    List,
    GetUnifiedKey,
    ResetUnifiedKey,
}

impl KeysAction {
    /// No action means "list"
    pub fn parse(action: Option<&str>) -> Option<Self> {
        match action.map(str::trim) {
            None | Some("") | Some("get_keys") | Some("list") => Some(Self::List),
            Some("get_unified_key") => Some(Self::GetUnifiedKey),
            Some("reset_unified_key") => Some(Self::ResetUnifiedKey),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedKeyResponse {
    #[serde(rename = "unifiedKey")]
    pub unified_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManageResponse {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub version: String,
}
