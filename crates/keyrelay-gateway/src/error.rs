//! Gateway errors and their HTTP mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keyrelay_core::RelayError;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("admin password is not configured")]
    AdminNotConfigured,

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AdminNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Relay(RelayError::NoProvidersConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Relay(RelayError::InvalidProviderList(_)) => StatusCode::BAD_REQUEST,
            Self::Relay(RelayError::AllProvidersFailed { .. } | RelayError::Storage(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable reason
    pub fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Unauthorized => "unauthorized",
            Self::BadRequest(_) | Self::Relay(RelayError::InvalidProviderList(_)) => "bad_request",
            Self::AdminNotConfigured => "admin_not_configured",
            Self::Relay(RelayError::NoProvidersConfigured) => "no_providers_configured",
            Self::Relay(RelayError::AllProvidersFailed { .. }) => "all_providers_failed",
            Self::Relay(RelayError::Storage(_)) => "storage_error",
        }
    }

    /// Text sent to the caller. Storage details stay in the log.
    fn public_message(&self) -> String {
        match self {
            Self::Relay(RelayError::Storage(_)) => "credential store unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl ApiError {
    /// `{"error": {code, message[, detail]}}`
    pub fn body(&self) -> Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.public_message(),
        });
        if let Self::Relay(relay) = self {
            if let Some(detail) = relay.last_provider_error() {
                error["detail"] = json!(detail);
            }
        }
        json!({ "error": error })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", self.code(), self);
        } else {
            warn!("Request rejected ({}): {}", self.code(), self);
        }

        (status, Json(self.body())).into_response()
    }
}
