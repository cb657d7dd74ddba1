//! Error taxonomy for the dispatch path

use std::time::Duration;

use thiserror::Error;

use crate::record::Platform;

/// Failure of a single provider entry. The dispatcher turns every one of
/// these into "try the next provider".
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported platform '{0}'")]
    UnsupportedPlatform(String),

    #[error("no model configured for {platform} provider")]
    MissingModel { platform: Platform },

    #[error("{platform} provider requires a baseURL")]
    MissingBaseUrl { platform: Platform },

    #[error("{platform} provider timed out after {}ms", .timeout.as_millis())]
    Timeout { platform: Platform, timeout: Duration },

    #[error("{0:#}")]
    Call(#[from] anyhow::Error),
}

/// One failed attempt, kept for the aggregated error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// Position in the provider list
    pub index: usize,
    pub platform: String,
    pub message: String,
}

/// Terminal outcomes that reach the caller
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no providers configured")]
    NoProvidersConfigured,

    #[error("{}", summarize_failures(.failures, .deadline_exceeded))]
    AllProvidersFailed {
        failures: Vec<ProviderFailure>,
        deadline_exceeded: bool,
    },

    #[error("invalid provider list: {0}")]
    InvalidProviderList(String),

    #[error("credential store error: {0:#}")]
    Storage(anyhow::Error),
}

impl RelayError {
    /// Message of the last provider attempted, for diagnosis
    pub fn last_provider_error(&self) -> Option<&str> {
        match self {
            Self::AllProvidersFailed { failures, .. } => {
                failures.last().map(|f| f.message.as_str())
            }
            _ => None,
        }
    }
}

fn summarize_failures(failures: &[ProviderFailure], deadline_exceeded: &bool) -> String {
    let mut summary = format!("all providers failed ({} attempted", failures.len());
    if *deadline_exceeded {
        summary.push_str(", dispatch deadline exceeded");
    }
    summary.push(')');
    if let Some(last) = failures.last() {
        summary.push_str(": ");
        summary.push_str(&last.message);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_call_error_keeps_cause_chain() {
        let err = anyhow!("connection refused").context("Failed to send request to kimi");
        let provider_err = ProviderError::from(err);
        let msg = provider_err.to_string();
        assert!(msg.contains("Failed to send request to kimi"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ProviderError::Timeout {
            platform: Platform::Google,
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "google provider timed out after 1500ms");
    }

    #[test]
    fn test_all_failed_reports_last_error() {
        let err = RelayError::AllProvidersFailed {
            failures: vec![
                ProviderFailure {
                    index: 0,
                    platform: "openai".into(),
                    message: "first".into(),
                },
                ProviderFailure {
                    index: 1,
                    platform: "kimi".into(),
                    message: "second".into(),
                },
            ],
            deadline_exceeded: false,
        };
        assert_eq!(err.last_provider_error(), Some("second"));
        assert_eq!(err.to_string(), "all providers failed (2 attempted): second");
    }

    #[test]
    fn test_deadline_noted_in_summary() {
        let err = RelayError::AllProvidersFailed {
            failures: vec![],
            deadline_exceeded: true,
        };
        assert!(err.to_string().contains("deadline exceeded"));
        assert_eq!(err.last_provider_error(), None);
    }
}
