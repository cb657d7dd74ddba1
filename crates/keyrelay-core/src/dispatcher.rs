//! Sequential failover across the stored provider list

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderFailure, RelayError};
use crate::providers::AdapterRegistry;
use crate::record::ProviderRecord;
use crate::registry::ProviderRegistry;
use crate::types::{ChatRequest, ChatResponse};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DEADLINE_MARGIN: Duration = Duration::from_secs(2);

/// Time limits for one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Upper bound on a single provider call
    pub provider_timeout: Duration,
    /// Slack added on top of `provider_timeout × providers`
    pub deadline_margin: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            deadline_margin: DEFAULT_DEADLINE_MARGIN,
        }
    }
}

impl DispatchConfig {
    /// Whole-request budget for a list of `count` providers
    pub fn overall_budget(&self, count: usize) -> Duration {
        self.provider_timeout
            .saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
            .saturating_add(self.deadline_margin)
    }
}

/// A successful dispatch
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub response: ChatResponse,
    /// Position of the serving provider in the list
    pub provider_index: usize,
}

/// Tries providers in stored order; the first success wins.
///
/// Stateless between requests: every dispatch starts again at index 0.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ProviderRegistry,
    adapters: Arc<AdapterRegistry>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: ProviderRegistry,
        adapters: AdapterRegistry,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            adapters: Arc::new(adapters),
            config,
        }
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Load the current list and dispatch over it
    pub async fn dispatch(&self, request: &ChatRequest) -> Result<Dispatched, RelayError> {
        let records = self.registry.load().await?;
        self.dispatch_over(&records, request).await
    }

    /// Dispatch over an explicit list
    pub async fn dispatch_over(
        &self,
        records: &[ProviderRecord],
        request: &ChatRequest,
    ) -> Result<Dispatched, RelayError> {
        let deadline = Instant::now() + self.config.overall_budget(records.len());
        self.dispatch_until(records, request, deadline).await
    }

    async fn dispatch_until(
        &self,
        records: &[ProviderRecord],
        request: &ChatRequest,
        deadline: Instant,
    ) -> Result<Dispatched, RelayError> {
        if records.is_empty() {
            return Err(RelayError::NoProvidersConfigured);
        }

        let mut failures: Vec<ProviderFailure> = Vec::with_capacity(records.len());
        let mut deadline_exceeded = false;

        for (idx, record) in records.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                deadline_exceeded = true;
            }
            if deadline_exceeded {
                warn!(
                    "Dispatch deadline exhausted; skipping {} remaining provider(s)",
                    records.len() - idx
                );
                break;
            }

            debug!(
                "Trying provider {} ({}/{})",
                record.platform,
                idx + 1,
                records.len()
            );

            let timeout = self.config.provider_timeout.min(remaining);
            match self.attempt(record, request, timeout).await {
                Ok(response) => {
                    if idx > 0 {
                        info!(
                            "Request succeeded on failover provider {} (index {})",
                            record.platform, idx
                        );
                    }
                    return Ok(Dispatched {
                        response,
                        provider_index: idx,
                    });
                }
                Err(e) => {
                    // A call cut short by the overall budget leaves nothing for the rest
                    if matches!(e, ProviderError::Timeout { .. })
                        && timeout < self.config.provider_timeout
                    {
                        deadline_exceeded = true;
                    }
                    let message = e.to_string();
                    warn!("Provider {} (index {}) failed: {}", record.platform, idx, message);
                    failures.push(ProviderFailure {
                        index: idx,
                        platform: record.platform.clone(),
                        message,
                    });
                }
            }

            if let Some(next) = records.get(idx + 1).filter(|_| !deadline_exceeded) {
                info!("Failing over from {} to {}", record.platform, next.platform);
            }
        }

        Err(RelayError::AllProvidersFailed {
            failures,
            deadline_exceeded,
        })
    }

    async fn attempt(
        &self,
        record: &ProviderRecord,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<ChatResponse, ProviderError> {
        let adapter = self.adapters.resolve(&record.platform)?;

        match tokio::time::timeout(timeout, adapter.invoke(record, request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                platform: adapter.platform(),
                timeout,
            }),
        }
    }
}
