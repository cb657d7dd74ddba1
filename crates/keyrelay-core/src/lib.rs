//! keyrelay core
//!
//! The dispatch-and-failover engine: the stored provider list, per-platform
//! adapters that translate one generic chat request into each vendor's wire
//! format, and the sequential dispatcher that tries them in order.

pub mod dispatcher;
pub mod error;
pub mod providers;
pub mod record;
pub mod registry;
pub mod secret;
pub mod types;

pub use dispatcher::{DispatchConfig, Dispatched, Dispatcher};
pub use error::{ProviderError, ProviderFailure, RelayError};
pub use providers::{AdapterRegistry, ProviderAdapter, build_http_client};
pub use record::{Platform, ProviderRecord, mask_secret};
pub use registry::{PROVIDER_LIST_KEY, ProviderRegistry, validate_provider_list};
pub use secret::{UNIFIED_KEY_PREFIX, UNIFIED_SECRET_KEY, UnifiedSecretIssuer, mint_unified_key};
pub use types::{
    ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage, MessageContent,
};
