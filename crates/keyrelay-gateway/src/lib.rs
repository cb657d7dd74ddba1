//! HTTP control plane and proxy endpoint
//!
//! Serves the admin endpoints (`/auth`, `/keys`, `/manage`) and the
//! authenticated chat proxy (`/proxy`, `/v1/chat/completions`), both at the
//! root and under `/api`.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::ApiError;
pub use server::{GatewayServer, GatewayState};
