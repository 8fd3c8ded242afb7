//! Transport layer for the session relay.
//!
//! Provides:
//! - Wire bodies for the control API (JSON, camelCase)
//! - HTTP router with bearer authentication (feature: http)
//! - Status page

pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
mod page;

pub use protocol::{ErrorBody, SendResponse};

#[cfg(feature = "http")]
pub use http::{ApiError, AppState, router};
