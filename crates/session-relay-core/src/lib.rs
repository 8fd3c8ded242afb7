//! Core abstractions for the session relay.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionState`, `ConnectionInfo`, `StatsSnapshot` - Session data model
//! - `SessionClient` / `SessionClientFactory` - The messaging-network capability
//! - `RelayConfig` - Layered configuration
//! - Recipient normalization and outbound message templates

pub mod config;
pub mod recipient;
pub mod templates;
pub mod traits;
pub mod types;

pub use config::{ConfigError, RelayConfig};
pub use recipient::normalize_recipient;
pub use templates::{AutoReply, MessageTemplates};
pub use traits::{ClientError, EventSink, SessionClient, SessionClientFactory, SessionEvent};
pub use types::{
    ConnectionInfo, InboundMessage, MemorySample, MemorySnapshot, QueueStats, SendReceipt,
    SessionState, StatsSnapshot,
};
