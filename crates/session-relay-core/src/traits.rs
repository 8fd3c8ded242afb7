//! Capability traits for the underlying messaging-network client.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{ConnectionInfo, InboundMessage, SendReceipt};

/// Event emitted by a session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A pairing code must be scanned to authenticate.
    Qr(String),
    /// The session authenticated and is usable.
    Ready(ConnectionInfo),
    /// A message arrived.
    Message(InboundMessage),
    /// The session dropped, with the reason given by the network.
    Disconnected(String),
}

impl SessionEvent {
    /// Short event name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Qr(_) => "qr",
            Self::Ready(_) => "ready",
            Self::Message(_) => "message",
            Self::Disconnected(_) => "disconnected",
        }
    }
}

/// Event tagged with the generation of the client instance that emitted it.
pub type GenerationEvent = (u64, SessionEvent);

/// Handle through which a client instance reports events.
///
/// Every client instance gets its own generation number; the receiver drops
/// events from instances that have since been replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<GenerationEvent>,
}

impl EventSink {
    #[must_use]
    pub const fn new(generation: u64, tx: mpsc::UnboundedSender<GenerationEvent>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the receiver is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Session client error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Client initialization failed: {0}")]
    Init(String),
    #[error("Client not started")]
    NotStarted,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Probe failed: {0}")]
    Probe(String),
    #[error("Destroy failed: {0}")]
    Destroy(String),
}

/// A live connection to the messaging network.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Start the client. Events are reported through `events` from now on.
    async fn start(&self, events: EventSink) -> Result<(), ClientError>;

    /// Send a text message to a fully-qualified chat identifier.
    async fn send_message(&self, chat_id: &str, body: &str) -> Result<SendReceipt, ClientError>;

    /// Cheap no-op round trip used as a keep-alive.
    async fn probe(&self) -> Result<(), ClientError>;

    /// Tear the client down. The instance is not reused afterwards.
    async fn destroy(&self) -> Result<(), ClientError>;
}

/// Builds a fresh client instance for every (re)initialization.
pub trait SessionClientFactory: Send + Sync {
    /// Construct a new, not yet started client.
    ///
    /// # Errors
    /// Returns error if the client cannot be constructed.
    fn create(&self) -> Result<Arc<dyn SessionClient>, ClientError>;
}
