//! Session data model.

use std::{fmt, time::Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of the messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No client has been started yet.
    Uninitialized,
    /// The client is waiting for the pairing code to be scanned.
    AwaitingScan,
    /// The client is starting or restoring a previous authentication.
    Authenticating,
    /// The session is connected and can send messages.
    Ready,
    /// The session dropped and no reconnect is armed.
    Disconnected,
    /// A reconnect timer is armed.
    ReconnectScheduled,
}

impl SessionState {
    /// All states, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Uninitialized,
        Self::AwaitingScan,
        Self::Authenticating,
        Self::Ready,
        Self::Disconnected,
        Self::ReconnectScheduled,
    ];

    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingScan => "awaiting_scan",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::ReconnectScheduled => "reconnect_scheduled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the connected account. Present only while the session is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Display name pushed by the account.
    pub display_name: String,
    /// Account identifier on the messaging network (usually a phone number).
    pub account_id: String,
}

impl ConnectionInfo {
    #[must_use]
    pub fn new(display_name: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            account_id: account_id.into(),
        }
    }
}

/// A message received from the messaging network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Network message identifier.
    pub id: String,
    /// Fully-qualified sender address.
    pub from: String,
    /// Text body.
    pub body: String,
    /// Send time reported by the network (Unix epoch seconds).
    pub timestamp: i64,
    /// Network message type (`chat`, `image`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the message carries an attachment.
    pub has_media: bool,
}

impl InboundMessage {
    /// Create a plain text message stamped with the current time.
    #[must_use]
    pub fn text(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            body: body.into(),
            timestamp: chrono::Utc::now().timestamp(),
            kind: "chat".to_string(),
            has_media: false,
        }
    }
}

/// Acknowledgement returned by the network for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
    /// Unix epoch seconds.
    pub timestamp: i64,
}

/// One reading of process memory. Only the latest reading is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub resident_set_bytes: u64,
    pub virtual_bytes: u64,
    #[serde(skip)]
    pub taken_at: Instant,
}

impl MemorySample {
    #[must_use]
    pub fn new(resident_set_bytes: u64, virtual_bytes: u64) -> Self {
        Self {
            resident_set_bytes,
            virtual_bytes,
            taken_at: Instant::now(),
        }
    }

    /// Resident set size in whole megabytes.
    #[must_use]
    pub const fn resident_set_mb(&self) -> u64 {
        self.resident_set_bytes / (1024 * 1024)
    }
}

/// Counters for the inbound message queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub processed: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Read-only projection of the lifecycle manager, computed on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub connected: bool,
    pub state: SessionState,
    pub uptime_secs: u64,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub reconnect_exhausted: bool,
    pub next_reconnect_ms: Option<u64>,
    pub message_count: u64,
    pub queue: QueueStats,
    pub memory: Option<MemorySnapshot>,
    pub connection: Option<ConnectionInfo>,
    /// ISO-8601 time the snapshot was taken.
    pub timestamp: String,
}

/// Serializable view of a [`MemorySample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub resident_set_bytes: u64,
    pub virtual_bytes: u64,
    pub resident_set_mb: u64,
}

impl From<MemorySample> for MemorySnapshot {
    fn from(sample: MemorySample) -> Self {
        Self {
            resident_set_bytes: sample.resident_set_bytes,
            virtual_bytes: sample.virtual_bytes,
            resident_set_mb: sample.resident_set_mb(),
        }
    }
}
