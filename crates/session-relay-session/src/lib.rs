//! Session orchestration for the relay.
//!
//! Provides:
//! - `SessionManager` - Lifecycle state machine, reconnects and keep-alive
//! - `ReconnectPolicy` - Linear capped backoff with an attempt budget
//! - `BoundedQueue` - Paced single-consumer delivery queue
//! - `MemoryGuard` - Resident-memory ceiling enforcement
//! - `BackendNotifier` - Best-effort backend notifications
//! - `LoopbackFactory` - In-process session client

pub mod backoff;
pub mod lifecycle;
pub mod loopback;
pub mod manager;
pub mod memory;
pub mod notifier;
pub mod queue;

pub use backoff::ReconnectPolicy;
pub use loopback::LoopbackFactory;
pub use manager::{ManagerOptions, SendError, SessionManager};
pub use memory::{MemoryGuard, MemoryProbe, ProcessMemoryProbe};
pub use notifier::{BackendNotifier, NotificationKind};
pub use queue::{BoundedQueue, QueueEntry, QueueError};
