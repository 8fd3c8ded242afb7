//! Explicit event-to-transition table for the session lifecycle.
//!
//! [`transition`] is pure: it maps the current state and a trigger to the
//! next state plus the ordered side effects the manager must run. Keeping
//! the table here makes every reachable transition enumerable in tests.

use session_relay_core::SessionState;

/// Something that can move the session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// `initialize()` was called.
    InitRequested,
    /// The client emitted a pairing code.
    Qr,
    /// The client authenticated.
    Ready,
    /// The client dropped, or could not be constructed/started.
    Disconnected,
    /// Reconnect scheduling armed a timer.
    ReconnectArmed,
    /// The armed reconnect timer elapsed.
    TimerFired,
    /// An operator asked for an immediate reconnect.
    ForceReconnect,
}

impl Trigger {
    pub const ALL: [Self; 7] = [
        Self::InitRequested,
        Self::Qr,
        Self::Ready,
        Self::Disconnected,
        Self::ReconnectArmed,
        Self::TimerFired,
        Self::ForceReconnect,
    ];
}

/// Side effect of a transition.
///
/// Immediate effects are applied together with the state change. Suspending
/// ones run afterwards; client teardown and start run on a task of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    CancelReconnectTimer,
    StopKeepAlive,
    StartKeepAlive,
    CaptureConnection,
    ClearConnection,
    ResetAttempts,
    PersistQr,
    NotifyConnected,
    NotifyDisconnected,
    ScheduleReconnect,
    DestroyClient,
    StartClient,
}

impl Effect {
    /// Effects that suspend (I/O on the client, disk or network).
    ///
    /// Everything else only touches manager state and is applied together
    /// with the state change so readers never see a half-applied transition.
    #[must_use]
    pub const fn is_async(self) -> bool {
        matches!(
            self,
            Self::PersistQr
                | Self::NotifyConnected
                | Self::NotifyDisconnected
                | Self::DestroyClient
                | Self::StartClient
        )
    }
}

/// Result of a valid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: &'static [Effect],
}

const NONE: &[Effect] = &[];

const INIT: &[Effect] = &[Effect::StartClient];

const ON_QR: &[Effect] = &[
    Effect::CancelReconnectTimer,
    Effect::StopKeepAlive,
    Effect::ClearConnection,
    Effect::ResetAttempts,
    Effect::PersistQr,
];

const ON_READY: &[Effect] = &[
    Effect::CaptureConnection,
    Effect::ResetAttempts,
    Effect::CancelReconnectTimer,
    Effect::StartKeepAlive,
    Effect::NotifyConnected,
];

const ON_DISCONNECT_FROM_READY: &[Effect] = &[
    Effect::StopKeepAlive,
    Effect::ClearConnection,
    Effect::NotifyDisconnected,
    Effect::ScheduleReconnect,
];

const ON_DISCONNECT: &[Effect] = &[
    Effect::StopKeepAlive,
    Effect::ClearConnection,
    Effect::ScheduleReconnect,
];

const ON_TIMER: &[Effect] = &[Effect::DestroyClient, Effect::StartClient];

const ON_FORCE: &[Effect] = &[
    Effect::CancelReconnectTimer,
    Effect::StopKeepAlive,
    Effect::ClearConnection,
    Effect::DestroyClient,
    Effect::StartClient,
];

/// Look up the transition for `trigger` in state `from`.
///
/// Returns `None` when the trigger is not meaningful in that state; the
/// caller ignores it.
#[must_use]
pub const fn transition(from: SessionState, trigger: Trigger) -> Option<Transition> {
    use SessionState::{
        Authenticating, AwaitingScan, Disconnected, Ready, ReconnectScheduled, Uninitialized,
    };

    let (next, effects) = match (from, trigger) {
        (Uninitialized, Trigger::InitRequested) => (Authenticating, INIT),
        (_, Trigger::InitRequested) => return None,

        (Uninitialized, Trigger::Qr | Trigger::Ready | Trigger::Disconnected) => return None,
        (_, Trigger::Qr) => (AwaitingScan, ON_QR),
        (_, Trigger::Ready) => (Ready, ON_READY),
        (Ready, Trigger::Disconnected) => (Disconnected, ON_DISCONNECT_FROM_READY),
        (_, Trigger::Disconnected) => (Disconnected, ON_DISCONNECT),

        (Disconnected, Trigger::ReconnectArmed) => (ReconnectScheduled, NONE),
        (_, Trigger::ReconnectArmed) => return None,

        (ReconnectScheduled, Trigger::TimerFired) => (Authenticating, ON_TIMER),
        (_, Trigger::TimerFired) => return None,

        (_, Trigger::ForceReconnect) => (Authenticating, ON_FORCE),
    };

    Some(Transition { next, effects })
}
