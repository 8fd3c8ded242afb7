//! Session lifecycle manager.
//!
//! Owns the connection state of the single messaging session. Client events,
//! reconnect timers and operator commands are funnelled into one control
//! task, so transitions are applied strictly one at a time. Client start and
//! teardown are spawned off that task with a timeout, so a stuck client never
//! delays event handling. Readers ([`SessionManager::stats`],
//! [`SessionManager::send_text`]) only take a short lock and never wait on the
//! control task.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use futures::FutureExt;
use serde_json::json;
use session_relay_core::{
    AutoReply, ClientError, ConnectionInfo, EventSink, InboundMessage, RelayConfig, SendReceipt,
    SessionClient, SessionClientFactory, SessionEvent, SessionState, StatsSnapshot,
    normalize_recipient, traits::GenerationEvent,
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    backoff::ReconnectPolicy,
    lifecycle::{Effect, Trigger, transition},
    memory::MemoryGuard,
    notifier::{BackendNotifier, NotificationKind, NotifyError},
    queue::{BoundedQueue, JobError, QueueEntry},
};

/// File written into the artifacts directory on every pairing code.
pub const QR_ARTIFACT: &str = "qr.txt";

/// Error sending an outbound message.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Session not connected (state: {0})")]
    NotReady(SessionState),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Tunables for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub reconnect: ReconnectPolicy,
    pub keep_alive_interval: Duration,
    /// Upper bound on one client `start` or `destroy` call.
    pub client_timeout: Duration,
    pub queue_capacity: usize,
    pub queue_pacing: Duration,
    /// Where the pairing code is written; `None` keeps it in memory only.
    pub artifacts_dir: Option<PathBuf>,
    pub auto_reply: AutoReply,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl ManagerOptions {
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
            keep_alive_interval: config.keep_alive_interval(),
            client_timeout: config.client_timeout(),
            queue_capacity: config.queue.capacity,
            queue_pacing: Duration::from_millis(config.queue.pacing_ms),
            artifacts_dir: Some(config.artifacts_dir.clone()),
            auto_reply: config.auto_reply.clone(),
        }
    }
}

enum Command {
    Initialize,
    ForceReconnect,
    ReconnectTimerFired { timer_id: u64 },
}

/// Payload carried alongside a trigger.
#[derive(Default)]
struct EventContext {
    qr: Option<String>,
    connection: Option<ConnectionInfo>,
    reason: Option<String>,
}

/// Client teardown and startup requested by one transition.
#[derive(Default)]
struct ClientCycle {
    retire: Option<Arc<dyn SessionClient>>,
    launch: Option<u64>,
}

struct ArmedTimer {
    id: u64,
    delay: Duration,
    handle: JoinHandle<()>,
}

struct Lifecycle {
    state: SessionState,
    connection: Option<ConnectionInfo>,
    policy: ReconnectPolicy,
    reconnect_exhausted: bool,
    /// Generation of the current client instance; events from older ones are dropped.
    generation: u64,
    client: Option<Arc<dyn SessionClient>>,
    reconnect_timer: Option<ArmedTimer>,
    timer_seq: u64,
    keep_alive: Option<JoinHandle<()>>,
    qr: Option<String>,
    stopped: bool,
}

impl Lifecycle {
    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.handle.abort();
        }
    }

    fn stop_keep_alive(&mut self) {
        if let Some(task) = self.keep_alive.take() {
            task.abort();
        }
    }
}

struct Inner {
    lifecycle: Mutex<Lifecycle>,
    factory: Arc<dyn SessionClientFactory>,
    notifier: BackendNotifier,
    memory: Arc<MemoryGuard>,
    queue: BoundedQueue,
    keep_alive_interval: Duration,
    client_timeout: Duration,
    artifacts_dir: Option<PathBuf>,
    auto_reply: AutoReply,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<GenerationEvent>,
    message_count: AtomicU64,
    started_at: Instant,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the session lifecycle manager. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager and spawn its control task.
    ///
    /// Must be called from within a Tokio runtime. The session client is not
    /// started until [`SessionManager::initialize`] is called.
    #[must_use]
    pub fn new(
        factory: Arc<dyn SessionClientFactory>,
        notifier: BackendNotifier,
        memory: Arc<MemoryGuard>,
        options: ManagerOptions,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Uninitialized,
                connection: None,
                policy: options.reconnect,
                reconnect_exhausted: false,
                generation: 0,
                client: None,
                reconnect_timer: None,
                timer_seq: 0,
                keep_alive: None,
                qr: None,
                stopped: false,
            }),
            factory,
            notifier,
            memory,
            queue: BoundedQueue::new(options.queue_capacity, options.queue_pacing),
            keep_alive_interval: options.keep_alive_interval,
            client_timeout: options.client_timeout,
            artifacts_dir: options.artifacts_dir,
            auto_reply: options.auto_reply,
            commands,
            events,
            message_count: AtomicU64::new(0),
            started_at: Instant::now(),
        });

        tokio::spawn(control_loop(Arc::downgrade(&inner), commands_rx, events_rx));
        Self { inner }
    }

    /// Start the session client. Only the first call has an effect; a failed
    /// start falls through to reconnect scheduling.
    pub fn initialize(&self) {
        let _ = self.inner.commands.send(Command::Initialize);
    }

    /// Tear down the current client and start a fresh one immediately,
    /// bypassing any backoff. Returns before the restart happens.
    pub fn force_reconnect(&self) {
        tracing::info!("Forced reconnect requested");
        let _ = self.inner.commands.send(Command::ForceReconnect);
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn connection(&self) -> Option<ConnectionInfo> {
        self.inner.lock().connection.clone()
    }

    /// Latest pairing code, while one is pending.
    #[must_use]
    pub fn qr_code(&self) -> Option<String> {
        self.inner.lock().qr.clone()
    }

    /// Consistent snapshot of the manager.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let lc = self.inner.lock();
        StatsSnapshot {
            connected: lc.state.is_ready(),
            state: lc.state,
            uptime_secs: self.inner.started_at.elapsed().as_secs(),
            attempt_count: lc.policy.attempt_count(),
            max_attempts: lc.policy.max_attempts(),
            reconnect_exhausted: lc.reconnect_exhausted,
            next_reconnect_ms: lc
                .reconnect_timer
                .as_ref()
                .map(|t| u64::try_from(t.delay.as_millis()).unwrap_or(u64::MAX)),
            message_count: self.inner.message_count.load(Ordering::Relaxed),
            queue: self.inner.queue.stats(),
            memory: self.inner.memory.latest().map(Into::into),
            connection: lc.connection.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Queue an inbound message for delivery to the backend.
    ///
    /// Returns `false` if the queue is full and the message was dropped.
    pub fn handle_inbound_message(&self, message: InboundMessage) -> bool {
        self.inner.message_count.fetch_add(1, Ordering::Relaxed);
        let label = format!("message {} from {}", message.id, message.from);
        let manager = self.clone();
        self.inner
            .queue
            .enqueue(QueueEntry::new(label, manager.relay_inbound(message).boxed()))
            .is_ok()
    }

    /// Send a text message to `to` (bare or fully-qualified identifier).
    ///
    /// # Errors
    /// Returns [`SendError::NotReady`] unless the session is ready, or the
    /// client's error if the send fails.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, SendError> {
        let client = {
            let lc = self.inner.lock();
            if !lc.state.is_ready() {
                return Err(SendError::NotReady(lc.state));
            }
            lc.client.clone()
        };
        let client = client.ok_or(ClientError::NotStarted)?;

        let chat_id = normalize_recipient(to);
        let receipt = client.send_message(&chat_id, body).await?;
        tracing::info!(to = %chat_id, message_id = %receipt.message_id, "Message sent");
        Ok(receipt)
    }

    /// Stop the manager: cancel timers, stop the keep-alive and destroy the
    /// client. Commands, timers and client events arriving afterwards are
    /// ignored; the state stays `Disconnected`.
    pub async fn shutdown(&self) {
        let client = {
            let mut lc = self.inner.lock();
            lc.stopped = true;
            lc.cancel_reconnect_timer();
            lc.stop_keep_alive();
            lc.generation += 1;
            lc.connection = None;
            lc.qr = None;
            lc.state = SessionState::Disconnected;
            lc.client.take()
        };
        if let Some(client) = client {
            self.destroy_client(client).await;
        }
        tracing::info!("Session manager stopped");
    }

    async fn dispatch(&self, command: Command) {
        match command {
            Command::Initialize => {
                self.apply(Trigger::InitRequested, EventContext::default())
                    .await;
            }
            Command::ForceReconnect => {
                self.inner.lock().reconnect_exhausted = false;
                self.apply(Trigger::ForceReconnect, EventContext::default())
                    .await;
            }
            Command::ReconnectTimerFired { timer_id } => {
                let armed = {
                    let mut lc = self.inner.lock();
                    if lc.reconnect_timer.as_ref().is_some_and(|t| t.id == timer_id) {
                        lc.reconnect_timer = None;
                        true
                    } else {
                        false
                    }
                };
                if armed {
                    self.apply(Trigger::TimerFired, EventContext::default())
                        .await;
                } else {
                    tracing::debug!(timer_id, "Ignoring superseded reconnect timer");
                }
            }
        }
    }

    async fn on_event(&self, generation: u64, event: SessionEvent) {
        let current = self.inner.lock().generation;
        if generation != current {
            tracing::debug!(
                generation,
                current,
                event = event.name(),
                "Ignoring event from replaced client"
            );
            return;
        }

        match event {
            SessionEvent::Qr(code) => {
                tracing::info!("Pairing code received, waiting for scan");
                self.apply(
                    Trigger::Qr,
                    EventContext {
                        qr: Some(code),
                        ..EventContext::default()
                    },
                )
                .await;
            }
            SessionEvent::Ready(info) => {
                tracing::info!(
                    display_name = %info.display_name,
                    account = %info.account_id,
                    "Session connected"
                );
                self.apply(
                    Trigger::Ready,
                    EventContext {
                        connection: Some(info),
                        ..EventContext::default()
                    },
                )
                .await;
            }
            SessionEvent::Message(message) => {
                tracing::debug!(from = %message.from, "Inbound message");
                self.handle_inbound_message(message);
            }
            SessionEvent::Disconnected(reason) => {
                tracing::warn!(%reason, "Session disconnected");
                self.apply(
                    Trigger::Disconnected,
                    EventContext {
                        reason: Some(reason),
                        ..EventContext::default()
                    },
                )
                .await;
            }
        }
    }

    /// Apply one transition: state and bookkeeping effects atomically, then
    /// the suspending effects in order.
    async fn apply(&self, trigger: Trigger, ctx: EventContext) {
        let (deferred, cycle) = {
            let mut lc = self.inner.lock();
            if lc.stopped {
                tracing::debug!(?trigger, "Manager stopped, trigger ignored");
                return;
            }
            let from = lc.state;
            let Some(tr) = transition(from, trigger) else {
                tracing::debug!(state = %from, ?trigger, "Trigger ignored");
                return;
            };
            lc.state = tr.next;
            tracing::info!(from = %from, to = %tr.next, ?trigger, "Session transition");

            let mut deferred = Vec::new();
            let mut cycle = ClientCycle::default();
            for &effect in tr.effects {
                match effect {
                    Effect::DestroyClient => {
                        lc.generation += 1;
                        cycle.retire = lc.client.take();
                    }
                    Effect::StartClient => {
                        lc.generation += 1;
                        cycle.launch = Some(lc.generation);
                    }
                    _ if effect.is_async() => deferred.push(effect),
                    _ => self.apply_now(&mut lc, effect, &ctx),
                }
            }
            (deferred, cycle)
        };

        for effect in deferred {
            self.apply_deferred(effect, &ctx).await;
        }
        if cycle.retire.is_some() || cycle.launch.is_some() {
            tokio::spawn(self.clone().cycle_client(cycle));
        }
    }

    fn apply_now(&self, lc: &mut Lifecycle, effect: Effect, ctx: &EventContext) {
        match effect {
            Effect::CancelReconnectTimer => lc.cancel_reconnect_timer(),
            Effect::StopKeepAlive => lc.stop_keep_alive(),
            Effect::StartKeepAlive => {
                lc.stop_keep_alive();
                lc.keep_alive = Some(self.spawn_keep_alive());
            }
            Effect::CaptureConnection => {
                lc.connection.clone_from(&ctx.connection);
                lc.qr = None;
            }
            Effect::ClearConnection => lc.connection = None,
            Effect::ResetAttempts => {
                lc.policy.reset();
                lc.reconnect_exhausted = false;
            }
            Effect::ScheduleReconnect => self.schedule_reconnect(lc),
            Effect::PersistQr
            | Effect::NotifyConnected
            | Effect::NotifyDisconnected
            | Effect::DestroyClient
            | Effect::StartClient => unreachable!("{effect:?} is deferred"),
        }
    }

    async fn apply_deferred(&self, effect: Effect, ctx: &EventContext) {
        match effect {
            Effect::PersistQr => self.persist_qr(ctx.qr.clone()).await,
            Effect::NotifyConnected => {
                let (display_name, phone) = ctx
                    .connection
                    .as_ref()
                    .map(|c| (c.display_name.clone(), c.account_id.clone()))
                    .unwrap_or_default();
                self.inner.notifier.notify_detached(
                    NotificationKind::Connected,
                    json!({ "status": "connected", "displayName": display_name, "phone": phone }),
                );
            }
            Effect::NotifyDisconnected => {
                self.inner.notifier.notify_detached(
                    NotificationKind::Disconnected,
                    json!({ "status": "disconnected", "reason": ctx.reason }),
                );
            }
            Effect::CancelReconnectTimer
            | Effect::StopKeepAlive
            | Effect::StartKeepAlive
            | Effect::CaptureConnection
            | Effect::ClearConnection
            | Effect::ResetAttempts
            | Effect::ScheduleReconnect
            | Effect::DestroyClient
            | Effect::StartClient => unreachable!("{effect:?} is not deferred"),
        }
    }

    /// Arm the reconnect timer, replacing any armed one, or give up once
    /// the attempt budget is spent.
    fn schedule_reconnect(&self, lc: &mut Lifecycle) {
        let Some(delay) = lc.policy.next_delay() else {
            lc.cancel_reconnect_timer();
            lc.reconnect_exhausted = true;
            tracing::error!(
                attempts = lc.policy.attempt_count(),
                "Reconnect attempts exhausted, manual reconnect required"
            );
            return;
        };

        lc.cancel_reconnect_timer();
        lc.timer_seq += 1;
        let timer_id = lc.timer_seq;
        let commands = self.inner.commands.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::ReconnectTimerFired { timer_id });
        });
        lc.reconnect_timer = Some(ArmedTimer {
            id: timer_id,
            delay,
            handle,
        });

        if let Some(tr) = transition(lc.state, Trigger::ReconnectArmed) {
            lc.state = tr.next;
        }
        tracing::info!(
            attempt = lc.policy.attempt_count(),
            max_attempts = lc.policy.max_attempts(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );
    }

    fn spawn_keep_alive(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.keep_alive_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let client = {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.memory.check();
                    inner.lock().client.clone()
                };
                let Some(client) = client else { continue };
                match tokio::time::timeout(period, client.probe()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!("Keep-alive probe failed: {e}"),
                    Err(_) => tracing::debug!(
                        timeout_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
                        "Keep-alive probe timed out"
                    ),
                }
            }
        })
    }

    async fn persist_qr(&self, code: Option<String>) {
        let Some(code) = code else { return };
        self.inner.lock().qr = Some(code.clone());

        let Some(dir) = &self.inner.artifacts_dir else { return };
        let path = dir.join(QR_ARTIFACT);
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, code.as_bytes()).await
        }
        .await;
        match written {
            Ok(()) => tracing::info!(path = %path.display(), "Pairing code saved"),
            Err(e) => tracing::warn!(path = %path.display(), "Failed to save pairing code: {e}"),
        }
    }

    /// Tear down the replaced client, then create and start the next one.
    ///
    /// Runs on its own task. A failed or timed-out start comes back as a
    /// `disconnected` event of the new generation.
    async fn cycle_client(self, cycle: ClientCycle) {
        if let Some(client) = cycle.retire {
            self.destroy_client(client).await;
        }
        if let Some(generation) = cycle.launch {
            self.start_client(generation).await;
        }
    }

    async fn destroy_client(&self, client: Arc<dyn SessionClient>) {
        match tokio::time::timeout(self.inner.client_timeout, client.destroy()).await {
            Ok(Ok(())) => tracing::debug!("Session client destroyed"),
            Ok(Err(e)) => tracing::warn!("Destroying client failed: {e}"),
            Err(_) => tracing::warn!(
                timeout_ms = self.client_timeout_ms(),
                "Destroying client timed out"
            ),
        }
    }

    async fn start_client(&self, generation: u64) {
        let client = match self.inner.factory.create() {
            Ok(client) => client,
            Err(e) => {
                self.init_failed(generation, &e);
                return;
            }
        };

        let current = {
            let mut lc = self.inner.lock();
            let current = lc.generation == generation && !lc.stopped;
            if current {
                lc.client = Some(Arc::clone(&client));
            }
            current
        };
        if !current {
            tracing::debug!(generation, "Client superseded before start");
            return;
        }

        let sink = EventSink::new(generation, self.inner.events.clone());
        match tokio::time::timeout(self.inner.client_timeout, client.start(sink)).await {
            Ok(Ok(())) => tracing::debug!(generation, "Session client started"),
            Ok(Err(e)) => self.init_failed(generation, &e),
            Err(_) => self.init_failed(
                generation,
                &ClientError::Init(format!(
                    "start timed out after {}ms",
                    self.client_timeout_ms()
                )),
            ),
        }
    }

    fn client_timeout_ms(&self) -> u64 {
        u64::try_from(self.inner.client_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// A failed start is handled exactly like a disconnect of that instance.
    fn init_failed(&self, generation: u64, err: &ClientError) {
        tracing::error!(generation, "Session client initialization failed: {err}");
        let _ = self
            .inner
            .events
            .send((generation, SessionEvent::Disconnected(err.to_string())));
    }

    /// Forward an inbound message; the auto-reply goes out only once the
    /// backend has taken the message.
    async fn relay_inbound(self, message: InboundMessage) -> Result<(), JobError> {
        let payload = json!({
            "from": message.from,
            "body": message.body,
            "messageTimestamp": message.timestamp,
            "type": message.kind,
            "hasMedia": message.has_media,
        });
        match self
            .inner
            .notifier
            .try_notify(NotificationKind::Message, payload)
            .await
        {
            Ok(()) => tracing::debug!(from = %message.from, "Inbound message forwarded"),
            Err(NotifyError::Disabled) => {}
            Err(e) => {
                tracing::warn!(from = %message.from, "Forwarding inbound message failed: {e}");
                return Ok(());
            }
        }

        if let Some(reply) = self.inner.auto_reply.reply_for(&message.body) {
            let reply = reply.to_string();
            self.send_text(&message.from, &reply).await?;
            tracing::debug!(to = %message.from, "Auto-reply sent");
        }
        Ok(())
    }
}

async fn control_loop(
    inner: Weak<Inner>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<GenerationEvent>,
) {
    loop {
        tokio::select! {
            Some(command) = commands.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                SessionManager { inner }.dispatch(command).await;
            }
            Some((generation, event)) = events.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                SessionManager { inner }.on_event(generation, event).await;
            }
            else => break,
        }
    }
    tracing::debug!("Session control loop stopped");
}
