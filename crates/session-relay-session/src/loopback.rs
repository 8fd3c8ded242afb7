//! In-process session client.
//!
//! `LoopbackFactory` implements the session-client capability without a
//! network: events are scripted through the factory, failures can be
//! injected, and sent messages are recorded. With auto-pairing enabled each
//! started instance emits a pairing code followed by `ready`, which is what
//! the server runs when no real network client is plugged in.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use session_relay_core::{
    ClientError, ConnectionInfo, EventSink, InboundMessage, SendReceipt, SessionClient,
    SessionClientFactory, SessionEvent,
};
use uuid::Uuid;

/// Message recorded by a loopback client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub body: String,
}

#[derive(Default)]
struct Script {
    sink: Option<EventSink>,
    created: usize,
    started: usize,
    destroyed: usize,
    probes: usize,
    fail_creates: usize,
    fail_starts: usize,
    fail_sends: bool,
    fail_probes: bool,
    hang_probes: bool,
    fail_destroys: bool,
    sent: Vec<SentMessage>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    auto_pair: Option<ConnectionInfo>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Factory and remote control for loopback clients.
#[derive(Clone, Default)]
pub struct LoopbackFactory {
    shared: Arc<Shared>,
}

impl LoopbackFactory {
    /// Factory whose clients only emit what is scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose clients pair immediately as `info`.
    #[must_use]
    pub fn auto_pairing(info: ConnectionInfo) -> Self {
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(Script::default()),
                auto_pair: Some(info),
            }),
        }
    }

    /// Emit through the most recently started client.
    ///
    /// Returns `false` if no client is started or the receiver is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let sink = self.shared.lock().sink.clone();
        sink.is_some_and(|sink| sink.emit(event))
    }

    pub fn emit_qr(&self, code: &str) -> bool {
        self.emit(SessionEvent::Qr(code.to_string()))
    }

    pub fn emit_ready(&self, info: ConnectionInfo) -> bool {
        self.emit(SessionEvent::Ready(info))
    }

    pub fn emit_message(&self, message: InboundMessage) -> bool {
        self.emit(SessionEvent::Message(message))
    }

    pub fn emit_disconnected(&self, reason: &str) -> bool {
        self.emit(SessionEvent::Disconnected(reason.to_string()))
    }

    /// Make the next `n` calls to `create` fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.shared.lock().fail_creates = n;
    }

    /// Make the next `n` calls to `start` fail.
    pub fn fail_next_starts(&self, n: usize) {
        self.shared.lock().fail_starts = n;
    }

    pub fn set_send_failure(&self, fail: bool) {
        self.shared.lock().fail_sends = fail;
    }

    pub fn set_probe_failure(&self, fail: bool) {
        self.shared.lock().fail_probes = fail;
    }

    /// Make probes wait forever.
    pub fn set_probe_hang(&self, hang: bool) {
        self.shared.lock().hang_probes = hang;
    }

    pub fn set_destroy_failure(&self, fail: bool) {
        self.shared.lock().fail_destroys = fail;
    }

    #[must_use]
    pub fn created(&self) -> usize {
        self.shared.lock().created
    }

    #[must_use]
    pub fn started(&self) -> usize {
        self.shared.lock().started
    }

    #[must_use]
    pub fn destroyed(&self) -> usize {
        self.shared.lock().destroyed
    }

    #[must_use]
    pub fn probes(&self) -> usize {
        self.shared.lock().probes
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.shared.lock().sent.clone()
    }
}

impl SessionClientFactory for LoopbackFactory {
    fn create(&self) -> Result<Arc<dyn SessionClient>, ClientError> {
        let mut script = self.shared.lock();
        if script.fail_creates > 0 {
            script.fail_creates -= 1;
            return Err(ClientError::Init("loopback create failure".to_string()));
        }
        script.created += 1;
        Ok(Arc::new(LoopbackClient {
            shared: Arc::clone(&self.shared),
            instance: script.created,
        }))
    }
}

/// One loopback client instance.
pub struct LoopbackClient {
    shared: Arc<Shared>,
    instance: usize,
}

impl LoopbackClient {
    fn is_current(&self, script: &Script) -> bool {
        script.sink.is_some() && script.started == self.instance
    }
}

#[async_trait]
impl SessionClient for LoopbackClient {
    async fn start(&self, events: EventSink) -> Result<(), ClientError> {
        {
            let mut script = self.shared.lock();
            if script.fail_starts > 0 {
                script.fail_starts -= 1;
                return Err(ClientError::Init("loopback start failure".to_string()));
            }
            script.started = self.instance;
            script.sink = Some(events.clone());
        }

        if let Some(info) = &self.shared.auto_pair {
            events.emit(SessionEvent::Qr(format!("loopback:{}", Uuid::new_v4())));
            events.emit(SessionEvent::Ready(info.clone()));
        }
        tracing::debug!(instance = self.instance, "Loopback client started");
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<SendReceipt, ClientError> {
        let mut script = self.shared.lock();
        if !self.is_current(&script) {
            return Err(ClientError::NotStarted);
        }
        if script.fail_sends {
            return Err(ClientError::Send("loopback send failure".to_string()));
        }
        script.sent.push(SentMessage {
            chat_id: chat_id.to_string(),
            body: body.to_string(),
        });
        Ok(SendReceipt {
            message_id: format!("true_{chat_id}_{}", Uuid::new_v4().simple()),
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    async fn probe(&self) -> Result<(), ClientError> {
        let hang = {
            let mut script = self.shared.lock();
            script.probes += 1;
            if script.fail_probes {
                return Err(ClientError::Probe("loopback probe failure".to_string()));
            }
            script.hang_probes
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let mut script = self.shared.lock();
        script.destroyed += 1;
        if script.started == self.instance {
            script.sink = None;
        }
        if script.fail_destroys {
            return Err(ClientError::Destroy("loopback destroy failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn test_auto_pairing_emits_qr_then_ready() {
        let factory = LoopbackFactory::auto_pairing(ConnectionInfo::new("Bot", "336"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let client = factory.create().unwrap();
        client.start(EventSink::new(3, tx)).await.unwrap();

        let (generation, first) = rx.recv().await.unwrap();
        assert_eq!(generation, 3);
        assert!(matches!(first, SessionEvent::Qr(_)));
        let (_, second) = rx.recv().await.unwrap();
        assert_eq!(second, SessionEvent::Ready(ConnectionInfo::new("Bot", "336")));
    }

    #[tokio::test]
    async fn test_replaced_instance_cannot_send() {
        let factory = LoopbackFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let old = factory.create().unwrap();
        old.start(EventSink::new(1, tx.clone())).await.unwrap();
        let new = factory.create().unwrap();
        new.start(EventSink::new(2, tx)).await.unwrap();

        assert_eq!(old.send_message("a@c.us", "x").await, Err(ClientError::NotStarted));
        assert!(new.send_message("a@c.us", "x").await.is_ok());
        assert_eq!(factory.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let factory = LoopbackFactory::new();
        factory.fail_next_creates(1);
        assert!(factory.create().is_err());

        let client = factory.create().unwrap();
        factory.fail_next_starts(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(client.start(EventSink::new(1, tx.clone())).await.is_err());
        client.start(EventSink::new(1, tx)).await.unwrap();

        factory.set_send_failure(true);
        assert!(matches!(
            client.send_message("a@c.us", "x").await,
            Err(ClientError::Send(_))
        ));
        assert_eq!(factory.created(), 1);
    }
}
