//! Best-effort JSON notifications to the backend API.
//!
//! Every call is bounded by a hard timeout. Failures are logged and
//! swallowed; nothing here is retried or reported back to the caller.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use session_relay_core::config::BackendConfig;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Event reported to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Connected,
    Disconnected,
    Message,
}

impl NotificationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Message => "message",
        }
    }
}

/// Notification delivery error.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifications disabled")]
    Disabled,
    #[error("Backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Backend answered {0}")]
    Status(reqwest::StatusCode),
}

/// Client for the backend notification endpoint.
#[derive(Clone)]
pub struct BackendNotifier {
    client: reqwest::Client,
    base_url: Option<Arc<str>>,
    event_prefix: Arc<str>,
    token: Arc<str>,
    timeout: Duration,
}

impl std::fmt::Debug for BackendNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendNotifier")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BackendNotifier {
    /// Build a notifier. An empty `base_url` yields a disabled notifier.
    #[must_use]
    pub fn new(config: &BackendConfig, token: &str) -> Self {
        let base_url = config.base_url.trim().trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            base_url: (!base_url.is_empty()).then(|| Arc::from(base_url)),
            event_prefix: Arc::from(config.event_prefix.trim_matches('/')),
            token: Arc::from(token),
            timeout: config.timeout(),
        }
    }

    /// Notifier that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&BackendConfig::default(), "")
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Full URL for `kind`, e.g. `{base}/whatsapp/connected`.
    #[must_use]
    pub fn endpoint(&self, kind: NotificationKind) -> Option<String> {
        let base = self.base_url.as_deref()?;
        Some(if self.event_prefix.is_empty() {
            format!("{base}/{}", kind.as_str())
        } else {
            format!("{base}/{}/{}", self.event_prefix, kind.as_str())
        })
    }

    /// Send one notification, reporting the outcome.
    ///
    /// # Errors
    /// Returns error on timeout, transport failure or a non-success status.
    pub async fn try_notify(&self, kind: NotificationKind, data: Value) -> Result<(), NotifyError> {
        let url = self.endpoint(kind).ok_or(NotifyError::Disabled)?;
        let body = with_timestamp(data);

        let request = self
            .client
            .post(&url)
            .bearer_auth(&*self.token)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        Ok(())
    }

    /// Send one notification; failures are logged and discarded.
    pub async fn notify(&self, kind: NotificationKind, data: Value) {
        match self.try_notify(kind, data).await {
            Ok(()) => tracing::debug!(event = kind.as_str(), "Backend notified"),
            Err(NotifyError::Disabled) => {
                tracing::trace!(event = kind.as_str(), "Notifications disabled, skipping");
            }
            Err(e) => tracing::warn!(event = kind.as_str(), "Backend notification failed: {e}"),
        }
    }

    /// Fire-and-forget variant of [`BackendNotifier::notify`].
    pub fn notify_detached(&self, kind: NotificationKind, data: Value) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move { notifier.notify(kind, data).await })
    }
}

/// Merge an ISO-8601 `timestamp` into an object payload.
fn with_timestamp(data: Value) -> Value {
    let timestamp = Value::String(chrono::Utc::now().to_rfc3339());
    match data {
        Value::Object(mut map) => {
            map.insert("timestamp".to_string(), timestamp);
            Value::Object(map)
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert("timestamp".to_string(), timestamp);
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map.insert("timestamp".to_string(), timestamp);
            Value::Object(map)
        }
    }
}
