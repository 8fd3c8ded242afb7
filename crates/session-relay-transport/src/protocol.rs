//! Wire bodies for the control API.
//!
//! Request fields are optional at the type level so that a missing field is
//! reported as a 400 listing every absent name, rather than a generic
//! deserialization failure.

use serde::{Deserialize, Serialize};
use session_relay_core::{SendReceipt, SessionState, StatsSnapshot};

/// `POST /api/send-message`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub to: Option<String>,
    pub message: Option<String>,
}

/// `POST /api/send-signature`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSignatureRequest {
    pub to: Option<String>,
    pub doctor_name: Option<String>,
    pub signature_url: Option<String>,
}

/// `POST /api/send-verification`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendVerificationRequest {
    pub to: Option<String>,
    pub code: Option<String>,
}

impl SendMessageRequest {
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        missing(&[("to", &self.to), ("message", &self.message)])
    }
}

impl SendSignatureRequest {
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        missing(&[
            ("to", &self.to),
            ("doctorName", &self.doctor_name),
            ("signatureUrl", &self.signature_url),
        ])
    }
}

impl SendVerificationRequest {
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        missing(&[("to", &self.to), ("code", &self.code)])
    }
}

/// Blank strings count as missing.
fn missing(fields: &[(&'static str, &Option<String>)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect()
}

/// Successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
    /// Unix epoch seconds.
    pub timestamp: i64,
}

impl From<SendReceipt> for SendResponse {
    fn from(receipt: SendReceipt) -> Self {
        Self {
            success: true,
            message_id: receipt.message_id,
            timestamp: receipt.timestamp,
        }
    }
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// `GET /qr`
#[derive(Debug, Clone, Serialize)]
pub struct QrResponse {
    pub qr: Option<String>,
    pub state: SessionState,
}

/// `POST /api/reconnect`
#[derive(Debug, Clone, Serialize)]
pub struct ReconnectResponse {
    pub success: bool,
    pub message: &'static str,
}
