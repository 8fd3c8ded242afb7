//! Outbound message templates and keyword auto-replies.

use serde::{Deserialize, Serialize};

/// Formats the fixed-purpose messages sent through the control surface.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    service_name: String,
}

impl MessageTemplates {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Signature request pointing the recipient at `signature_url`.
    #[must_use]
    pub fn signature_request(&self, doctor_name: &str, signature_url: &str) -> String {
        format!(
            "*{} - Signature request*\n\n\
             Hello Dr. {doctor_name},\n\n\
             To complete your registration, please open the link below:\n\n\
             {signature_url}\n\n\
             This link expires in 24 hours.",
            self.service_name
        )
    }

    /// One-time verification code.
    #[must_use]
    pub fn verification_code(&self, code: &str) -> String {
        format!(
            "*{} verification code*\n\n\
             Your code is: *{code}*\n\n\
             This code is valid for 10 minutes.",
            self.service_name
        )
    }
}

/// Keyword-triggered acknowledgement sent back to the author of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoReply {
    pub enabled: bool,
    /// Lowercase keywords; a body containing any of them triggers the reply.
    pub keywords: Vec<String>,
    pub text: String,
}

impl Default for AutoReply {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: vec!["signature".to_string(), "engagement".to_string()],
            text: "Your signature request has been received. A link will be sent to you shortly."
                .to_string(),
        }
    }
}

impl AutoReply {
    /// The reply for `body`, if one should be sent.
    #[must_use]
    pub fn reply_for(&self, body: &str) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        let body = body.to_lowercase();
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && body.contains(&k.to_lowercase()))
            .then_some(self.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_template_carries_fields() {
        let t = MessageTemplates::new("7G Connect");
        let msg = t.signature_request("Martin", "https://example.test/sign/abc");
        assert!(msg.contains("7G Connect"));
        assert!(msg.contains("Dr. Martin"));
        assert!(msg.contains("https://example.test/sign/abc"));
        assert!(msg.contains("24 hours"));
    }

    #[test]
    fn test_verification_template() {
        let msg = MessageTemplates::new("Relay").verification_code("1234");
        assert!(msg.contains("*1234*"));
        assert!(msg.contains("10 minutes"));
    }

    #[test]
    fn test_auto_reply_matches_case_insensitively() {
        let reply = AutoReply::default();
        assert!(reply.reply_for("I need the SIGNATURE link").is_some());
        assert!(reply.reply_for("About my engagement").is_some());
        assert!(reply.reply_for("hello there").is_none());
    }

    #[test]
    fn test_disabled_auto_reply_never_fires() {
        let reply = AutoReply {
            enabled: false,
            ..AutoReply::default()
        };
        assert!(reply.reply_for("signature").is_none());
    }
}
