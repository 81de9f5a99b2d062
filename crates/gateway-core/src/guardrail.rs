//! Guardrail collaborator contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;
use crate::request::ChatMessage;

/// Replacement applied to message text before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redaction {
    /// Text to replace
    pub original: String,
    /// Replacement text
    pub replacement: String,
}

/// Result of a guardrail check
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuardrailOutcome {
    /// All checks passed
    pub passed: bool,
    /// Request must not be dispatched
    pub blocked: bool,
    /// Violated rule descriptions
    pub violations: Vec<String>,
    /// Redactions to apply to message text
    pub redactions: Vec<Redaction>,
}

impl GuardrailOutcome {
    /// Outcome that lets the request through untouched
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    /// Apply the redactions to the text parts of `messages`
    pub fn apply_redactions(&self, messages: &mut [ChatMessage]) {
        if self.redactions.is_empty() {
            return;
        }
        for message in messages {
            match &mut message.content {
                crate::request::MessageContent::Text(text) => self.redact(text),
                crate::request::MessageContent::Parts(parts) => {
                    for part in parts {
                        if let crate::request::ContentPart::Text { text } = part {
                            self.redact(text);
                        }
                    }
                }
            }
        }
    }

    fn redact(&self, text: &mut String) {
        for r in &self.redactions {
            if !r.original.is_empty() && text.contains(&r.original) {
                *text = text.replace(&r.original, &r.replacement);
            }
        }
    }
}

/// Content-scanning collaborator consulted before dispatch
#[async_trait]
pub trait Guardrails: Send + Sync {
    /// Check the messages of a request
    async fn check(&self, messages: &[ChatMessage]) -> GatewayResult<GuardrailOutcome>;
}

/// Guardrails that pass everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGuardrails;

#[async_trait]
impl Guardrails for NoopGuardrails {
    async fn check(&self, _messages: &[ChatMessage]) -> GatewayResult<GuardrailOutcome> {
        Ok(GuardrailOutcome::pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redactions_apply_to_text() {
        let outcome = GuardrailOutcome {
            passed: true,
            blocked: false,
            violations: vec![],
            redactions: vec![Redaction {
                original: "4111-1111-1111-1111".into(),
                replacement: "[CARD]".into(),
            }],
        };
        let mut messages = vec![
            ChatMessage::user("my card is 4111-1111-1111-1111"),
            ChatMessage::user_with_image("card 4111-1111-1111-1111", "https://x/y.png"),
        ];
        outcome.apply_redactions(&mut messages);
        assert_eq!(messages[0].text(), "my card is [CARD]");
        assert_eq!(messages[1].text(), "card [CARD]");
    }

    #[tokio::test]
    async fn test_noop_passes() {
        let outcome = NoopGuardrails
            .check(&[ChatMessage::user("hi")])
            .await
            .expect("check");
        assert!(outcome.passed);
        assert!(!outcome.blocked);
    }
}
