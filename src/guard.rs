//! Input screening and output redaction.
//!
//! [`ContentGuard`] sits on both edges of a turn: inbound text can be
//! refused outright, outbound text has sensitive identifiers replaced
//! with placeholders. Everything here is deterministic regex work; the
//! guard cannot fail at runtime, only allow, block, or rewrite.
//!
//! Dates, times, places and names deliberately pass through untouched:
//! the whole session revolves around birth details, and redacting them
//! would break intake.

use regex::Regex;
use tracing::warn;

use crate::config::GuardConfig;

/// Fixed refusal spoken when input screening blocks a turn.
pub const REFUSAL_RESPONSE: &str = "I can't respond to that kind of message.";

/// Abusive phrases that end the turn without a model call.
const DENY_PHRASES: [&str; 4] = [
    "fuck you",
    "piece of shit",
    "you stupid bot",
    "shut the hell up",
];

/// Outcome of screening one user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// The turn may proceed to generation.
    Allow,
    /// The turn is refused with the given fixed response.
    Block {
        /// What to say instead of a generated reply.
        response: &'static str,
    },
}

/// Deterministic content guard for both turn directions.
pub struct ContentGuard {
    enabled: bool,
    deny: Regex,
    redactions: Vec<(Regex, &'static str)>,
}

impl std::fmt::Debug for ContentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentGuard")
            .field("enabled", &self.enabled)
            .field("redactions", &self.redactions.len())
            .finish()
    }
}

impl ContentGuard {
    /// Compile the screening and redaction patterns.
    pub fn new(config: &GuardConfig) -> Self {
        let deny = {
            let alternation = DENY_PHRASES
                .iter()
                .map(|phrase| regex::escape(phrase))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("valid deny pattern")
        };
        // Card before phone: a spaced card number is also phone-shaped.
        let redactions = vec![
            (
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                    .expect("valid email pattern"),
                "[redacted-email]",
            ),
            (
                Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b")
                    .expect("valid card pattern"),
                "[redacted-card]",
            ),
            (
                Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid ssn pattern"),
                "[redacted-id]",
            ),
            (
                Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("valid ip pattern"),
                "[redacted-ip]",
            ),
            (
                Regex::new(r"(?:\+?\d{1,3}[-. ]?)?\(?\d{2,4}\)?[-. ]?\d{3,4}[-. ]?\d{4}\b")
                    .expect("valid phone pattern"),
                "[redacted-phone]",
            ),
        ];
        Self {
            enabled: config.enabled,
            deny,
            redactions,
        }
    }

    /// Screen one finalized user turn before generation.
    pub fn screen_input(&self, text: &str) -> GuardDecision {
        if self.enabled && self.deny.is_match(text) {
            warn!("input screening blocked a turn");
            return GuardDecision::Block {
                response: REFUSAL_RESPONSE,
            };
        }
        GuardDecision::Allow
    }

    /// Replace sensitive identifiers in outbound text with placeholders.
    pub fn sanitize_output(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_owned();
        }
        let mut sanitized = text.to_owned();
        for (pattern, placeholder) in &self.redactions {
            if pattern.is_match(&sanitized) {
                sanitized = pattern.replace_all(&sanitized, *placeholder).into_owned();
            }
        }
        sanitized
    }
}
