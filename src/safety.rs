//! Crisis interception.
//!
//! Every finalized user turn passes through [`CrisisInterceptor::check`]
//! before any generation starts. A match replaces the model entirely for
//! that turn: the caller speaks [`CRISIS_RESPONSE`] and records it in
//! history like any other reply. Detection is two-tier: hard phrases
//! always override, softer signals only override for users whose profile
//! assessed crisis risk as high.

use regex::Regex;
use tracing::warn;

use crate::profile::RiskLevel;

/// Fixed response spoken whenever the interceptor fires.
pub const CRISIS_RESPONSE: &str = "I hear you, and I'm really glad you told me. \
What you're feeling is real, and you deserve support right now. Please reach \
out to the 988 Suicide and Crisis Lifeline — call or text 988. They're \
available 24/7 and can help. You don't have to go through this alone.";

/// Phrases that always override generation.
const HARD_PHRASES: [&str; 5] = [
    "kill myself",
    "end it all",
    "suicide",
    "suicidal",
    "want to die",
];

/// Ambiguous in isolation; override only at high assessed risk.
const SOFT_PHRASES: [&str; 6] = [
    "end it",
    "die",
    "no point",
    "can't go on",
    "give up",
    "stop living",
];

/// Two-tier crisis phrase detector.
///
/// Patterns are compiled once at construction and the instance is shared
/// by injection; there is no global state.
#[derive(Debug)]
pub struct CrisisInterceptor {
    hard: Regex,
    soft: Regex,
}

impl CrisisInterceptor {
    /// Compile the phrase patterns.
    pub fn new() -> Self {
        Self {
            hard: phrase_pattern(&HARD_PHRASES),
            soft: phrase_pattern(&SOFT_PHRASES),
        }
    }

    /// Check one finalized user turn.
    ///
    /// `risk` is the assessed level from the active profile, if any;
    /// interim transcripts must never be passed here. Returns the fixed
    /// crisis response when the turn must override generation.
    pub fn check(&self, utterance: &str, risk: Option<RiskLevel>) -> Option<&'static str> {
        if self.hard.is_match(utterance) {
            warn!("hard crisis phrase detected; overriding generation");
            return Some(CRISIS_RESPONSE);
        }
        if risk == Some(RiskLevel::High) && self.soft.is_match(utterance) {
            warn!("soft crisis phrase detected at high assessed risk; overriding generation");
            return Some(CRISIS_RESPONSE);
        }
        None
    }
}

impl Default for CrisisInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive word-bounded alternation over literal phrases.
fn phrase_pattern(phrases: &[&str]) -> Regex {
    let alternation = phrases
        .iter()
        .map(|phrase| regex::escape(phrase))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("valid phrase pattern")
}
