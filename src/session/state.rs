//! Session-scoped working state.
//!
//! [`SessionState`] lives exactly as long as one connection. Stage outputs
//! land here as they are produced and are flushed to the durable record at
//! teardown; nothing in this module touches the store directly.

use serde::{Deserialize, Serialize};

use crate::enrichment::ChartDocument;
use crate::llm::ChatMessage;
use crate::profile::{FocusTopic, ProfileDocument};
use crate::store::{BirthDetails, ConversationMessage, StoredProfile};

/// One seeded history turn, as provided by the connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedMessage {
    /// "user" or "assistant"; anything else is skipped at seed time.
    pub role: String,
    pub content: String,
}

/// Connection-time parameters for a new session.
#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    /// Stable user identity, when the caller is known.
    pub user_id: Option<String>,
    /// Prior conversation turns to seed the context with, oldest first.
    pub seed_history: Vec<SeedMessage>,
}

/// Birth details under collection. Fields fill independently as the user
/// shares them; nothing here is persisted until all of them resolve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BirthFields {
    pub date_of_birth: Option<String>,
    pub time_of_birth: Option<String>,
    /// Place name as given, kept for logging only; the coordinates are
    /// what the record stores.
    pub place_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub utc_offset_hours: Option<f64>,
}

impl BirthFields {
    /// Pre-fill from a stored record.
    pub fn from_stored(details: &BirthDetails) -> Self {
        Self {
            date_of_birth: Some(details.date_of_birth.clone()),
            time_of_birth: Some(details.time_of_birth.clone()),
            place_name: None,
            latitude: Some(details.latitude),
            longitude: Some(details.longitude),
            utc_offset_hours: Some(details.utc_offset_hours),
        }
    }

    /// Human-readable names of the details still needed from the user.
    ///
    /// The place counts as present once coordinates are known; the UTC
    /// offset is derived later and is never asked for.
    pub fn missing_summary(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.date_of_birth.is_none() {
            missing.push("date of birth");
        }
        if self.time_of_birth.is_none() {
            missing.push("time of birth");
        }
        if self.latitude.is_none() || self.longitude.is_none() {
            missing.push("place of birth");
        }
        missing
    }

    /// Whether date, time, and coordinates have all been gathered.
    pub fn is_complete(&self) -> bool {
        self.missing_summary().is_empty()
    }
}

/// Working state for one connected session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub user_id: Option<String>,
    pub birth: BirthFields,
    pub chart: Option<ChartDocument>,
    pub profile: Option<ProfileDocument>,
    pub focus_topic: FocusTopic,
    /// Generation context, oldest first. System prompts are not stored
    /// here: the active persona supplies its own at request time, which
    /// is what lets a persona swap keep the history intact.
    pub history: Vec<ChatMessage>,
    /// Spoken user/assistant turns only, for the teardown flush.
    pub transcript: Vec<ConversationMessage>,
}

impl SessionState {
    /// Seed state from connection parameters and the stored record.
    ///
    /// Seeded history is capped to the most recent `max_seed_messages`
    /// entries; unknown roles are dropped.
    pub fn new(params: ConnectionParams, stored: &StoredProfile, max_seed_messages: usize) -> Self {
        let skip = params.seed_history.len().saturating_sub(max_seed_messages);
        if skip > 0 {
            tracing::debug!("dropping {skip} oldest seeded messages over the cap");
        }
        let mut history = Vec::new();
        for seed in params.seed_history.into_iter().skip(skip) {
            match seed.role.as_str() {
                "user" => history.push(ChatMessage::user(seed.content)),
                "assistant" => history.push(ChatMessage::assistant(seed.content)),
                other => tracing::debug!("skipping seeded message with role {other:?}"),
            }
        }

        Self {
            user_id: params.user_id,
            birth: stored
                .birth
                .as_ref()
                .map(BirthFields::from_stored)
                .unwrap_or_default(),
            chart: None,
            profile: None,
            focus_topic: FocusTopic::default(),
            history,
            transcript: Vec::new(),
        }
    }

    /// Record a finalized user turn in both the generation context and
    /// the transcript.
    pub fn record_user(&mut self, text: &str) {
        self.history.push(ChatMessage::user(text));
        self.transcript.push(ConversationMessage::now("user", text));
    }

    /// Record a spoken assistant reply in both the generation context and
    /// the transcript.
    pub fn record_assistant(&mut self, text: &str) {
        self.history.push(ChatMessage::assistant(text));
        self.transcript
            .push(ConversationMessage::now("assistant", text));
    }
}
