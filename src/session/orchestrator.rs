//! Dialogue orchestration for one session.
//!
//! One finalized user turn is fully processed before the next is
//! accepted: crisis interception first, then input screening, then the
//! bounded generate/tool-dispatch loop, then output sanitising. Tool
//! dispatch is where personas hand off; the swap happens between rounds,
//! so no reply is ever generated against a half-replaced persona.

use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::SessionDeps;
use super::persona::{
    Persona, TOOL_RECORD_BIRTH_DETAILS, TOOL_UPDATE_PROFILE_FOCUS, TOOL_USE_CHAT_LOCATION_FALLBACK,
};
use super::resolver::{
    self, EntryStage, STAGE_COLLECTING, STAGE_ENRICHING, STAGE_GENERATING_XRAY, persist_fields,
};
use super::state::{ConnectionParams, SessionState};
use crate::enrichment::BirthMoment;
use crate::error::{AgentError, Result};
use crate::events::ActivityEvent;
use crate::guard::GuardDecision;
use crate::llm::{ChatMessage, GenerationChunk, GenerationRequest, ToolCallRequest};
use crate::profile::FocusTopic;
use crate::store::{BirthDetails, Conversation, ConversationMessage, SavedFields, StoredProfile};

/// Spoken when the model cannot be reached for the opening line.
const GREETING_FALLBACK: &str = "Hi, I'm really glad you're here. How are you arriving today?";

// Tool results are addressed to the model, not the user; they steer what
// it says next.
const PLACE_NOT_FOUND_RESULT: &str = "That place did not resolve. Ask the user to spell it \
    out or name the nearest large city.";
const PROFILE_READY_RESULT: &str = "All birth details are recorded and the client profile \
    is ready. Greet them warmly as their psychologist now.";
const CHART_FAILED_RESULT: &str = "Birth details are recorded, but the profile could not \
    be prepared. Let the user know gently and offer to continue without it.";
const SYNTHESIS_FAILED_RESULT: &str = "Birth details and chart are recorded, but the \
    profile could not be generated. Continue as a supportive psychologist without it.";

/// Outcome of one finalized user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Crisis interception replaced generation for this turn.
    CrisisOverride { response: String },
    /// Input screening refused the turn.
    Refused { response: String },
    /// Normal generated reply, already sanitized.
    Reply { text: String },
}

impl TurnOutcome {
    /// The text to speak, whichever branch was taken.
    pub fn spoken_text(&self) -> &str {
        match self {
            TurnOutcome::CrisisOverride { response } | TurnOutcome::Refused { response } => {
                response
            }
            TurnOutcome::Reply { text } => text,
        }
    }
}

/// One generation pass: accumulated text plus any complete tool calls.
struct GenerationRound {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

/// Drives one session's conversation from greeting to teardown.
pub struct SessionOrchestrator {
    deps: SessionDeps,
    state: SessionState,
    persona: Persona,
    /// Notice from a failed catch-up pipeline, delivered with the
    /// greeting.
    pending_notice: Option<&'static str>,
}

impl SessionOrchestrator {
    /// Resolve the entry stage, run any catch-up stages, and set up the
    /// starting persona.
    ///
    /// Infallible by design: store and pipeline failures degrade to a
    /// profile-less session rather than refusing the connection.
    pub async fn start(deps: SessionDeps, params: ConnectionParams) -> Self {
        let stored = match &params.user_id {
            Some(user_id) => match deps.store.load(user_id) {
                Ok(stored) => stored,
                Err(e) => {
                    error!("failed to load user record; treating as new user: {e}");
                    StoredProfile::default()
                }
            },
            None => StoredProfile::default(),
        };

        let plan = resolver::resolve(&stored, &params);
        let mut state = SessionState::new(params, &stored, deps.session.max_seed_messages);

        let (persona, pending_notice) = match plan.entry {
            EntryStage::Collect => {
                deps.activity
                    .publish(ActivityEvent::stage(STAGE_COLLECTING, "", ""));
                (Persona::Collector, None)
            }
            EntryStage::Activate => {
                let outcome =
                    resolver::run_pipeline(&deps, state.user_id.as_deref(), &plan, &stored).await;
                state.chart = outcome.chart;
                state.focus_topic = outcome
                    .profile
                    .as_ref()
                    .map(|p| p.focus_topic())
                    .unwrap_or_default();
                state.profile = outcome.profile.clone();
                if let Some(profile) = &state.profile {
                    deps.activity.publish(ActivityEvent::ProfileSummary {
                        text: profile.summary(),
                    });
                }
                (
                    Persona::Counselor {
                        profile: outcome.profile,
                    },
                    outcome.notice,
                )
            }
        };

        info!(persona = persona.name(), "session started");
        Self {
            deps,
            state,
            persona,
            pending_notice,
        }
    }

    /// Generate the opening line for the active persona.
    ///
    /// Never fails the session: a generation error falls back to a fixed
    /// opener so the connection always speaks first.
    pub async fn greet(&mut self) -> String {
        let mut instruction = self.persona.greeting_instructions().to_string();
        if let Some(notice) = self.pending_notice.take() {
            instruction.push_str("\nFirst, gently let them know: ");
            instruction.push_str(notice);
        }

        let mut messages = vec![ChatMessage::system(self.persona.instructions())];
        messages.extend(self.state.history.iter().cloned());
        messages.push(ChatMessage::system(instruction));

        let text = match self.run_generation(messages, Vec::new()).await {
            Ok(round) if !round.text.trim().is_empty() => {
                self.deps.guard.sanitize_output(&round.text)
            }
            Ok(_) => GREETING_FALLBACK.to_string(),
            Err(e) => {
                error!("greeting generation failed: {e}");
                GREETING_FALLBACK.to_string()
            }
        };
        self.state.record_assistant(&text);
        text
    }

    /// Process one finalized user turn.
    ///
    /// Interim transcripts must never be passed here; the crisis check
    /// runs on exactly what the user finished saying.
    ///
    /// # Errors
    ///
    /// [`AgentError::Llm`] when generation itself fails; the safety
    /// branches never error.
    pub async fn process_turn(&mut self, utterance: &str) -> Result<TurnOutcome> {
        if let Some(response) = self
            .deps
            .interceptor
            .check(utterance, self.persona.risk_level())
        {
            self.state.record_user(utterance);
            self.state.record_assistant(response);
            return Ok(TurnOutcome::CrisisOverride {
                response: response.to_string(),
            });
        }

        if let GuardDecision::Block { response } = self.deps.guard.screen_input(utterance) {
            self.state.record_user(utterance);
            self.state.record_assistant(response);
            return Ok(TurnOutcome::Refused {
                response: response.to_string(),
            });
        }

        self.state.record_user(utterance);
        let text = self.generate_reply().await?;
        let text = self.deps.guard.sanitize_output(&text);
        self.state.record_assistant(&text);
        Ok(TurnOutcome::Reply { text })
    }

    /// Flush the session transcript to the durable record.
    ///
    /// Call once at teardown. Anonymous sessions and empty transcripts
    /// are a no-op.
    ///
    /// # Errors
    ///
    /// [`AgentError::Persistence`] when the archive write fails.
    pub fn finish(&mut self) -> Result<()> {
        let Some(user_id) = self.state.user_id.clone() else {
            return Ok(());
        };
        if self.state.transcript.is_empty() {
            return Ok(());
        }

        let title = conversation_title(&self.state.transcript);
        let mut conversation = Conversation::new(title);
        conversation.messages = std::mem::take(&mut self.state.transcript);
        self.deps.store.append_conversation(&user_id, &conversation)?;
        info!(
            messages = conversation.messages.len(),
            "conversation archived"
        );
        Ok(())
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Read-only view of the working state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    // ── Generation ────────────────────────────────────────────

    /// Bounded generate/dispatch loop: each round either ends in plain
    /// text or requests tools, whose results feed the next round.
    async fn generate_reply(&mut self) -> Result<String> {
        for _round in 0..self.deps.session.max_tool_rounds {
            let messages = self.context_messages();
            let tools = self.persona.tools();
            let round = self.run_generation(messages, tools).await?;

            if round.tool_calls.is_empty() {
                return Ok(round.text);
            }

            let text = {
                let trimmed = round.text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            };
            self.state
                .history
                .push(ChatMessage::assistant_tool_calls(text, round.tool_calls.clone()));
            for call in &round.tool_calls {
                let result = self.dispatch_tool(call).await;
                self.state
                    .history
                    .push(ChatMessage::tool_result(&call.call_id, result));
            }
        }

        // Rounds exhausted with the model still asking for tools; force a
        // plain reply so the turn always ends in speech.
        warn!("tool rounds exhausted; forcing a text-only reply");
        let round = self
            .run_generation(self.context_messages(), Vec::new())
            .await?;
        Ok(round.text)
    }

    /// Current context: the active persona's instructions followed by the
    /// shared history.
    fn context_messages(&self) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.persona.instructions())];
        messages.extend(self.state.history.iter().cloned());
        messages
    }

    /// Run one generation pass, diverting reasoning deltas to the
    /// activity channel so they are never spoken.
    async fn run_generation(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<crate::llm::ToolDefinition>,
    ) -> Result<GenerationRound> {
        let request = GenerationRequest::from_messages(messages).with_tools(tools);
        let mut stream = self.deps.generator.generate(request).await?;

        let mut round = GenerationRound {
            text: String::new(),
            tool_calls: Vec::new(),
        };
        while let Some(chunk) = stream.next().await {
            match chunk {
                GenerationChunk::Text { delta } => round.text.push_str(&delta),
                GenerationChunk::Reasoning { delta } => {
                    self.deps
                        .activity
                        .publish(ActivityEvent::Reasoning { text: delta });
                }
                GenerationChunk::ToolCall(call) => round.tool_calls.push(call),
                GenerationChunk::Done { .. } => {}
                GenerationChunk::Error { message } => return Err(AgentError::Llm(message)),
            }
        }
        Ok(round)
    }

    // ── Tool dispatch ─────────────────────────────────────────

    async fn dispatch_tool(&mut self, call: &ToolCallRequest) -> String {
        let args: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        debug!(tool = %call.name, "dispatching tool call");
        match call.name.as_str() {
            TOOL_RECORD_BIRTH_DETAILS => self.record_birth_details(&args).await,
            TOOL_USE_CHAT_LOCATION_FALLBACK => self.use_chat_location_fallback(),
            TOOL_UPDATE_PROFILE_FOCUS => self.update_profile_focus(&args).await,
            other => {
                warn!("model requested unknown tool {other:?}");
                format!("Unknown tool: {other}")
            }
        }
    }

    /// Record whichever birth fields arrived; geocode a place on the
    /// spot. Completes collection once date, time, and coordinates all
    /// resolve.
    async fn record_birth_details(&mut self, args: &Value) -> String {
        if let Some(date) = non_empty_str(args, "date") {
            self.state.birth.date_of_birth = Some(date.to_string());
        }
        if let Some(time) = non_empty_str(args, "time") {
            self.state.birth.time_of_birth = Some(time.to_string());
        }
        if let Some(place) = non_empty_str(args, "place") {
            self.deps.activity.publish(ActivityEvent::stage(
                STAGE_COLLECTING,
                TOOL_RECORD_BIRTH_DETAILS,
                place,
            ));
            match self.deps.enrichment.geocode.geocode(place).await {
                Ok(Some((latitude, longitude))) => {
                    self.state.birth.place_name = Some(place.to_string());
                    self.state.birth.latitude = Some(latitude);
                    self.state.birth.longitude = Some(longitude);
                }
                Ok(None) => {
                    info!("place {place:?} did not geocode");
                    return PLACE_NOT_FOUND_RESULT.to_string();
                }
                Err(e) => {
                    warn!("geocoding failed: {e}");
                    return PLACE_NOT_FOUND_RESULT.to_string();
                }
            }
        }

        let missing = self.state.birth.missing_summary();
        if !missing.is_empty() {
            return format!("Recorded. Still missing: {}.", missing.join(", "));
        }
        self.finalize_collection().await
    }

    /// All fields are in: validate, enrich, synthesize, and hand off to
    /// the counselor. Failures along the way still hand off, just with
    /// less context.
    async fn finalize_collection(&mut self) -> String {
        let birth = self.state.birth.clone();
        let (Some(date), Some(time), Some(latitude), Some(longitude)) = (
            birth.date_of_birth,
            birth.time_of_birth,
            birth.latitude,
            birth.longitude,
        ) else {
            return "Still collecting birth details.".to_string();
        };

        let moment = match BirthMoment::parse(&date, &time) {
            Ok(moment) => moment,
            Err(e) => {
                info!("collected birth details failed validation: {e}");
                return format!(
                    "Those details did not validate ({e}). Ask the user to restate the \
                     date or time plainly."
                );
            }
        };

        let utc_offset_hours = match self
            .deps
            .enrichment
            .timezone
            .resolve_utc_offset(latitude, longitude, &moment)
            .await
        {
            Some(offset) => offset,
            None => {
                warn!("timezone lookup failed; estimating offset from longitude");
                (longitude / 15.0).round()
            }
        };
        self.state.birth.utc_offset_hours = Some(utc_offset_hours);

        let details = BirthDetails {
            date_of_birth: date,
            time_of_birth: time,
            latitude,
            longitude,
            utc_offset_hours,
        };
        persist_fields(
            &self.deps.store,
            self.state.user_id.as_deref(),
            &SavedFields {
                birth: Some(&details),
                ..SavedFields::default()
            },
        );

        self.deps.activity.publish(ActivityEvent::stage(
            STAGE_ENRICHING,
            TOOL_RECORD_BIRTH_DETAILS,
            "",
        ));
        let Some(chart) = self
            .deps
            .enrichment
            .chart
            .fetch(&moment, latitude, longitude, utc_offset_hours)
            .await
        else {
            warn!("chart lookup failed at collection hand-off; activating without a profile");
            self.persona = Persona::Counselor { profile: None };
            self.deps.activity.publish(ActivityEvent::ready());
            return CHART_FAILED_RESULT.to_string();
        };
        persist_fields(
            &self.deps.store,
            self.state.user_id.as_deref(),
            &SavedFields {
                chart: Some(&chart),
                ..SavedFields::default()
            },
        );
        self.state.chart = Some(chart.clone());

        self.deps.activity.publish(ActivityEvent::stage(
            STAGE_GENERATING_XRAY,
            TOOL_RECORD_BIRTH_DETAILS,
            self.state.focus_topic.as_str(),
        ));
        match self
            .deps
            .synthesizer
            .synthesize(&chart, self.state.focus_topic)
            .await
        {
            Ok(profile) => {
                persist_fields(
                    &self.deps.store,
                    self.state.user_id.as_deref(),
                    &SavedFields {
                        profile: Some(&profile),
                        ..SavedFields::default()
                    },
                );
                self.deps.activity.publish(ActivityEvent::ProfileSummary {
                    text: profile.summary(),
                });
                self.state.profile = Some(profile.clone());
                self.persona = Persona::Counselor {
                    profile: Some(profile),
                };
                self.deps.activity.publish(ActivityEvent::ready());
                PROFILE_READY_RESULT.to_string()
            }
            Err(e) => {
                error!("profile synthesis failed at collection hand-off: {e}");
                self.persona = Persona::Counselor { profile: None };
                self.deps.activity.publish(ActivityEvent::ready());
                SYNTHESIS_FAILED_RESULT.to_string()
            }
        }
    }

    fn use_chat_location_fallback(&self) -> String {
        self.deps.activity.publish(ActivityEvent::stage(
            STAGE_COLLECTING,
            TOOL_USE_CHAT_LOCATION_FALLBACK,
            "awaiting typed location",
        ));
        "Asked the user to type their birth place into the chat. Acknowledge it and wait \
         for the typed message."
            .to_string()
    }

    /// Rebuild the profile around a new focus topic and swap in a fresh
    /// counselor carrying it. The history is untouched, so the
    /// conversation continues seamlessly.
    async fn update_profile_focus(&mut self, args: &Value) -> String {
        let requested = non_empty_str(args, "topic").unwrap_or_default();
        let Some(topic) = FocusTopic::parse(requested) else {
            return format!(
                "Unknown focus topic {requested:?}. Valid topics: General, Career, Love, Trauma."
            );
        };
        let Some(chart) = self.state.chart.clone() else {
            return "Unable to update profile — client data not yet available.".to_string();
        };

        let previous = self.state.focus_topic;
        self.deps.activity.publish(ActivityEvent::stage(
            STAGE_GENERATING_XRAY,
            TOOL_UPDATE_PROFILE_FOCUS,
            format!("{previous} → {topic}"),
        ));

        match self.deps.synthesizer.synthesize(&chart, topic).await {
            Ok(profile) => {
                persist_fields(
                    &self.deps.store,
                    self.state.user_id.as_deref(),
                    &SavedFields {
                        profile: Some(&profile),
                        ..SavedFields::default()
                    },
                );
                self.deps.activity.publish(ActivityEvent::ProfileSummary {
                    text: profile.summary(),
                });
                self.state.focus_topic = topic;
                self.state.profile = Some(profile.clone());
                // Swap, never mutate: the next round generates only
                // against the new persona.
                self.persona = Persona::Counselor {
                    profile: Some(profile),
                };
                self.deps.activity.publish(ActivityEvent::ready());
                format!("Profile updated for {topic} focus.")
            }
            Err(e) => {
                error!("focus resynthesis failed: {e}");
                self.deps.activity.publish(ActivityEvent::ready());
                "Profile update encountered an issue. Continue with current understanding."
                    .to_string()
            }
        }
    }
}

fn non_empty_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn conversation_title(transcript: &[ConversationMessage]) -> String {
    let first = transcript
        .iter()
        .find(|m| m.sender == "user")
        .map(|m| m.message.as_str())
        .unwrap_or("New conversation");
    let mut title: String = first.chars().take(60).collect();
    if first.chars().count() > 60 {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::{EnrichmentConfig, GuardConfig, LlmConfig, SessionConfig, StoreConfig};
    use crate::enrichment::EnrichmentClient;
    use crate::events::ActivityChannel;
    use crate::guard::{ContentGuard, REFUSAL_RESPONSE};
    use crate::llm::{FinishReason, GenerationStream, Role, TextGenerator};
    use crate::profiler::ProfileSynthesizer;
    use crate::safety::{CRISIS_RESPONSE, CrisisInterceptor};
    use crate::session::state::SeedMessage;
    use crate::store::UserStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedGenerator {
        scripts: Mutex<VecDeque<Vec<GenerationChunk>>>,
        seen: Mutex<Vec<GenerationRequest>>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(scripts: Vec<Vec<GenerationChunk>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                seen: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn request(&self, index: usize) -> GenerationRequest {
            self.seen.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            let chunks = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
                vec![
                    GenerationChunk::Text {
                        delta: "ok".to_string(),
                    },
                    GenerationChunk::Done {
                        reason: FinishReason::Stop,
                    },
                ]
            });
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationStream> {
            Err(AgentError::Llm("no provider".to_string()))
        }
    }

    fn text_script(text: &str) -> Vec<GenerationChunk> {
        vec![
            GenerationChunk::Text {
                delta: text.to_string(),
            },
            GenerationChunk::Done {
                reason: FinishReason::Stop,
            },
        ]
    }

    fn tool_call_script(name: &str, arguments: &str) -> Vec<GenerationChunk> {
        vec![
            GenerationChunk::ToolCall(ToolCallRequest {
                call_id: "call-1".to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }),
            GenerationChunk::Done {
                reason: FinishReason::ToolCalls,
            },
        ]
    }

    fn deps_for(generator: Arc<dyn TextGenerator>) -> (SessionDeps, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store_config = StoreConfig {
            db_path: Some(dir.path().join("nova.db")),
            ..StoreConfig::default()
        };
        let deps = SessionDeps {
            store: Arc::new(UserStore::open(&store_config).unwrap()),
            enrichment: Arc::new(EnrichmentClient::new(&EnrichmentConfig::default()).unwrap()),
            synthesizer: Arc::new(ProfileSynthesizer::new(
                Arc::clone(&generator),
                &LlmConfig::default(),
            )),
            generator,
            interceptor: Arc::new(CrisisInterceptor::new()),
            guard: Arc::new(ContentGuard::new(&GuardConfig::default())),
            activity: ActivityChannel::new(),
            session: SessionConfig::default(),
        };
        (deps, dir)
    }

    fn degraded_counselor_params() -> ConnectionParams {
        ConnectionParams {
            user_id: None,
            seed_history: vec![SeedMessage {
                role: "user".to_string(),
                content: "hi again".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn crisis_override_skips_generation_entirely() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let outcome = orchestrator
            .process_turn("I want to end it all")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::CrisisOverride {
                response: CRISIS_RESPONSE.to_string()
            }
        );
        assert_eq!(generator.calls(), 0);
        let transcript = &orchestrator.state().transcript;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].message, CRISIS_RESPONSE);
    }

    #[tokio::test]
    async fn soft_crisis_phrase_passes_without_high_risk_profile() {
        let generator = ScriptedGenerator::new(vec![text_script("Tell me more about that.")]);
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let outcome = orchestrator
            .process_turn("some days I just want to give up")
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Reply { .. }));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn abusive_input_is_refused_without_generation() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let outcome = orchestrator.process_turn("fuck you").await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Refused {
                response: REFUSAL_RESPONSE.to_string()
            }
        );
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn plain_turn_generates_and_records_both_sides() {
        let generator =
            ScriptedGenerator::new(vec![text_script("You are carrying a lot right now.")]);
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let outcome = orchestrator
            .process_turn("work is crushing me")
            .await
            .unwrap();

        assert_eq!(outcome.spoken_text(), "You are carrying a lot right now.");
        assert_eq!(generator.calls(), 1);
        let history = &orchestrator.state().history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        // System prompt travels with the request, not the history.
        let request = generator.request(0);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages.len(), 2);
    }

    #[tokio::test]
    async fn reply_is_sanitized_before_speaking() {
        let generator =
            ScriptedGenerator::new(vec![text_script("Reach me at help@example.com anytime.")]);
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let outcome = orchestrator.process_turn("can I email you").await.unwrap();

        assert_eq!(
            outcome.spoken_text(),
            "Reach me at [redacted-email] anytime."
        );
    }

    #[tokio::test]
    async fn new_session_without_identity_collects() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (deps, _dir) = deps_for(generator);
        let orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;
        assert_eq!(orchestrator.persona().name(), "collector");
    }

    #[tokio::test]
    async fn seeded_history_activates_profile_less_counselor() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (deps, _dir) = deps_for(generator);
        let orchestrator = SessionOrchestrator::start(deps, degraded_counselor_params()).await;

        assert_eq!(orchestrator.persona().name(), "counselor");
        assert!(orchestrator.persona().risk_level().is_none());
        assert_eq!(orchestrator.state().history.len(), 1);
    }

    #[tokio::test]
    async fn greeting_speaks_and_is_recorded() {
        let generator = ScriptedGenerator::new(vec![text_script("Hello, I'm glad you came.")]);
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let greeting = orchestrator.greet().await;

        assert_eq!(greeting, "Hello, I'm glad you came.");
        assert_eq!(orchestrator.state().transcript.len(), 1);
        // Greeting instruction rides as the trailing system message.
        let request = generator.request(0);
        let last = request.messages.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn greeting_falls_back_when_generation_fails() {
        let (deps, _dir) = deps_for(Arc::new(FailingGenerator));
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let greeting = orchestrator.greet().await;

        assert_eq!(greeting, GREETING_FALLBACK);
        assert_eq!(orchestrator.state().transcript.len(), 1);
    }

    #[tokio::test]
    async fn focus_change_without_chart_reports_unavailable() {
        let generator = ScriptedGenerator::new(vec![
            tool_call_script(TOOL_UPDATE_PROFILE_FOCUS, r#"{"topic":"Career"}"#),
            text_script("We can still talk about work."),
        ]);
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator =
            SessionOrchestrator::start(deps, degraded_counselor_params()).await;

        let outcome = orchestrator
            .process_turn("let's focus on my career")
            .await
            .unwrap();

        assert_eq!(outcome.spoken_text(), "We can still talk about work.");
        assert_eq!(generator.calls(), 2);
        let tool_result = orchestrator
            .state()
            .history
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(
            tool_result.content,
            "Unable to update profile — client data not yet available."
        );
    }

    #[tokio::test]
    async fn exhausted_tool_rounds_force_plain_reply() {
        let rounds = SessionConfig::default().max_tool_rounds;
        let mut scripts = vec![tool_call_script("noop", "{}"); rounds];
        scripts.push(text_script("Here is what I can offer."));
        let generator = ScriptedGenerator::new(scripts);
        let (deps, _dir) = deps_for(generator.clone());
        let mut orchestrator =
            SessionOrchestrator::start(deps, degraded_counselor_params()).await;

        let outcome = orchestrator.process_turn("hello").await.unwrap();

        assert_eq!(outcome.spoken_text(), "Here is what I can offer.");
        assert_eq!(generator.calls(), rounds + 1);
        // The forced pass offers no tools.
        assert!(generator.request(rounds).tools.is_empty());
    }

    #[tokio::test]
    async fn partial_birth_details_report_what_is_missing() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (deps, _dir) = deps_for(generator);
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let result = orchestrator
            .record_birth_details(&json!({"date": "March 15, 1990", "time": "morning"}))
            .await;

        assert_eq!(result, "Recorded. Still missing: place of birth.");
        assert_eq!(
            orchestrator.state().birth.date_of_birth.as_deref(),
            Some("March 15, 1990")
        );
        assert_eq!(orchestrator.persona().name(), "collector");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_fatal() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (deps, _dir) = deps_for(generator);
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;

        let call = ToolCallRequest {
            call_id: "call-9".to_string(),
            name: "telepathy".to_string(),
            arguments: "{}".to_string(),
        };
        assert_eq!(orchestrator.dispatch_tool(&call).await, "Unknown tool: telepathy");
    }

    #[tokio::test]
    async fn finish_archives_the_transcript() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (deps, _dir) = deps_for(generator);
        let store = Arc::clone(&deps.store);
        let params = ConnectionParams {
            user_id: Some("u-42".to_string()),
            seed_history: Vec::new(),
        };
        let mut orchestrator = SessionOrchestrator::start(deps, params).await;

        orchestrator.process_turn("I want to end it all").await.unwrap();
        orchestrator.finish().unwrap();

        let conversations = store.list_conversations("u-42", 5).unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].title, "I want to end it all");
        assert_eq!(conversations[0].messages.len(), 2);
        // A second finish has nothing left to flush.
        orchestrator.finish().unwrap();
        assert_eq!(store.list_conversations("u-42", 5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn anonymous_finish_is_a_no_op() {
        let generator = ScriptedGenerator::new(vec![text_script("hello")]);
        let (deps, _dir) = deps_for(generator);
        let mut orchestrator = SessionOrchestrator::start(deps, ConnectionParams::default()).await;
        orchestrator.process_turn("hi").await.unwrap();
        orchestrator.finish().unwrap();
    }

    #[test]
    fn conversation_title_truncates_long_openers() {
        let long = "a".repeat(80);
        let transcript = vec![ConversationMessage::now("user", long)];
        let title = conversation_title(&transcript);
        assert_eq!(title.chars().count(), 63);
        assert!(title.ends_with("..."));

        let transcript = vec![ConversationMessage::now("assistant", "welcome")];
        assert_eq!(conversation_title(&transcript), "New conversation");
    }
}
