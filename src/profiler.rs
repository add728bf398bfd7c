//! Profile synthesis.
//!
//! [`ProfileSynthesizer`] turns a birth chart into a validated
//! [`ProfileDocument`] with one generation call. Validation failures keep
//! their two causes apart: output that is not JSON at all versus a JSON
//! object missing required sections. Callers downgrade to a profile-less
//! session on either, but the logs should say which happened.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::enrichment::ChartDocument;
use crate::error::{AgentError, Result, SynthesisError};
use crate::llm::{ChatMessage, GenerationRequest, TextGenerator, collect_text};
use crate::profile::{FocusTopic, ProfileDocument};
use crate::prompts::PROFILER_INSTRUCTIONS;

/// Token allowance for a synthesis reply. Profile documents run an order
/// of magnitude longer than conversational turns.
const PROFILE_MAX_TOKENS: u32 = 4096;

/// Turns a birth chart into a personality profile document.
pub struct ProfileSynthesizer {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl ProfileSynthesizer {
    /// Create a synthesizer using the configured profiler model.
    pub fn new(generator: Arc<dyn TextGenerator>, config: &LlmConfig) -> Self {
        Self {
            generator,
            model: config.profiler_model().to_owned(),
        }
    }

    /// Generate and validate a profile for the given chart and focus topic.
    ///
    /// The returned document always carries the requested topic and a fresh
    /// generation timestamp, regardless of what the model emitted.
    ///
    /// # Errors
    ///
    /// [`AgentError::Synthesis`] when the reply is not parseable JSON
    /// ([`SynthesisError::MalformedOutput`]) or is missing required
    /// sections ([`SynthesisError::IncompleteOutput`]); [`AgentError::Llm`]
    /// when the generation itself fails.
    pub async fn synthesize(
        &self,
        chart: &ChartDocument,
        topic: FocusTopic,
    ) -> Result<ProfileDocument> {
        let chart_json = serde_json::to_string_pretty(chart)
            .map_err(|e| AgentError::Llm(format!("failed to encode chart for synthesis: {e}")))?;

        let messages = vec![
            ChatMessage::system(PROFILER_INSTRUCTIONS),
            ChatMessage::user(format!(
                "Focus topic: {topic}\n\nBirth chart data:\n{chart_json}"
            )),
        ];
        let request = GenerationRequest::from_messages(messages)
            .with_model(&self.model)
            .with_max_tokens(PROFILE_MAX_TOKENS);

        let stream = self.generator.generate(request).await?;
        let raw = collect_text(stream).await?;

        let stripped = strip_code_fences(&raw);
        let value: serde_json::Value = serde_json::from_str(stripped).map_err(|e| {
            warn!(error = %e, "synthesis reply was not valid JSON");
            SynthesisError::MalformedOutput(format!("reply is not valid JSON: {e}"))
        })?;

        let mut document = ProfileDocument::from_value(value)?;
        for warning in document.diagnostic_warnings() {
            warn!(%warning, "profile diagnostic");
        }
        document.stamp_focus(topic, Utc::now());
        info!(%topic, "profile synthesized");
        Ok(document)
    }
}

/// Strip a surrounding markdown code fence, if any.
///
/// Models asked for raw JSON wrap it in ```` ```json ```` fences often
/// enough that accepting them is part of the contract.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = match body.find('\n') {
        Some(pos) => &body[pos + 1..],
        None => body,
    };
    body.trim()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::sync::Mutex;

    use super::*;
    use crate::llm::{FinishReason, GenerationChunk, GenerationStream};

    struct ScriptedGenerator {
        reply: String,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: impl Into<String>) -> Self {
            Self {
                reply: reply.into(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream> {
            self.seen.lock().unwrap().push(request);
            let chunks = vec![
                GenerationChunk::Text {
                    delta: self.reply.clone(),
                },
                GenerationChunk::Done {
                    reason: FinishReason::Stop,
                },
            ];
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    fn chart_fixture() -> ChartDocument {
        let mut chart = ChartDocument::default();
        chart.details.ascendant = "Leo".into();
        chart.details.nakshatra = "Ashwini".into();
        chart
    }

    fn valid_reply() -> String {
        serde_json::json!({
            "core_identity": {"archetype": "The Builder"},
            "emotional_architecture": {"attachment_style": "Secure"},
            "cognitive_processing": {"style": "deliberate"},
            "current_psychological_climate": {
                "season_of_life": "Consolidating",
                "primary_stressor": "Workload",
                "primary_symptom_match": "none noted",
                "somatic_signature": "jaw tension",
                "risk_factors": {"crisis_risk_level": "Low"},
            },
            "domain_specific_insight": {"topic": "General"},
            "therapist_cheat_sheet": {"do": ["slow down"], "dont": ["rush"]},
        })
        .to_string()
    }

    fn synthesizer_with(reply: impl Into<String>) -> (Arc<ScriptedGenerator>, ProfileSynthesizer) {
        let generator = Arc::new(ScriptedGenerator::replying(reply));
        let mut config = LlmConfig::default();
        config.profiler_model = Some("profiler-large".into());
        let synthesizer = ProfileSynthesizer::new(generator.clone(), &config);
        (generator, synthesizer)
    }

    // ── strip_code_fences ─────────────────────────────────────

    #[test]
    fn fences_plain_text_untouched() {
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn fences_json_info_string_removed() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn fences_bare_fence_removed() {
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn fences_unclosed_fence_left_alone() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}"), "```json\n{\"a\":1}");
    }

    // ── synthesize ────────────────────────────────────────────

    #[tokio::test]
    async fn synthesize_accepts_fenced_reply_and_stamps_topic() {
        let fenced = format!("```json\n{}\n```", valid_reply());
        let (_generator, synthesizer) = synthesizer_with(fenced);

        let document = synthesizer
            .synthesize(&chart_fixture(), FocusTopic::Career)
            .await
            .unwrap();

        // The model said General; the request asked for Career.
        assert_eq!(document.focus_topic(), FocusTopic::Career);
        assert_eq!(
            document.as_value().pointer("/meta/current_focus_topic"),
            Some(&serde_json::json!("Career"))
        );
        assert!(
            document
                .as_value()
                .pointer("/meta/generated_at")
                .and_then(serde_json::Value::as_str)
                .is_some()
        );
    }

    #[tokio::test]
    async fn synthesize_requests_profiler_model_with_chart_payload() {
        let (generator, synthesizer) = synthesizer_with(valid_reply());
        synthesizer
            .synthesize(&chart_fixture(), FocusTopic::General)
            .await
            .unwrap();

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let request = &seen[0];
        assert_eq!(request.model.as_deref(), Some("profiler-large"));
        assert_eq!(request.max_tokens, Some(PROFILE_MAX_TOKENS));
        assert!(request.tools.is_empty());
        assert!(request.messages[1].content.contains("Leo"));
        assert!(request.messages[1].content.contains("Focus topic: General"));
    }

    #[tokio::test]
    async fn synthesize_rejects_non_json_as_malformed() {
        let (_generator, synthesizer) =
            synthesizer_with("I am sorry, I cannot produce that document.");
        let err = synthesizer
            .synthesize(&chart_fixture(), FocusTopic::General)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Synthesis(SynthesisError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn synthesize_rejects_missing_sections_as_incomplete() {
        let reply = serde_json::json!({
            "core_identity": {},
            "emotional_architecture": {},
        })
        .to_string();
        let (_generator, synthesizer) = synthesizer_with(reply);
        let err = synthesizer
            .synthesize(&chart_fixture(), FocusTopic::General)
            .await
            .unwrap_err();
        match err {
            AgentError::Synthesis(SynthesisError::IncompleteOutput { missing }) => {
                assert!(missing.contains(&"therapist_cheat_sheet".to_string()));
                assert!(!missing.contains(&"core_identity".to_string()));
            }
            other => panic!("expected IncompleteOutput, got {other:?}"),
        }
    }
}
