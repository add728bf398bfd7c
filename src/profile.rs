//! Personality profile documents.
//!
//! A profile is a JSON document produced by the synthesizer and consumed as
//! hidden context by the counselor persona. The document stays
//! schema-flexible (the model owns most of its shape); this module pins down
//! only the parts the rest of the system depends on: the required top-level
//! sections, the crisis risk level, and the focus topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::SynthesisError;

/// Top-level sections every valid profile must contain.
pub const REQUIRED_SECTIONS: [&str; 6] = [
    "core_identity",
    "emotional_architecture",
    "cognitive_processing",
    "current_psychological_climate",
    "domain_specific_insight",
    "therapist_cheat_sheet",
];

/// Diagnostic sub-fields of the climate section. Absence is tolerated.
const DIAGNOSTIC_FIELDS: [&str; 3] = ["primary_symptom_match", "somatic_signature", "risk_factors"];

/// Life area a profile is focused on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusTopic {
    #[default]
    General,
    Career,
    Love,
    Trauma,
}

impl FocusTopic {
    /// Canonical capitalized name, as stored in documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "General",
            Self::Career => "Career",
            Self::Love => "Love",
            Self::Trauma => "Trauma",
        }
    }

    /// Parse a topic name, case-insensitively. Unknown names map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Self::General),
            "career" => Some(Self::Career),
            "love" => Some(Self::Love),
            "trauma" => Some(Self::Trauma),
            _ => None,
        }
    }
}

impl std::fmt::Display for FocusTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assessed crisis risk. Ordered: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parse the stored string form. Anything unrecognised maps to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(Self::Low),
            "Medium" => Some(Self::Medium),
            "High" => Some(Self::High),
            _ => None,
        }
    }
}

/// A validated personality profile document.
///
/// Wraps the raw JSON so callers get typed access to the load-bearing
/// fields without this crate freezing the model-owned parts of the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileDocument(Value);

impl ProfileDocument {
    /// Validate a parsed model reply into a profile document.
    ///
    /// # Errors
    ///
    /// [`SynthesisError::MalformedOutput`] when the root is not an object,
    /// [`SynthesisError::IncompleteOutput`] when required sections are
    /// missing. Diagnostic sub-fields are not checked here; see
    /// [`Self::diagnostic_warnings`].
    pub fn from_value(value: Value) -> Result<Self, SynthesisError> {
        let Some(map) = value.as_object() else {
            return Err(SynthesisError::MalformedOutput(
                "document root is not a JSON object".into(),
            ));
        };
        let missing: Vec<String> = REQUIRED_SECTIONS
            .iter()
            .filter(|section| !map.contains_key(**section))
            .map(|section| (*section).to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(SynthesisError::IncompleteOutput { missing });
        }
        Ok(Self(value))
    }

    /// Soft-failure diagnostics: absent climate sub-fields and unparseable
    /// risk levels. The synthesizer logs these; they never fail validation.
    pub fn diagnostic_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let climate = self.0.get("current_psychological_climate");
        for field in DIAGNOSTIC_FIELDS {
            let present = climate.and_then(|c| c.get(field)).is_some();
            if !present {
                warnings.push(format!(
                    "missing diagnostic field: current_psychological_climate.{field}"
                ));
            }
        }
        if let Some(raw) = self
            .0
            .pointer("/current_psychological_climate/risk_factors/crisis_risk_level")
        {
            let ok = raw.as_str().is_some_and(|s| RiskLevel::parse(s).is_some());
            if !ok {
                warnings.push(format!(
                    "invalid crisis_risk_level {raw}; expected Low, Medium, or High"
                ));
            }
        }
        warnings
    }

    /// Assessed crisis risk, if the document carries a recognisable one.
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.0
            .pointer("/current_psychological_climate/risk_factors/crisis_risk_level")?
            .as_str()
            .and_then(RiskLevel::parse)
    }

    /// Focus topic recorded in the domain insight section.
    pub fn focus_topic(&self) -> FocusTopic {
        self.0
            .pointer("/domain_specific_insight/topic")
            .and_then(Value::as_str)
            .and_then(FocusTopic::parse)
            .unwrap_or_default()
    }

    /// Stamp the focus topic and generation metadata into the document.
    ///
    /// Runs after validation on every synthesis, overwriting whatever topic
    /// the model emitted, so the stored topic always matches the one the
    /// synthesis was asked for.
    pub fn stamp_focus(&mut self, topic: FocusTopic, generated_at: DateTime<Utc>) {
        if let Some(domain) = self
            .0
            .get_mut("domain_specific_insight")
            .and_then(Value::as_object_mut)
        {
            domain.insert("topic".into(), json!(topic.as_str()));
        }
        let meta = json!({
            "current_focus_topic": topic.as_str(),
            "generated_at": generated_at.to_rfc3339(),
        });
        if let Some(map) = self.0.as_object_mut() {
            map.insert("meta".into(), meta);
        }
    }

    /// Short human-readable summary for the activity side channel.
    ///
    /// Empty string when none of the summarised fields are present.
    pub fn summary(&self) -> String {
        let field = |pointer: &str| self.0.pointer(pointer).and_then(Value::as_str);
        let mut parts = Vec::new();
        if let Some(v) = field("/core_identity/archetype") {
            parts.push(format!("Archetype: {v}"));
        }
        if let Some(v) = field("/emotional_architecture/attachment_style") {
            parts.push(format!("Attachment: {v}"));
        }
        if let Some(v) = field("/current_psychological_climate/season_of_life") {
            parts.push(format!("Season: {v}"));
        }
        if let Some(v) = field("/current_psychological_climate/primary_stressor") {
            parts.push(format!("Stressor: {v}"));
        }
        if let Some(v) = field("/domain_specific_insight/topic") {
            parts.push(format!("Focus: {v}"));
        }
        parts.join(" · ")
    }

    /// The underlying JSON document.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}
