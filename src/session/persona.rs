//! Conversation personas.
//!
//! A persona is a closed behavior configuration: instructions, tools, and
//! how to open. Sessions swap the active variant rather than mutating it,
//! so a handoff can never leave a half-updated persona behind.

use serde_json::json;

use crate::llm::ToolDefinition;
use crate::profile::{ProfileDocument, RiskLevel};
use crate::prompts::{
    COLLECTOR_GREETING, COLLECTOR_INSTRUCTIONS, COUNSELOR_GREETING, COUNSELOR_INSTRUCTIONS,
    PROFILE_CONTEXT_HEADER, VOICE_RULES,
};

pub const TOOL_RECORD_BIRTH_DETAILS: &str = "record_birth_details";
pub const TOOL_USE_CHAT_LOCATION_FALLBACK: &str = "use_chat_location_fallback";
pub const TOOL_UPDATE_PROFILE_FOCUS: &str = "update_profile_focus";

/// The closed set of personas a session can run under.
#[derive(Debug, Clone)]
pub enum Persona {
    /// Intake: gathering birth details in conversation.
    Collector,
    /// Counseling, optionally informed by a synthesized profile.
    Counselor { profile: Option<ProfileDocument> },
}

impl Persona {
    pub fn name(&self) -> &'static str {
        match self {
            Persona::Collector => "collector",
            Persona::Counselor { .. } => "counselor",
        }
    }

    /// Full system prompt for this persona.
    ///
    /// A counselor with a profile gets it appended as hidden context; the
    /// document is never spoken, only drawn on.
    pub fn instructions(&self) -> String {
        match self {
            Persona::Collector => format!("{VOICE_RULES}\n\n{COLLECTOR_INSTRUCTIONS}"),
            Persona::Counselor { profile: None } => {
                format!("{VOICE_RULES}\n\n{COUNSELOR_INSTRUCTIONS}")
            }
            Persona::Counselor {
                profile: Some(profile),
            } => {
                let document =
                    serde_json::to_string_pretty(profile.as_value()).unwrap_or_default();
                format!(
                    "{VOICE_RULES}\n\n{COUNSELOR_INSTRUCTIONS}\n\n{PROFILE_CONTEXT_HEADER}\n{document}"
                )
            }
        }
    }

    /// Tools offered to the model under this persona.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        match self {
            Persona::Collector => vec![record_birth_details_tool(), chat_location_fallback_tool()],
            Persona::Counselor { .. } => vec![update_profile_focus_tool()],
        }
    }

    /// One-off instruction for the opening reply after entering this
    /// persona.
    pub fn greeting_instructions(&self) -> &'static str {
        match self {
            Persona::Collector => COLLECTOR_GREETING,
            Persona::Counselor { .. } => COUNSELOR_GREETING,
        }
    }

    /// Assessed crisis risk from the active profile, when there is one.
    pub fn risk_level(&self) -> Option<RiskLevel> {
        match self {
            Persona::Counselor {
                profile: Some(profile),
            } => profile.risk_level(),
            _ => None,
        }
    }
}

fn record_birth_details_tool() -> ToolDefinition {
    ToolDefinition::new(
        TOOL_RECORD_BIRTH_DETAILS,
        "Record birth details the user just shared. Call with whichever of \
         date, time, and place were given; fields may arrive across turns. \
         A place is geocoded immediately and the result tells you what is \
         still missing.",
        json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Birth date as spoken, e.g. 'March 15, 1990'",
                },
                "time": {
                    "type": "string",
                    "description": "Birth time as spoken, e.g. '9:30 pm' or 'morning'",
                },
                "place": {
                    "type": "string",
                    "description": "Birth city and country, e.g. 'Mumbai, India'",
                },
            },
        }),
    )
}

fn chat_location_fallback_tool() -> ToolDefinition {
    ToolDefinition::new(
        TOOL_USE_CHAT_LOCATION_FALLBACK,
        "Ask the user to type their birth place into the chat instead of \
         saying it aloud. Use after a place name has failed to resolve \
         twice, or when the user is clearly struggling to be understood.",
        json!({"type": "object", "properties": {}}),
    )
}

fn update_profile_focus_tool() -> ToolDefinition {
    ToolDefinition::new(
        TOOL_UPDATE_PROFILE_FOCUS,
        "Rebuild the client profile around the life domain the \
         conversation has settled on. Call once when the topic becomes \
         clear, not on every mention.",
        json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "enum": ["General", "Career", "Love", "Trauma"],
                    "description": "Life domain the client wants to explore",
                },
            },
            "required": ["topic"],
        }),
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    fn profile() -> ProfileDocument {
        ProfileDocument::from_value(json!({
            "core_identity": {"archetype": "The Healer"},
            "emotional_architecture": {"attachment_style": "Secure"},
            "cognitive_processing": {"style": "intuitive"},
            "current_psychological_climate": {
                "season_of_life": "Rebuilding",
                "primary_stressor": "Career transition",
                "risk_factors": {"crisis_risk_level": "High"},
            },
            "domain_specific_insight": {"topic": "Career"},
            "therapist_cheat_sheet": {"do": [], "dont": []},
        }))
        .unwrap()
    }

    #[test]
    fn collector_offers_intake_tools_only() {
        let names: Vec<_> = Persona::Collector
            .tools()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![TOOL_RECORD_BIRTH_DETAILS, TOOL_USE_CHAT_LOCATION_FALLBACK]
        );
    }

    #[test]
    fn counselor_offers_focus_tool_only() {
        let persona = Persona::Counselor { profile: None };
        let names: Vec<_> = persona.tools().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec![TOOL_UPDATE_PROFILE_FOCUS]);
    }

    #[test]
    fn counselor_instructions_embed_profile_as_hidden_context() {
        let persona = Persona::Counselor {
            profile: Some(profile()),
        };
        let instructions = persona.instructions();
        assert!(instructions.contains(PROFILE_CONTEXT_HEADER));
        assert!(instructions.contains("The Healer"));
        assert!(instructions.starts_with(VOICE_RULES));
    }

    #[test]
    fn profile_less_counselor_has_no_hidden_context_block() {
        let persona = Persona::Counselor { profile: None };
        assert!(!persona.instructions().contains(PROFILE_CONTEXT_HEADER));
    }

    #[test]
    fn risk_level_comes_from_the_active_profile() {
        assert_eq!(Persona::Collector.risk_level(), None);
        assert_eq!(Persona::Counselor { profile: None }.risk_level(), None);
        assert_eq!(
            Persona::Counselor {
                profile: Some(profile())
            }
            .risk_level(),
            Some(RiskLevel::High)
        );
    }

    #[test]
    fn focus_tool_requires_a_topic() {
        let tool = update_profile_focus_tool();
        assert_eq!(tool.parameters["required"], json!(["topic"]));
        assert_eq!(
            tool.parameters["properties"]["topic"]["enum"],
            json!(["General", "Career", "Love", "Trauma"])
        );
    }

    #[test]
    fn greeting_instructions_differ_by_persona() {
        assert_ne!(
            Persona::Collector.greeting_instructions(),
            Persona::Counselor { profile: None }.greeting_instructions()
        );
    }
}
