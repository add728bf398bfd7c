//! Error types for the nova agent core.
//!
//! Crisis overrides are deliberately absent here: a safety interception is a
//! successful turn outcome (`session::TurnOutcome::CrisisOverride`), not an
//! error, so it never travels through this taxonomy.

/// Top-level error type for the agent pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Malformed caller input (unparseable birth date/time, bad metadata).
    #[error("validation error: {0}")]
    Validation(String),

    /// An external dependency (geocode, timezone, chart API) failed in a way
    /// that could not be degraded around.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Profile synthesis produced unusable output.
    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Durable store read/write error.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Language model request or stream error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a synthesized profile document was rejected.
///
/// Callers branch on this: malformed output is retryable with the same
/// inputs, incomplete output usually means the instructions and the model
/// disagree about the schema and a retry is unlikely to help.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// The model reply was not parseable as a JSON document.
    #[error("model output is not valid JSON: {0}")]
    MalformedOutput(String),

    /// The document parsed but required sections are missing.
    #[error("profile document missing required sections: {}", .missing.join(", "))]
    IncompleteOutput {
        /// Names of the absent top-level sections.
        missing: Vec<String>,
    },
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AgentError>;
