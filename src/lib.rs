//! Nova: a voice-first psychologist agent with per-user profiles.
//!
//! Each user's session runs a four-stage pipeline before counseling
//! begins: Collect → Enrich → Synthesize → Activate.
//!
//! # Architecture
//!
//! - **Collect**: a conversational intake persona gathers birth details
//!   (date, time, place), geocoding places as they arrive
//! - **Enrich**: concurrent external lookups turn birth details into a
//!   structured chart document
//! - **Synthesize**: a model call turns the chart into a validated
//!   psychological profile focused on one life domain
//! - **Activate**: the counselor persona converses with the profile as
//!   hidden context, behind a deterministic crisis interceptor and
//!   content guard
//!
//! Stage outputs are cached per user in a durable store with a sliding
//! retention window, so returning users skip straight to counseling.

pub mod config;
pub mod enrichment;
pub mod error;
pub mod events;
pub mod guard;
pub mod host;
pub mod llm;
pub mod llm_http;
pub mod profile;
pub mod profiler;
pub mod prompts;
pub mod safety;
pub mod session;
pub mod store;

pub use config::NovaConfig;
pub use error::{AgentError, Result};
pub use events::{ActivityChannel, ActivityEvent};
pub use profile::{FocusTopic, ProfileDocument, RiskLevel};
pub use session::{ConnectionParams, SessionDeps, SessionOrchestrator, TurnOutcome};
