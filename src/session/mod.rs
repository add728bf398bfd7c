//! Per-connection session machinery.
//!
//! A session is born from [`ConnectionParams`], resolves its entry stage
//! from the durable record ([`resolver`]), and then runs the conversation
//! through [`SessionOrchestrator`] until teardown. Everything a session
//! touches is injected through [`SessionDeps`]; nothing in this module
//! reaches for globals.

pub mod orchestrator;
pub mod persona;
pub mod resolver;
pub mod state;

pub use orchestrator::{SessionOrchestrator, TurnOutcome};
pub use persona::Persona;
pub use resolver::{EntryStage, PipelineOutcome, StagePlan, resolve, run_pipeline};
pub use state::{BirthFields, ConnectionParams, SeedMessage, SessionState};

use std::sync::Arc;

use crate::config::{NovaConfig, SessionConfig};
use crate::enrichment::EnrichmentClient;
use crate::error::Result;
use crate::events::ActivityChannel;
use crate::guard::ContentGuard;
use crate::llm::TextGenerator;
use crate::llm_http::HttpGenerator;
use crate::profiler::ProfileSynthesizer;
use crate::safety::CrisisInterceptor;
use crate::store::UserStore;

/// Shared components a session runs against.
///
/// Built once at process start and cloned per connection; every field is
/// either an `Arc` or cheap to clone.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<UserStore>,
    pub enrichment: Arc<EnrichmentClient>,
    pub generator: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<ProfileSynthesizer>,
    pub interceptor: Arc<CrisisInterceptor>,
    pub guard: Arc<ContentGuard>,
    pub activity: ActivityChannel,
    pub session: SessionConfig,
}

impl SessionDeps {
    /// Build the full component set from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be opened or an HTTP client
    /// cannot be constructed.
    pub fn new(config: &NovaConfig) -> Result<Self> {
        let store = Arc::new(UserStore::open(&config.store)?);
        let enrichment = Arc::new(EnrichmentClient::new(&config.enrichment)?);
        let generator: Arc<dyn TextGenerator> = Arc::new(HttpGenerator::new(&config.llm)?);
        let synthesizer = Arc::new(ProfileSynthesizer::new(Arc::clone(&generator), &config.llm));

        Ok(Self {
            store,
            enrichment,
            generator,
            synthesizer,
            interceptor: Arc::new(CrisisInterceptor::new()),
            guard: Arc::new(ContentGuard::new(&config.guard)),
            activity: ActivityChannel::new(),
            session: config.session.clone(),
        })
    }
}
