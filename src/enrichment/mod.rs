//! Enrichment stage: birth text parsing plus the external lookups that turn
//! resolved birth details into a chart document.
//!
//! Sub-modules:
//! - `birth`: free-text date/time parsing (pure, no IO).
//! - `geocode`: place name to coordinates.
//! - `timezone`: UTC offset at the birth moment, with longitude fallback.
//! - `chart`: the four-endpoint chart fetch and its document types.

pub mod birth;
pub mod chart;
pub mod geocode;
pub mod timezone;

pub use birth::BirthMoment;
pub use chart::{ChartClient, ChartDetails, ChartDocument, PlanetPosition};
pub use geocode::GeocodeClient;
pub use timezone::TimezoneClient;

use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::error::{AgentError, Result};

/// All enrichment sub-clients behind one constructor.
///
/// Built once at session setup from config and injected into the
/// components that need it; nothing here is lazily initialised or global.
pub struct EnrichmentClient {
    pub geocode: GeocodeClient,
    pub timezone: TimezoneClient,
    pub chart: ChartClient,
}

impl EnrichmentClient {
    /// Build the sub-clients over one shared HTTP connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.maps_timeout_secs))
            .build()
            .map_err(|e| {
                AgentError::ExternalService(format!("failed to build HTTP client: {e}"))
            })?;
        // The chart client enforces its own (longer) per-endpoint timeout.
        let chart_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.chart_timeout_secs))
            .build()
            .map_err(|e| {
                AgentError::ExternalService(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            geocode: GeocodeClient::new(
                http.clone(),
                &config.maps_base_url,
                config.geocode_api_key.clone(),
            ),
            timezone: TimezoneClient::new(
                http,
                &config.maps_base_url,
                config.timezone_api_key.clone(),
            ),
            chart: ChartClient::new(
                chart_http,
                &config.chart_base_url,
                config.chart_user_id.as_deref(),
                config.chart_api_key.as_deref(),
                Duration::from_secs(config.chart_timeout_secs),
            ),
        })
    }
}
