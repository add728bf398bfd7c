//! Place-name geocoding via the Google Geocoding API.

use serde::Deserialize;

use crate::error::{AgentError, Result};

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

/// Geocoding client. Without an API key the feature is disabled and every
/// lookup resolves to no result, which the collector persona treats as
/// "ask the user for coordinates another way".
pub struct GeocodeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeocodeClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Resolve a place name to `(latitude, longitude)`.
    ///
    /// `Ok(None)` when the key is absent or the API has no match for the
    /// place.
    ///
    /// # Errors
    ///
    /// [`AgentError::ExternalService`] on transport or decode failure.
    pub async fn geocode(&self, place: &str) -> Result<Option<(f64, f64)>> {
        let Some(api_key) = &self.api_key else {
            tracing::debug!("geocoding disabled: no API key configured");
            return Ok(None);
        };

        let url = format!("{}/geocode/json", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("address", place), ("key", api_key)])
            .send()
            .await
            .map_err(|e| AgentError::ExternalService(format!("geocode request failed: {e}")))?;
        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ExternalService(format!("geocode response invalid: {e}")))?;

        if body.status != "OK" || body.results.is_empty() {
            tracing::warn!(status = %body.status, place, "geocode returned no result");
            return Ok(None);
        }
        let location = &body.results[0].geometry.location;
        Ok(Some((location.lat, location.lng)))
    }
}
