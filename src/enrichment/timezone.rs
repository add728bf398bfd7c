//! UTC offset resolution for a location at the birth moment.
//!
//! Uses the Google Time Zone API when a key is configured. Without one the
//! offset is estimated from longitude alone (15 degrees per hour), which is
//! a documented degraded mode, not an error: charts computed from the
//! estimate are still usable, just less precise near zone borders.

use serde::Deserialize;

use super::birth::BirthMoment;

#[derive(Debug, Deserialize)]
struct TimezoneResponse {
    status: String,
    #[serde(default, rename = "rawOffset")]
    raw_offset: f64,
    #[serde(default, rename = "dstOffset")]
    dst_offset: f64,
    #[serde(default, rename = "timeZoneId")]
    time_zone_id: String,
}

/// Timezone lookup client.
pub struct TimezoneClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TimezoneClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// UTC offset in hours for `(lat, lon)` at the birth moment.
    ///
    /// Returns `None` only when the API was reachable in principle (key
    /// configured) but the lookup failed; the caller then substitutes the
    /// same longitude-based estimate used in keyless mode and finishes
    /// collection with a warning. All failures are logged here, never
    /// surfaced as errors.
    pub async fn resolve_utc_offset(
        &self,
        lat: f64,
        lon: f64,
        moment: &BirthMoment,
    ) -> Option<f64> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("no timezone API key; falling back to longitude-based estimate");
            return Some((lon / 15.0).round());
        };

        let timestamp = moment.naive_datetime().and_utc().timestamp();
        let url = format!("{}/timezone/json", self.base_url);
        let response = match self
            .http
            .get(&url)
            .query(&[
                ("location", format!("{lat},{lon}")),
                ("timestamp", timestamp.to_string()),
                ("key", api_key.clone()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("timezone request failed: {e}");
                return None;
            }
        };
        let body: TimezoneResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("timezone response invalid: {e}");
                return None;
            }
        };
        if body.status != "OK" {
            tracing::warn!(status = %body.status, "timezone API returned non-OK status");
            return None;
        }

        let offset_hours = (body.raw_offset + body.dst_offset) / 3600.0;
        tracing::info!(
            zone = %body.time_zone_id,
            offset_hours,
            "resolved timezone for {lat},{lon}"
        );
        Some(offset_hours)
    }
}
