//! Birth chart retrieval.
//!
//! Four endpoint lookups run concurrently against the chart API, each with
//! its own timeout. The details endpoint is the primary: if it fails there
//! is no document. The other three are secondary and degrade to empty
//! defaults, so a flaky planets or dasha endpoint never blocks activation.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::birth::BirthMoment;

const ENDPOINT_DETAILS: &str = "astro_details";
const ENDPOINT_PLANETS: &str = "planets/extended";
const ENDPOINT_DASHA: &str = "current_vdasha";
const ENDPOINT_ASCENDANT_REPORT: &str = "general_ascendant_report";

/// Normalized chart detail fields from the primary endpoint.
///
/// The upstream response mixes naming conventions (including the
/// `Naksahtra` spelling); this is the cleaned-up shape we persist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartDetails {
    pub ascendant: String,
    pub ascendant_lord: String,
    pub sign: String,
    pub sign_lord: String,
    pub nakshatra: String,
    pub nakshatra_lord: String,
    pub varna: String,
    pub vashya: String,
    pub yoni: String,
    pub gan: String,
    pub nadi: String,
    pub charan: Option<i64>,
    pub yog: String,
    pub karan: String,
    pub tithi: String,
    pub tatva: String,
    pub name_alphabet: String,
    pub paya: String,
}

impl ChartDetails {
    /// Remap a raw details response into the normalized shape.
    fn from_api(value: &Value) -> Self {
        let s = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Self {
            ascendant: s("ascendant"),
            ascendant_lord: s("ascendant_lord"),
            sign: s("sign"),
            sign_lord: s("SignLord"),
            // Upstream misspells these keys; keep the remap in one place.
            nakshatra: s("Naksahtra"),
            nakshatra_lord: s("NaksahtraLord"),
            varna: s("Varna"),
            vashya: s("Vashya"),
            yoni: s("Yoni"),
            gan: s("Gan"),
            nadi: s("Nadi"),
            charan: value.get("Charan").and_then(Value::as_i64),
            yog: s("Yog"),
            karan: s("Karan"),
            tithi: s("Tithi"),
            tatva: s("tatva"),
            name_alphabet: s("name_alphabet"),
            paya: s("paya"),
        }
    }
}

/// One planet from the extended positions endpoint, wire names preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanetPosition {
    pub name: String,
    #[serde(rename = "fullDegree")]
    pub full_degree: f64,
    #[serde(rename = "normDegree")]
    pub norm_degree: f64,
    pub speed: f64,
    /// Upstream sends this as the string "true"/"false".
    #[serde(rename = "isRetro")]
    pub is_retro: String,
    pub sign: String,
    #[serde(rename = "signLord")]
    pub sign_lord: String,
    pub nakshatra: String,
    #[serde(rename = "nakshatraLord")]
    pub nakshatra_lord: String,
    pub nakshatra_pad: i64,
    pub house: i64,
    pub planet_awastha: String,
}

impl PlanetPosition {
    pub fn retrograde(&self) -> bool {
        self.is_retro == "true"
    }
}

/// The enrichment document persisted per user and fed to the synthesizer.
///
/// Details are flattened to the top level of the stored JSON; secondary
/// sections default to empty when their lookups failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartDocument {
    #[serde(flatten)]
    pub details: ChartDetails,
    #[serde(default)]
    pub planets: Vec<PlanetPosition>,
    #[serde(default)]
    pub dasha: Map<String, Value>,
    #[serde(default)]
    pub ascendant_report: String,
}

/// Chart API client (basic-auth, JSON POST per endpoint).
pub struct ChartClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
    timeout: Duration,
}

impl ChartClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        user_id: Option<&str>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let credentials = format!("{}:{}", user_id.unwrap_or(""), api_key.unwrap_or(""));
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        Self {
            http,
            base_url: base_url.into(),
            auth_header: format!("Basic {encoded}"),
            timeout,
        }
    }

    /// Fetch a chart document for the given birth moment and location.
    ///
    /// `None` when the primary details lookup failed; secondary failures
    /// leave their sections at defaults. All failures are logged here.
    pub async fn fetch(
        &self,
        moment: &BirthMoment,
        latitude: f64,
        longitude: f64,
        utc_offset_hours: f64,
    ) -> Option<ChartDocument> {
        let params = json!({
            "day": moment.day(),
            "month": moment.month(),
            "year": moment.year(),
            "hour": moment.hour(),
            "min": moment.minute(),
            "lat": latitude,
            "lon": longitude,
            "tzone": utc_offset_hours,
        });

        let (details, planets, dasha, report) = tokio::join!(
            self.fetch_details(&params),
            self.fetch_planets(&params),
            self.fetch_dasha(&params),
            self.fetch_ascendant_report(&params),
        );

        let Some(details) = details else {
            tracing::error!("primary chart lookup failed; no document produced");
            return None;
        };
        Some(ChartDocument {
            details,
            planets,
            dasha: dasha.unwrap_or_default(),
            ascendant_report: report.unwrap_or_default(),
        })
    }

    async fn fetch_details(&self, params: &Value) -> Option<ChartDetails> {
        let value = self.post_json(ENDPOINT_DETAILS, params).await?;
        Some(ChartDetails::from_api(&value))
    }

    async fn fetch_planets(&self, params: &Value) -> Vec<PlanetPosition> {
        let Some(value) = self.post_json(ENDPOINT_PLANETS, params).await else {
            return Vec::new();
        };
        match serde_json::from_value(value) {
            Ok(planets) => planets,
            Err(e) => {
                tracing::error!("planet positions response did not decode: {e}");
                Vec::new()
            }
        }
    }

    async fn fetch_dasha(&self, params: &Value) -> Option<Map<String, Value>> {
        match self.post_json(ENDPOINT_DASHA, params).await? {
            Value::Object(map) => Some(map),
            other => {
                tracing::error!("dasha response was not an object: {other}");
                None
            }
        }
    }

    async fn fetch_ascendant_report(&self, params: &Value) -> Option<String> {
        let value = self.post_json(ENDPOINT_ASCENDANT_REPORT, params).await?;
        value
            .pointer("/asc_report/report")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    async fn post_json(&self, endpoint: &str, params: &Value) -> Option<Value> {
        let url = format!("{}/{endpoint}", self.base_url);
        let send = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(params)
            .send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(endpoint, "chart request failed: {e}");
                return None;
            }
            Err(_) => {
                tracing::error!(endpoint, "chart request timed out");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::error!(endpoint, status = %response.status(), "chart endpoint error");
            return None;
        }
        match response.json().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(endpoint, "chart response invalid: {e}");
                None
            }
        }
    }
}
