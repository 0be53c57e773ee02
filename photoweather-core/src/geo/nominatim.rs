//! Reverse geocoding via Nominatim (OpenStreetMap). No API key required.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    error::{GeocodeError, truncate_body},
    model::Location,
};

use super::ReverseGeocoder;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("photoweather/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    state: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    base_url: String,
    language: String,
    http: Client,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, language: &str) -> Result<Self, GeocodeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
            http,
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn admin_area(&self, location: Location) -> Result<Option<String>, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);
        let lat = location.latitude.to_string();
        let lon = location.longitude.to_string();

        tracing::debug!(lat = %lat, lon = %lon, "requesting reverse geocode");

        let res = self
            .http
            .get(&url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "jsonv2"),
                ("zoom", "10"),
                ("accept-language", self.language.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(GeocodeError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        // Nominatim answers 200 with `{"error": ...}` when nothing matches.
        let parsed: NominatimResponse =
            serde_json::from_str(&body).map_err(GeocodeError::Decode)?;

        Ok(parsed.address.and_then(|a| a.state))
    }
}
