use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    error::{WeatherFetchError, truncate_body},
    model::{PlaceName, WeatherReading},
};

use super::WeatherClient;

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherClient {
    pub fn new(api_key: String, base_url: &str) -> Result<Self, WeatherFetchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f32,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    main: OwMain,
    weather: Vec<OwWeather>,
}

#[async_trait]
impl WeatherClient for OpenWeatherClient {
    async fn fetch_current(&self, place: &PlaceName) -> Result<WeatherReading, WeatherFetchError> {
        let url = format!("{}/data/2.5/weather", self.base_url);

        tracing::debug!(place = %place, "requesting current weather");

        let res = self
            .http
            .get(&url)
            .query(&[
                ("q", place.as_str()),
                ("units", "metric"),
                ("appid", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(WeatherFetchError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: OwCurrentResponse =
            serde_json::from_str(&body).map_err(WeatherFetchError::Decode)?;

        // Only the first reported condition is captioned.
        let condition = parsed
            .weather
            .into_iter()
            .next()
            .map(|w| w.description)
            .ok_or(WeatherFetchError::NoConditions)?;

        Ok(WeatherReading {
            condition,
            temperature_c: parsed.main.temp,
        })
    }
}
