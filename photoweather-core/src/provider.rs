use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::WeatherFetchError,
    model::{PlaceName, WeatherReading},
};

pub mod openweather;

pub use openweather::OpenWeatherClient;

/// Source of current conditions for a place.
#[async_trait]
pub trait WeatherClient: Send + Sync + Debug {
    async fn fetch_current(&self, place: &PlaceName) -> Result<WeatherReading, WeatherFetchError>;
}
