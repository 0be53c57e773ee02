use serde::{Deserialize, Serialize};

/// Literal noise word the geocoder appends to Egyptian administrative areas.
const NOISE_SUFFIX: &str = "governorate";

/// A one-off device fix. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Normalized place name derived from reverse geocoding.
///
/// May be empty when the geocoder returned no candidate; callers treat an
/// empty name as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaceName(String);

impl PlaceName {
    /// Lower-cases the administrative area, strips the noise word and trims.
    pub fn from_admin_area(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        Self(lowered.replace(NOISE_SUFFIX, "").trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for PlaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current conditions as reported by the weather provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub condition: String,
    pub temperature_c: f32,
}

/// A persisted history entry. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedPhoto {
    pub id: i64,
    pub image_uri: String,
    pub place_name: String,
}

/// A history entry before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub image_uri: String,
    pub place_name: String,
}
