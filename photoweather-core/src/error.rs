//! Typed failures of each pipeline collaborator, and the pipeline's own error
//! which is the only place they are turned into user-facing text.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("reverse geocoding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("reverse geocoding returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse reverse geocoding response: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum WeatherFetchError {
    #[error("failed to send request to OpenWeather: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("OpenWeather request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse OpenWeather JSON: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("OpenWeather response contained no weather conditions")]
    NoConditions,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("history database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("history database worker is no longer running")]
    WorkerGone,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no device location available")]
    NoLocation,
    #[error(transparent)]
    Geocode(#[from] GeocodeError),
    #[error("reverse geocoding returned no place name")]
    EmptyPlace,
    #[error(transparent)]
    WeatherFetch(#[from] WeatherFetchError),
    #[error("failed to persist annotated photo: {0}")]
    StoreWrite(#[from] StoreError),
    #[error("annotation run was cancelled")]
    Cancelled,
}

/// Caps an upstream error body before it is carried in an error value.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

impl PipelineError {
    /// Message suitable for showing to the person who took the photo.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::NoLocation => "Couldn't fetch location, enable GPS and try again.",
            PipelineError::Geocode(_) | PipelineError::EmptyPlace => "App needs Internet to work.",
            PipelineError::WeatherFetch(_) => {
                "Problem fetching the weather data, check your connection."
            }
            PipelineError::StoreWrite(_) => "Couldn't save the annotated photo, please try again.",
            PipelineError::Cancelled => "Photo annotation was cancelled.",
        }
    }

    /// Whether the failure came from reverse geocoding, including an empty result.
    pub fn is_geocode(&self) -> bool {
        matches!(self, PipelineError::Geocode(_) | PipelineError::EmptyPlace)
    }
}
