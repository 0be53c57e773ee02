//! Core library for the `photoweather` CLI.
//!
//! This crate defines:
//! - Configuration handling
//! - Device location and reverse geocoding
//! - The weather provider abstraction
//! - Caption composition and rendering onto photos
//! - Durable image and history storage
//! - The annotation pipeline tying them together
//!
//! It is used by `photoweather-cli`, but can also be reused by other binaries or services.

pub mod annotate;
pub mod caption;
pub mod config;
pub mod error;
pub mod geo;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod sink;
pub mod store;

pub use annotate::{ImageAnnotator, RenderedImage, RusttypePainter, TextPainter};
pub use caption::Caption;
pub use config::Config;
pub use error::{GeocodeError, PipelineError, StoreError, WeatherFetchError};
pub use geo::{DeviceGeoResolver, GeoResolver};
pub use model::{AnnotatedPhoto, Location, NewRecord, PlaceName, WeatherReading};
pub use pipeline::{AnnotationPipeline, PipelineDeps, PipelineOutcome, PipelineRun, PipelineState};
pub use provider::{OpenWeatherClient, WeatherClient};
pub use sink::{FileImageSink, ImageSink, SavedImage};
pub use store::{RecordStore, SqliteRecordStore};
