//! The photo annotation workflow: locate, geocode, fetch weather, render,
//! persist. Each run owns its working state and ends in exactly one terminal
//! outcome.
//!
//! Cancellation is honoured up to the start of persisting. Once the image is
//! being written the run completes and reports what actually happened, so a
//! cancelled run never leaves a history record behind.

use std::sync::Arc;

use chrono::NaiveDateTime;
use image::RgbImage;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    annotate::{ImageAnnotator, RenderedImage},
    caption::{self, Caption},
    error::PipelineError,
    geo::GeoResolver,
    model::{AnnotatedPhoto, NewRecord, PlaceName},
    provider::WeatherClient,
    sink::ImageSink,
    store::RecordStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    LocatingResolving,
    FetchingWeather,
    Rendering,
    Persisting,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::LocatingResolving => "locating",
            PipelineState::FetchingWeather => "fetching weather",
            PipelineState::Rendering => "rendering",
            PipelineState::Persisting => "saving",
            PipelineState::Succeeded => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct AnnotationSuccess {
    pub rendered: RenderedImage,
    pub caption: Caption,
    pub record: AnnotatedPhoto,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded(AnnotationSuccess),
    Failed { error: PipelineError, message: String },
}

impl PipelineOutcome {
    fn from_result(result: Result<AnnotationSuccess, PipelineError>) -> Self {
        match result {
            Ok(success) => PipelineOutcome::Succeeded(success),
            Err(error) => {
                let message = error.user_message().to_string();
                PipelineOutcome::Failed { error, message }
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        match self {
            PipelineOutcome::Succeeded(_) => PipelineState::Succeeded,
            PipelineOutcome::Failed { .. } => PipelineState::Failed,
        }
    }
}

/// Collaborators injected into the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDeps {
    pub geo: Arc<dyn GeoResolver>,
    pub weather: Arc<dyn WeatherClient>,
    pub annotator: ImageAnnotator,
    pub sink: Arc<dyn ImageSink>,
    pub store: Arc<dyn RecordStore>,
}

/// Everything computed before anything is written.
struct Prepared {
    place: PlaceName,
    caption: Caption,
    rendered: RenderedImage,
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[derive(Debug, Clone)]
pub struct AnnotationPipeline {
    deps: PipelineDeps,
    clock: fn() -> NaiveDateTime,
    scope: CancellationToken,
}

/// A spawned run: observe its stages, then await its outcome.
#[derive(Debug)]
pub struct PipelineRun {
    pub state: watch::Receiver<PipelineState>,
    handle: JoinHandle<PipelineOutcome>,
}

impl PipelineRun {
    pub async fn finish(self) -> PipelineOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "annotation task ended abnormally");
                PipelineOutcome::from_result(Err(PipelineError::Cancelled))
            }
        }
    }
}

impl AnnotationPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            clock: local_now,
            scope: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Ties every run to `scope`; cancelling it stops runs in flight.
    #[must_use]
    pub fn with_scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    /// Runs one annotation to completion on the current task.
    pub async fn run(&self, bitmap: RgbImage) -> PipelineOutcome {
        let (state, _) = watch::channel(PipelineState::Idle);
        self.run_reporting(bitmap, &state).await
    }

    /// Spawns an independent run. Concurrent runs are neither coordinated nor deduplicated.
    pub fn start(&self, bitmap: RgbImage) -> PipelineRun {
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            pipeline.run_reporting(bitmap, &state_tx).await
        });
        PipelineRun {
            state: state_rx,
            handle,
        }
    }

    async fn run_reporting(
        &self,
        bitmap: RgbImage,
        state: &watch::Sender<PipelineState>,
    ) -> PipelineOutcome {
        let prepared = tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(PipelineError::Cancelled),
            prepared = self.prepare(bitmap, state) => prepared,
        };
        let result = match prepared {
            Ok(_) if self.scope.is_cancelled() => Err(PipelineError::Cancelled),
            Ok(prepared) => self.persist(prepared, state).await,
            Err(err) => Err(err),
        };

        let outcome = PipelineOutcome::from_result(result);
        match &outcome {
            PipelineOutcome::Succeeded(success) => {
                tracing::info!(
                    id = success.record.id,
                    uri = %success.record.image_uri,
                    "photo annotated"
                );
            }
            PipelineOutcome::Failed { error, .. } => {
                tracing::warn!(error = %error, "photo annotation failed");
            }
        }
        state.send_replace(outcome.state());
        outcome
    }

    async fn prepare(
        &self,
        bitmap: RgbImage,
        state: &watch::Sender<PipelineState>,
    ) -> Result<Prepared, PipelineError> {
        let deps = &self.deps;

        advance(state, PipelineState::LocatingResolving);
        let location = deps.geo.locate().await.ok_or(PipelineError::NoLocation)?;
        tracing::debug!(lat = location.latitude, lon = location.longitude, "location obtained");

        let place = deps.geo.resolve_place(location).await?;
        if place.is_empty() {
            return Err(PipelineError::EmptyPlace);
        }

        advance(state, PipelineState::FetchingWeather);
        let reading = deps.weather.fetch_current(&place).await?;

        advance(state, PipelineState::Rendering);
        let caption = caption::compose(&place, &reading, (self.clock)());
        let annotator = deps.annotator.clone();
        let lines = caption.clone();
        let task = tokio::task::spawn_blocking(move || annotator.render(bitmap, &lines));
        let rendered = match task.await {
            Ok(rendered) => rendered,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => return Err(PipelineError::Cancelled),
        };

        Ok(Prepared {
            place,
            caption,
            rendered,
        })
    }

    /// Writes the image and its record. Not raced against the scope.
    async fn persist(
        &self,
        prepared: Prepared,
        state: &watch::Sender<PipelineState>,
    ) -> Result<AnnotationSuccess, PipelineError> {
        let deps = &self.deps;
        let Prepared {
            place,
            caption,
            rendered,
        } = prepared;

        advance(state, PipelineState::Persisting);
        let saved = deps.sink.save(&rendered.image).await?;
        let record = NewRecord {
            image_uri: saved.uri.clone(),
            place_name: place.into_string(),
        };
        let record = match deps.store.append(record).await {
            Ok(record) => record,
            Err(err) => {
                deps.sink.discard(&saved).await;
                return Err(err.into());
            }
        };

        Ok(AnnotationSuccess {
            rendered,
            caption,
            record,
        })
    }
}

fn advance(state: &watch::Sender<PipelineState>, next: PipelineState) {
    tracing::debug!(stage = %next, "annotation stage");
    state.send_replace(next);
}
