//! End-to-end pipeline runs against in-test collaborators.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use image::RgbImage;
use photoweather_core::{
    AnnotatedPhoto, AnnotationPipeline, FileImageSink, GeoResolver, GeocodeError, ImageAnnotator,
    ImageSink, Location, NewRecord, OpenWeatherClient, PipelineDeps, PipelineError,
    PipelineOutcome, PipelineState, PlaceName, RecordStore, SavedImage, SqliteRecordStore,
    StoreError, TextPainter, WeatherClient, WeatherFetchError, WeatherReading,
    annotate::LineMetrics,
    store::HistoryFeed,
};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CAIRO: Location = Location {
    latitude: 30.0444,
    longitude: 31.2357,
};

fn fixed_clock() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(15, 45, 0))
        .unwrap_or_default()
}

#[derive(Debug)]
struct BlockPainter;

impl TextPainter for BlockPainter {
    fn measure_width(&self, text: &str, size: f32) -> f32 {
        text.chars().count() as f32 * size * 0.5
    }

    fn vertical_metrics(&self, size: f32) -> LineMetrics {
        LineMetrics {
            ascent: -0.75 * size,
            descent: 0.25 * size,
        }
    }

    fn draw(&self, _canvas: &mut RgbImage, _text: &str, _x: f32, _baseline_y: f32, _size: f32) {}
}

#[derive(Debug)]
enum PlaceAnswer {
    Named(&'static str),
    Unreachable,
}

#[derive(Debug)]
struct FakeGeo {
    fix: Option<Location>,
    place: PlaceAnswer,
    hang: bool,
    resolved: AtomicUsize,
}

impl FakeGeo {
    fn new(fix: Option<Location>, place: PlaceAnswer) -> Self {
        Self {
            fix,
            place,
            hang: false,
            resolved: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GeoResolver for FakeGeo {
    async fn locate(&self) -> Option<Location> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.fix
    }

    async fn resolve_place(&self, location: Location) -> Result<PlaceName, GeocodeError> {
        assert_eq!(Some(location), self.fix);
        self.resolved.fetch_add(1, Ordering::SeqCst);
        match self.place {
            PlaceAnswer::Named(name) => Ok(PlaceName::from_admin_area(name)),
            PlaceAnswer::Unreachable => Err(GeocodeError::Status {
                status: 503,
                body: String::new(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct FakeWeather {
    calls: AtomicUsize,
}

#[async_trait]
impl WeatherClient for FakeWeather {
    async fn fetch_current(&self, place: &PlaceName) -> Result<WeatherReading, WeatherFetchError> {
        assert_eq!(place.as_str(), "cairo");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(WeatherReading {
            condition: "clear sky".into(),
            temperature_c: 25.0,
        })
    }
}

#[derive(Debug)]
struct FailingSink;

#[async_trait]
impl ImageSink for FailingSink {
    async fn save(&self, _image: &RgbImage) -> Result<SavedImage, StoreError> {
        Err(StoreError::Io {
            path: "/read-only/fname_1.jpg".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    async fn discard(&self, _saved: &SavedImage) {}
}

#[derive(Debug)]
struct RejectingStore {
    feed: watch::Sender<Vec<AnnotatedPhoto>>,
}

#[async_trait]
impl RecordStore for RejectingStore {
    async fn append(&self, _record: NewRecord) -> Result<AnnotatedPhoto, StoreError> {
        Err(StoreError::WorkerGone)
    }

    async fn list_all(&self) -> Result<Vec<AnnotatedPhoto>, StoreError> {
        Ok(Vec::new())
    }

    async fn find(&self, _id: i64) -> Result<Option<AnnotatedPhoto>, StoreError> {
        Ok(None)
    }

    fn observe(&self) -> HistoryFeed {
        self.feed.subscribe()
    }
}

/// Holds each append until released, so a run can be cancelled mid-persist.
#[derive(Debug)]
struct GatedStore {
    inner: Arc<SqliteRecordStore>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn append(&self, record: NewRecord) -> Result<AnnotatedPhoto, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.append(record).await
    }

    async fn list_all(&self) -> Result<Vec<AnnotatedPhoto>, StoreError> {
        self.inner.list_all().await
    }

    async fn find(&self, id: i64) -> Result<Option<AnnotatedPhoto>, StoreError> {
        self.inner.find(id).await
    }

    fn observe(&self) -> HistoryFeed {
        self.inner.observe()
    }
}

struct Harness {
    geo: Arc<FakeGeo>,
    weather: Arc<FakeWeather>,
    store: Arc<SqliteRecordStore>,
    photos: tempfile::TempDir,
}

impl Harness {
    async fn new(geo: FakeGeo) -> Self {
        Self {
            geo: Arc::new(geo),
            weather: Arc::new(FakeWeather::default()),
            store: Arc::new(SqliteRecordStore::open_in_memory().await.expect("store")),
            photos: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            geo: self.geo.clone(),
            weather: self.weather.clone(),
            annotator: ImageAnnotator::new(Arc::new(BlockPainter), 1.0),
            sink: Arc::new(FileImageSink::new(self.photos.path())),
            store: self.store.clone(),
        }
    }

    fn pipeline(&self) -> AnnotationPipeline {
        AnnotationPipeline::new(self.deps()).with_clock(fixed_clock)
    }

    fn photo_count(&self) -> usize {
        std::fs::read_dir(self.photos.path())
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

fn expect_failure(outcome: PipelineOutcome) -> (PipelineError, String) {
    match outcome {
        PipelineOutcome::Failed { error, message } => (error, message),
        PipelineOutcome::Succeeded(s) => panic!("expected failure, got record {:?}", s.record),
    }
}

#[tokio::test]
async fn successful_run_captions_and_persists() {
    let geo = FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("Cairo Governorate"));
    let h = Harness::new(geo).await;

    let outcome = h.pipeline().run(RgbImage::new(1200, 900)).await;

    let PipelineOutcome::Succeeded(success) = outcome else {
        panic!("expected success");
    };
    let texts: Vec<_> = success
        .rendered
        .layout
        .lines
        .iter()
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(texts, ["Cairo", "Clear sky", "25.0°c - 03:45 PM"]);
    assert_eq!(success.record.place_name, "cairo");
    assert!(success.record.image_uri.starts_with("file://"));
    assert_eq!(success.rendered.image.dimensions(), (1200, 900));

    let history = h.store.list_all().await.expect("list");
    assert_eq!(history, vec![success.record]);
    assert_eq!(h.photo_count(), 1);
}

#[tokio::test]
async fn missing_location_fails_before_any_lookup() {
    let h = Harness::new(FakeGeo::new(None, PlaceAnswer::Named("cairo"))).await;

    let (error, message) = expect_failure(h.pipeline().run(RgbImage::new(10, 10)).await);

    assert!(matches!(error, PipelineError::NoLocation));
    assert_eq!(message, "Couldn't fetch location, enable GPS and try again.");
    assert_eq!(h.geo.resolved.load(Ordering::SeqCst), 0);
    assert_eq!(h.weather.calls.load(Ordering::SeqCst), 0);
    assert!(h.store.list_all().await.expect("list").is_empty());
}

#[tokio::test]
async fn empty_place_is_a_geocode_failure() {
    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("  Governorate "))).await;

    let (error, message) = expect_failure(h.pipeline().run(RgbImage::new(10, 10)).await);

    assert!(error.is_geocode());
    assert_eq!(message, "App needs Internet to work.");
    assert_eq!(h.weather.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_geocoder_is_a_geocode_failure() {
    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Unreachable)).await;

    let (error, _) = expect_failure(h.pipeline().run(RgbImage::new(10, 10)).await);

    assert!(matches!(error, PipelineError::Geocode(_)));
    assert_eq!(h.weather.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn weather_server_error_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("cairo"))).await;
    let mut deps = h.deps();
    let client = OpenWeatherClient::new("KEY".into(), &server.uri()).expect("client");
    deps.weather = Arc::new(client);

    let outcome = AnnotationPipeline::new(deps).run(RgbImage::new(10, 10)).await;
    let (error, message) = expect_failure(outcome);

    assert!(matches!(
        error,
        PipelineError::WeatherFetch(WeatherFetchError::Status { status: 500, .. })
    ));
    assert_eq!(message, "Problem fetching the weather data, check your connection.");
    assert!(h.store.list_all().await.expect("list").is_empty());
    assert_eq!(h.photo_count(), 0);
}

#[tokio::test]
async fn failed_image_write_leaves_history_unchanged() {
    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("cairo"))).await;
    let before = h.store.list_all().await.expect("list").len();

    let mut deps = h.deps();
    deps.sink = Arc::new(FailingSink);
    let outcome = AnnotationPipeline::new(deps).run(RgbImage::new(10, 10)).await;
    let (error, message) = expect_failure(outcome);

    assert!(matches!(error, PipelineError::StoreWrite(StoreError::Io { .. })));
    assert_eq!(message, "Couldn't save the annotated photo, please try again.");
    assert_eq!(h.store.list_all().await.expect("list").len(), before);
}

#[tokio::test]
async fn failed_record_insert_discards_written_image() {
    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("cairo"))).await;

    let mut deps = h.deps();
    deps.store = Arc::new(RejectingStore {
        feed: watch::Sender::new(Vec::new()),
    });
    let outcome = AnnotationPipeline::new(deps).run(RgbImage::new(10, 10)).await;
    let (error, _) = expect_failure(outcome);

    assert!(matches!(error, PipelineError::StoreWrite(StoreError::WorkerGone)));
    assert_eq!(h.photo_count(), 0);
}

#[tokio::test]
async fn cancelling_the_scope_stops_a_stuck_run() {
    let mut geo = FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("cairo"));
    geo.hang = true;
    let h = Harness::new(geo).await;

    let scope = CancellationToken::new();
    let run = h
        .pipeline()
        .with_scope(scope.clone())
        .start(RgbImage::new(10, 10));
    scope.cancel();

    let (error, message) = expect_failure(run.finish().await);
    assert!(matches!(error, PipelineError::Cancelled));
    assert_eq!(message, "Photo annotation was cancelled.");
    assert!(h.store.list_all().await.expect("list").is_empty());
}

#[tokio::test]
async fn cancelling_while_persisting_reports_the_committed_record() {
    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("cairo"))).await;
    let gate = Arc::new(GatedStore {
        inner: h.store.clone(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let mut deps = h.deps();
    deps.store = gate.clone();

    let scope = CancellationToken::new();
    let run = AnnotationPipeline::new(deps)
        .with_clock(fixed_clock)
        .with_scope(scope.clone())
        .start(RgbImage::new(40, 40));

    gate.entered.notified().await;
    scope.cancel();
    gate.release.notify_one();

    let PipelineOutcome::Succeeded(success) = run.finish().await else {
        panic!("a run already persisting must complete");
    };
    assert_eq!(h.store.list_all().await.expect("list"), vec![success.record]);
    assert_eq!(h.photo_count(), 1);
}

#[tokio::test]
async fn spawned_run_reports_terminal_state() {
    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("cairo"))).await;

    let run = h.pipeline().start(RgbImage::new(100, 100));
    let state = run.state.clone();
    let outcome = run.finish().await;

    assert_eq!(outcome.state(), PipelineState::Succeeded);
    assert_eq!(*state.borrow(), PipelineState::Succeeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_each_persist_one_record() {
    let h = Harness::new(FakeGeo::new(Some(CAIRO), PlaceAnswer::Named("cairo"))).await;
    let pipeline = h.pipeline();

    let runs: Vec<_> = (0..6).map(|_| pipeline.start(RgbImage::new(50, 50))).collect();
    let mut succeeded = 0;
    for run in runs {
        if let PipelineOutcome::Succeeded(_) = run.finish().await {
            succeeded += 1;
        }
    }

    let history = h.store.list_all().await.expect("list");
    assert_eq!(history.len(), 6);
    assert_eq!(succeeded, 6);
    assert!(history.windows(2).all(|w| w[0].id > w[1].id));
    assert_eq!(h.photo_count(), 6);
}
