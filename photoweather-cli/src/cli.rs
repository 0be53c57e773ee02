use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use inquire::{CustomType, Password, PasswordDisplayMode, Text};
use photoweather_core::{
    AnnotatedPhoto, AnnotationPipeline, Config, DeviceGeoResolver, FileImageSink, ImageAnnotator,
    Location, OpenWeatherClient, PipelineDeps, PipelineOutcome, RecordStore, RusttypePainter,
    SqliteRecordStore,
    geo::{ConfiguredLocation, NominatimGeocoder, OneShotLocator},
};
use tokio_util::sync::CancellationToken;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "photoweather", version, about = "Stamp photos with place, weather and time")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set the API key, location and rendering options.
    Configure,

    /// Annotate a photo and save it to the history.
    Annotate {
        /// Path to a JPEG or PNG photo.
        input: PathBuf,

        /// Latitude of the current fix; overrides the configured one.
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude of the current fix; overrides the configured one.
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// List annotated photos, newest first.
    History {
        /// Keep printing the history as new photos are saved.
        #[arg(long)]
        follow: bool,
    },

    /// Print where a photo from the history is stored.
    Open {
        /// Record id as shown by `history`.
        id: i64,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Annotate { input, lat, lon } => {
                let cfg = Config::load()?;
                let fix = match (lat, lon) {
                    (Some(lat), Some(lon)) => Some(Location::new(lat, lon)),
                    _ => cfg.last_known_location(),
                };
                annotate(&cfg, input, fix).await
            }
            Command::History { follow } => history(&Config::load()?, follow).await,
            Command::Open { id } => open(&Config::load()?, id).await,
        }
    }
}

fn configure() -> anyhow::Result<()> {
    let mut cfg = Config::load()?;

    let api_key = Password::new("OpenWeather API key:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?;
    if !api_key.trim().is_empty() {
        cfg.weather.api_key = Some(api_key.trim().to_string());
    }

    cfg.location.latitude = CustomType::<f64>::new("Latitude of your location (Esc to skip):")
        .with_error_message("Please enter a number, e.g. 30.0444")
        .prompt_skippable()?
        .or(cfg.location.latitude);
    cfg.location.longitude = CustomType::<f64>::new("Longitude of your location (Esc to skip):")
        .with_error_message("Please enter a number, e.g. 31.2357")
        .prompt_skippable()?
        .or(cfg.location.longitude);

    cfg.render.density = CustomType::<f32>::new("Display density:")
        .with_default(cfg.render.density)
        .prompt()?;

    let font = Text::new("Caption font (TTF path, Esc to auto-detect):").prompt_skippable()?;
    if let Some(font) = font.filter(|f| !f.trim().is_empty()) {
        cfg.render.font_path = Some(PathBuf::from(font.trim()));
    }

    cfg.save()?;
    println!("Configuration saved to {}", Config::config_file_path()?.display());
    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteRecordStore>> {
    let path = cfg.history_db_path()?;
    let store = SqliteRecordStore::open(path.clone())
        .await
        .with_context(|| format!("Failed to open history database: {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn build_pipeline(
    cfg: &Config,
    fix: Option<Location>,
    scope: CancellationToken,
) -> anyhow::Result<AnnotationPipeline> {
    let api_key = cfg.api_key()?.to_string();
    let painter = RusttypePainter::from_file(&cfg.font_path()?)?;

    let locator = OneShotLocator::new(ConfiguredLocation::new(fix), cfg.location_timeout());
    let geocoder = NominatimGeocoder::new(&cfg.geocoder.base_url, &cfg.geocoder.language)
        .context("Failed to create geocoding client")?;
    let weather = OpenWeatherClient::new(api_key, &cfg.weather.base_url)
        .context("Failed to create weather client")?;

    let deps = PipelineDeps {
        geo: Arc::new(DeviceGeoResolver::new(locator, geocoder)),
        weather: Arc::new(weather),
        annotator: ImageAnnotator::new(Arc::new(painter), cfg.render.density),
        sink: Arc::new(FileImageSink::new(cfg.photos_dir()?)),
        store: open_store(cfg).await?,
    };

    Ok(AnnotationPipeline::new(deps).with_scope(scope))
}

/// Cancels `scope` on Ctrl-C.
fn cancel_on_ctrl_c(scope: &CancellationToken) {
    let scope = scope.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            scope.cancel();
        }
    });
}

async fn annotate(cfg: &Config, input: PathBuf, fix: Option<Location>) -> anyhow::Result<()> {
    let bitmap = image::open(&input)
        .with_context(|| format!("Failed to decode image: {}", input.display()))?
        .to_rgb8();

    let scope = CancellationToken::new();
    let pipeline = build_pipeline(cfg, fix, scope.clone()).await?;
    cancel_on_ctrl_c(&scope);

    let run = pipeline.start(bitmap);
    let mut state = run.state.clone();
    let progress = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let stage = *state.borrow_and_update();
            if stage.is_terminal() {
                break;
            }
            eprintln!("... {stage}");
        }
    });

    let outcome = run.finish().await;
    let _ = progress.await;

    match outcome {
        PipelineOutcome::Succeeded(success) => {
            println!("{}", success.caption);
            println!("Saved #{}: {}", success.record.id, success.record.image_uri);
            Ok(())
        }
        PipelineOutcome::Failed { error, message } => {
            tracing::debug!(error = ?error, "annotation failed");
            Err(anyhow!(message))
        }
    }
}

fn print_record(record: &AnnotatedPhoto) {
    println!("#{:<5} {:<20} {}", record.id, record.place_name, record.image_uri);
}

async fn history(cfg: &Config, follow: bool) -> anyhow::Result<()> {
    let store = open_store(cfg).await?;

    let records = store.list_all().await?;
    if records.is_empty() {
        println!("No annotated photos yet.");
    }
    for record in &records {
        print_record(record);
    }

    if !follow {
        return Ok(());
    }

    let scope = CancellationToken::new();
    cancel_on_ctrl_c(&scope);
    let mut feed = store.observe();
    let mut newest = records.first().map(|r| r.id).unwrap_or(0);

    loop {
        tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            changed = feed.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = feed.borrow_and_update().clone();
                // Newest first, so print the unseen prefix oldest to newest.
                let unseen: Vec<_> = snapshot.iter().take_while(|r| r.id > newest).collect();
                for record in unseen.into_iter().rev() {
                    print_record(record);
                }
                if let Some(first) = snapshot.first() {
                    newest = newest.max(first.id);
                }
            }
        }
    }
}

async fn open(cfg: &Config, id: i64) -> anyhow::Result<()> {
    let store = open_store(cfg).await?;
    match store.find(id).await? {
        Some(record) => {
            println!("{}", record.image_uri);
            Ok(())
        }
        None => bail!(
            "No photo #{id} in history.\n\
             Hint: run `photoweather history` to list saved photos."
        ),
    }
}
