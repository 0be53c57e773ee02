use async_trait::async_trait;
use image::{ImageOutputFormat, RgbImage};
use std::{
    fmt::Debug,
    io::Cursor,
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
};
use url::Url;

use crate::error::StoreError;

const JPEG_QUALITY: u8 = 100;

/// A written image and the opaque handle to share it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub path: PathBuf,
    pub uri: String,
}

/// Durable destination for annotated image bytes.
#[async_trait]
pub trait ImageSink: Send + Sync + Debug {
    async fn save(&self, image: &RgbImage) -> Result<SavedImage, StoreError>;

    /// Best-effort removal of an image whose history record could not be written.
    async fn discard(&self, saved: &SavedImage);
}

/// Writes `fname_<millis>.jpg` files into one directory.
#[derive(Debug)]
pub struct FileImageSink {
    dir: PathBuf,
    last_stamp: AtomicI64,
}

impl FileImageSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_stamp: AtomicI64::new(0),
        }
    }

    /// Wall-clock millis, bumped past the previous stamp so names never repeat.
    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_stamp.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn file_uri(path: &Path) -> Result<String, StoreError> {
    let absolute = std::path::absolute(path).map_err(|e| io_error(path, e))?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| {
            let reason = "path is not representable as a URI";
            io_error(path, std::io::Error::new(std::io::ErrorKind::InvalidInput, reason))
        })
}

#[async_trait]
impl ImageSink for FileImageSink {
    async fn save(&self, image: &RgbImage) -> Result<SavedImage, StoreError> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let path = self.dir.join(format!("fname_{}.jpg", self.next_stamp()));
        if let Err(e) = tokio::fs::write(&path, bytes.into_inner()).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(io_error(&path, e));
        }

        let uri = file_uri(&path)?;
        tracing::debug!(path = %path.display(), "saved annotated image");
        Ok(SavedImage { path, uri })
    }

    async fn discard(&self, saved: &SavedImage) {
        if let Err(e) = tokio::fs::remove_file(&saved.path).await {
            tracing::warn!(
                path = %saved.path.display(),
                error = %e,
                "failed to remove orphaned image"
            );
        }
    }
}
