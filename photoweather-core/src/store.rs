use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::watch;

use crate::{
    error::StoreError,
    model::{AnnotatedPhoto, NewRecord},
};

pub mod sqlite;

pub use sqlite::SqliteRecordStore;

/// Newest-first snapshot of the whole history.
pub type HistoryFeed = watch::Receiver<Vec<AnnotatedPhoto>>;

/// Append-only history of annotated photos.
#[async_trait]
pub trait RecordStore: Send + Sync + Debug {
    /// Inserts the record and returns it with its assigned id.
    async fn append(&self, record: NewRecord) -> Result<AnnotatedPhoto, StoreError>;

    /// All records, strictly descending by id.
    async fn list_all(&self) -> Result<Vec<AnnotatedPhoto>, StoreError>;

    async fn find(&self, id: i64) -> Result<Option<AnnotatedPhoto>, StoreError>;

    /// Live view of [`RecordStore::list_all`], republished after every append,
    /// including appends committed by other handles on the same history.
    fn observe(&self) -> HistoryFeed;
}
