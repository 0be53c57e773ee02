//! SQLite-backed history. A single worker thread owns the connection, so
//! every statement is serialized. While idle the worker polls
//! `PRAGMA data_version` and republishes the live view when another
//! connection (usually another process) commits.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{oneshot, watch};

use crate::{
    error::StoreError,
    model::{AnnotatedPhoto, NewRecord},
};

use super::{HistoryFeed, RecordStore};

const CURRENT_SCHEMA_VERSION: i32 = 1;
const EXTERNAL_POLL_INTERVAL: Duration = Duration::from_millis(250);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS post_table (
    post_id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo   TEXT NOT NULL,
    city    TEXT NOT NULL
);
";

type LiveView = Arc<watch::Sender<Vec<AnnotatedPhoto>>>;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                tracing::error!("Failed to send shutdown to history thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                tracing::error!("Failed to join history thread: {join_err:?}");
            }
        }
    }
}

#[derive(Clone)]
pub struct SqliteRecordStore {
    inner: Arc<StoreInner>,
    feed: LiveView,
    path: Option<Arc<PathBuf>>,
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn query_all(conn: &Connection) -> Result<Vec<AnnotatedPhoto>, rusqlite::Error> {
    let mut stmt =
        conn.prepare_cached("SELECT post_id, photo, city FROM post_table ORDER BY post_id DESC")?;
    let rows = stmt.query_map([], photo_from_row)?;
    rows.collect()
}

fn photo_from_row(row: &rusqlite::Row<'_>) -> Result<AnnotatedPhoto, rusqlite::Error> {
    Ok(AnnotatedPhoto {
        id: row.get(0)?,
        image_uri: row.get(1)?,
        place_name: row.get(2)?,
    })
}

fn data_version(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.pragma_query_value(None, "data_version", |row| row.get(0))
}

/// Republishes the live view if a commit from another connection landed
/// since `seen`. Commits made on `conn` itself never change the version.
fn refresh_if_changed(conn: &Connection, feed: &LiveView, seen: &mut i64) {
    let version = match data_version(conn) {
        Ok(version) => version,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read history data version");
            return;
        }
    };
    if version == *seen {
        return;
    }

    match query_all(conn) {
        Ok(snapshot) => {
            *seen = version;
            tracing::debug!(records = snapshot.len(), "history changed outside this process");
            feed.send_replace(snapshot);
        }
        Err(err) => tracing::warn!(error = %err, "failed to refresh history view"),
    }
}

fn worker_loop(
    mut conn: Connection,
    commands: mpsc::Receiver<DbCommand>,
    feed: &LiveView,
    mut seen: i64,
) {
    let mut last_poll = Instant::now();

    loop {
        let wait = EXTERNAL_POLL_INTERVAL.saturating_sub(last_poll.elapsed());
        match commands.recv_timeout(wait) {
            Ok(DbCommand::Execute(task)) => task(&mut conn),
            Ok(DbCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if last_poll.elapsed() >= EXTERNAL_POLL_INTERVAL {
            refresh_if_changed(&conn, feed, &mut seen);
            last_poll = Instant::now();
        }
    }
}

impl SqliteRecordStore {
    /// Opens (creating if needed) the history database at `path`.
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let for_thread = path.clone();
        Self::spawn(move || Connection::open(&for_thread), Some(path)).await
    }

    /// A private, non-persistent database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::spawn(Connection::open_in_memory, None).await
    }

    async fn spawn<F>(connect: F, path: Option<PathBuf>) -> Result<Self, StoreError>
    where
        F: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let feed: LiveView = Arc::new(watch::Sender::new(Vec::new()));
        let worker_feed = Arc::clone(&feed);

        let worker = thread::Builder::new()
            .name("photoweather-history".into())
            .spawn(move || {
                let opened = connect().map_err(StoreError::from).and_then(|mut conn| {
                    conn.busy_timeout(BUSY_TIMEOUT)?;
                    run_migrations(&mut conn)?;
                    let seen = data_version(&conn)?;
                    let initial = query_all(&conn)?;
                    Ok((conn, seen, initial))
                });

                let (conn, seen) = match opened {
                    Ok((conn, seen, initial)) => {
                        let records = initial.len();
                        worker_feed.send_replace(initial);
                        if ready_tx.send(Ok(records)).is_err() {
                            return;
                        }
                        (conn, seen)
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                worker_loop(conn, command_rx, &worker_feed, seen);
                tracing::debug!("history thread shutting down");
            })
            .map_err(|source| StoreError::Io {
                path: path.clone().unwrap_or_default(),
                source,
            })?;

        let records = ready_rx.await.map_err(|_| StoreError::WorkerGone)??;

        match &path {
            Some(p) => tracing::info!(path = %p.display(), records, "history opened"),
            None => tracing::debug!("in-memory history opened"),
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            feed,
            path: path.map(Arc::new),
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                tracing::debug!("history caller dropped before receiving result");
            }
        }));

        self.inner.sender.send(command).map_err(|_| StoreError::WorkerGone)?;

        reply_rx.await.map_err(|_| StoreError::WorkerGone)?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn append(&self, record: NewRecord) -> Result<AnnotatedPhoto, StoreError> {
        let feed = Arc::clone(&self.feed);
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO post_table (photo, city) VALUES (?1, ?2)",
                params![record.image_uri, record.place_name],
            )?;
            let saved = AnnotatedPhoto {
                id: conn.last_insert_rowid(),
                image_uri: record.image_uri,
                place_name: record.place_name,
            };

            // Published from the worker so observers see snapshots in commit order.
            match query_all(conn) {
                Ok(snapshot) => {
                    feed.send_replace(snapshot);
                }
                Err(err) => tracing::warn!(error = %err, "failed to refresh history view"),
            }

            Ok(saved)
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<AnnotatedPhoto>, StoreError> {
        self.execute(|conn| Ok(query_all(conn)?)).await
    }

    async fn find(&self, id: i64) -> Result<Option<AnnotatedPhoto>, StoreError> {
        self.execute(move |conn| {
            let found = conn
                .query_row(
                    "SELECT post_id, photo, city FROM post_table WHERE post_id = ?1",
                    params![id],
                    photo_from_row,
                )
                .optional()?;
            Ok(found)
        })
        .await
    }

    fn observe(&self) -> HistoryFeed {
        self.feed.subscribe()
    }
}
