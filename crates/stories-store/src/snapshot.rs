//! # Snapshot
//!
//! An in-memory SQLite copy of the story table. It is written exactly once,
//! while being built, and only read afterwards.
//!
//! The table lives in a named shared-cache memory database, opened by a small
//! set of reader connections. A request takes whichever reader is free, so
//! concurrent requests on one snapshot do not queue behind a single lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection};
use serde::Serialize;
use stories_core::{geo, RawStory, StoryRecord};
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::schema::{CREATE_TABLE, INSERT_STORY, TABLE_NAME};

/// Upper bound on reader connections per snapshot.
const MAX_READERS: usize = 8;

/// Distinguishes the memory databases of snapshots alive at the same time.
static SNAPSHOT_SEQ: AtomicU64 = AtomicU64::new(0);

/// One immutable, fully loaded story table.
pub struct Snapshot {
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    row_count: u64,
    source: Option<PathBuf>,
    loaded_at: DateTime<Utc>,
}

/// Serializable summary of a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub row_count: u64,
    pub source: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// A snapshot with an empty table.
    pub fn empty() -> Result<Self, StoreError> {
        Self::from_records(Vec::new())
    }

    /// Build a snapshot from already converted records.
    pub fn from_records(
        records: impl IntoIterator<Item = StoryRecord>,
    ) -> Result<Self, StoreError> {
        let uri = format!(
            "file:stories-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            SNAPSHOT_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let mut conn = open_reader(&uri)?;
        conn.execute_batch(CREATE_TABLE)?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(INSERT_STORY)?;
            for r in records {
                stmt.execute(params![
                    r.id,
                    r.title,
                    r.author,
                    r.created,
                    r.updated,
                    r.center_lon,
                    r.center_lat,
                    r.format.as_str(),
                    r.public,
                    r.height,
                    r.width,
                    r.description,
                    r.rate,
                    r.zoom,
                    r.frame_count,
                ])?;
            }
        }
        tx.commit()?;

        let row_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", TABLE_NAME),
            [],
            |row| row.get(0),
        )?;

        // The first connection keeps the memory database alive for as long
        // as the snapshot exists.
        let mut readers = vec![Mutex::new(conn)];
        for _ in 1..reader_count() {
            readers.push(Mutex::new(open_reader(&uri)?));
        }
        debug!(
            "Built snapshot with {} stories, {} readers",
            row_count,
            readers.len()
        );

        Ok(Self {
            readers,
            next_reader: AtomicUsize::new(0),
            row_count: row_count as u64,
            source: None,
            loaded_at: Utc::now(),
        })
    }

    /// Build a snapshot from the ingestion shape.
    pub fn from_raw(stories: Vec<RawStory>) -> Result<Self, StoreError> {
        Self::from_records(stories.into_iter().map(RawStory::into_record))
    }

    /// Load a JSON array of stories from disk.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_json(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stories: Vec<RawStory> = serde_json::from_slice(&bytes)?;
        let mut snapshot = Self::from_raw(stories)?;
        snapshot.source = Some(path.to_path_buf());
        info!("Loaded {} stories", snapshot.row_count);
        Ok(snapshot)
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            row_count: self.row_count,
            source: self.source.as_ref().map(|p| p.display().to_string()),
            loaded_at: self.loaded_at,
        }
    }

    /// Run `f` with exclusive use of one reader connection. A free reader is
    /// preferred; when all are busy, wait on the next one in turn.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if let Some(conn) = self.readers.iter().find_map(|r| r.try_lock()) {
            return f(&conn);
        }
        let i = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[i].lock();
        f(&conn)
    }
}

fn reader_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_READERS)
}

fn open_reader(uri: &str) -> Result<Connection, StoreError> {
    let conn = Connection::open(uri)?;
    register_functions(&conn)?;
    Ok(conn)
}

/// `geo_distance_km(lon1, lat1, lon2, lat2)`; NULL if any argument is NULL.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "geo_distance_km",
        4,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let lon1 = ctx.get::<Option<f64>>(0)?;
            let lat1 = ctx.get::<Option<f64>>(1)?;
            let lon2 = ctx.get::<Option<f64>>(2)?;
            let lat2 = ctx.get::<Option<f64>>(3)?;
            Ok(match (lon1, lat1, lon2, lat2) {
                (Some(lon1), Some(lat1), Some(lon2), Some(lat2)) => {
                    Some(geo::distance_km(lon1, lat1, lon2, lat2))
                }
                _ => None,
            })
        },
    )
}
