//! In-memory result state with JSON file persistence
//!
//! `latest` and `history` share one lock so a commit is observed as a unit:
//! the new history tail and the new latest snapshot appear together.

use crate::error::StorageError;
use algae_core::config::StorageConfig;
use algae_core::{HistoryEntry, HistoryRecord, LatestSnapshot, PredictionResult};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Current content of the latest-result document
#[derive(Debug, Clone, PartialEq)]
pub enum LatestDocument {
    Snapshot(Arc<LatestSnapshot>),
    /// Object loaded from disk that is not a complete snapshot, served and
    /// written back as read until the next commit replaces it
    Carried(Arc<Value>),
}

impl Serialize for LatestDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LatestDocument::Snapshot(snapshot) => snapshot.serialize(serializer),
            LatestDocument::Carried(value) => value.serialize(serializer),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    latest: Option<LatestDocument>,
    history: Vec<HistoryRecord>,
}

#[derive(Debug, Clone)]
struct StorePaths {
    latest: PathBuf,
    history: PathBuf,
}

/// Outcome of a flush. Each document is written independently.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub latest: Option<StorageError>,
    pub history: Option<StorageError>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.latest.is_none() && self.history.is_none()
    }
}

/// Owner of the latest snapshot and the append-only history.
pub struct ResultStore {
    state: RwLock<StoreState>,
    paths: Option<StorePaths>,
    dirty: AtomicBool,
    /// Held for a whole flush; flushes share temp file paths
    flush_lock: Mutex<()>,
}

impl ResultStore {
    /// Create the data directory if needed and load both documents from it.
    pub fn load(config: &StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir).map_err(|e| {
            StorageError::PersistenceWrite(format!("Failed to create data directory {:?}: {}", config.data_dir, e))
        })?;
        Ok(Self::open(config.latest_path(), config.history_path()))
    }

    /// Load from explicit file paths.
    ///
    /// A history file that is not a JSON array, or a latest file that is not a
    /// JSON object, is treated as absent. Individual records that do not match
    /// the current schema are kept as read.
    pub fn open(latest_path: impl Into<PathBuf>, history_path: impl Into<PathBuf>) -> Self {
        let paths = StorePaths {
            latest: latest_path.into(),
            history: history_path.into(),
        };

        let latest = load_latest(&paths.latest);
        let history = read_document::<Vec<HistoryRecord>>(&paths.history).unwrap_or_default();
        let carried = history.iter().filter(|record| record.as_entry().is_none()).count();
        if carried > 0 {
            warn!("{} records in {:?} do not match the history schema, keeping them as read", carried, paths.history);
        }
        info!(
            "Loaded result store: latest {}, {} history entries",
            if latest.is_some() { "present" } else { "absent" },
            history.len()
        );

        Self {
            state: RwLock::new(StoreState { latest, history }),
            paths: Some(paths),
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        }
    }

    /// Store without backing files; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            paths: None,
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        }
    }

    /// Record a finished analysis: append a history entry and replace the
    /// latest snapshot, atomically with respect to other commits and reads.
    pub fn commit(&self, result: &PredictionResult) -> HistoryEntry {
        self.commit_with(result, Local::now)
    }

    /// `clock` is read under the write lock, so dates follow id order.
    fn commit_with<F>(&self, result: &PredictionResult, clock: F) -> HistoryEntry
    where
        F: FnOnce() -> DateTime<Local>,
    {
        let mut state = self.state.write();
        let now = clock();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let id = state
            .history
            .last()
            .and_then(HistoryRecord::id)
            .map_or(1, |last| last.saturating_add(1));
        let entry = HistoryEntry {
            id,
            timestamp: timestamp.clone(),
            file_name: format!("analysis_{}.png", now.timestamp()),
            total_cells: result.total_cells,
            density_cells_ml: result.density_cells_ml,
        };
        state.history.push(HistoryRecord::Entry(entry.clone()));
        state.latest = Some(LatestDocument::Snapshot(Arc::new(LatestSnapshot::from_result(result, timestamp))));
        self.dirty.store(true, Ordering::Release);
        drop(state);

        debug!("Committed analysis {} ({} cells)", entry.id, entry.total_cells);
        entry
    }

    /// Latest snapshot written by a commit. A carried-over document that is
    /// not a complete snapshot reads as `None` here.
    pub fn read_latest(&self) -> Option<Arc<LatestSnapshot>> {
        match &self.state.read().latest {
            Some(LatestDocument::Snapshot(snapshot)) => Some(snapshot.clone()),
            _ => None,
        }
    }

    /// Latest document as served and persisted
    pub fn read_latest_document(&self) -> Option<LatestDocument> {
        self.state.read().latest.clone()
    }

    /// History in append order
    pub fn read_history(&self) -> Vec<HistoryRecord> {
        self.state.read().history.clone()
    }

    /// History with the most recent record first
    pub fn read_history_newest_first(&self) -> Vec<HistoryRecord> {
        self.state.read().history.iter().rev().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    /// True when commits happened since the last successful flush
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write both documents to disk. Failures are logged and returned in the
    /// report, never propagated.
    pub fn flush(&self) -> FlushReport {
        let Some(paths) = &self.paths else {
            return FlushReport::default();
        };

        let _flushing = self.flush_lock.lock();
        self.dirty.store(false, Ordering::Release);

        // Serialize from one consistent view, write outside the state lock
        let (latest_json, history_json) = {
            let state = self.state.read();
            let latest_json = match &state.latest {
                Some(latest) => to_pretty_json(latest),
                None => to_pretty_json(&serde_json::Map::new()),
            };
            (latest_json, to_pretty_json(&state.history))
        };

        let report = FlushReport {
            latest: latest_json.and_then(|bytes| write_atomic(&paths.latest, &bytes)).err(),
            history: history_json.and_then(|bytes| write_atomic(&paths.history, &bytes)).err(),
        };

        if let Some(err) = &report.latest {
            warn!("Failed to persist latest result to {:?}: {}", paths.latest, err);
        }
        if let Some(err) = &report.history {
            warn!("Failed to persist history to {:?}: {}", paths.history, err);
        }
        if report.is_ok() {
            debug!("Flushed result store to {:?}", paths.history.parent().unwrap_or(Path::new(".")));
        } else {
            self.dirty.store(true, Ordering::Release);
        }

        report
    }
}

fn load_latest(path: &Path) -> Option<LatestDocument> {
    let value = read_document::<Value>(path)?;
    match &value {
        Value::Object(fields) if fields.is_empty() => None,
        Value::Object(_) => match LatestSnapshot::deserialize(&value) {
            Ok(snapshot) => Some(LatestDocument::Snapshot(Arc::new(snapshot))),
            Err(e) => {
                warn!("{:?} is not a complete snapshot ({}), keeping it as read", path, e);
                Some(LatestDocument::Carried(Arc::new(value)))
            }
        },
        _ => {
            warn!("Ignoring {:?}: expected a JSON object", path);
            None
        }
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("{}", StorageError::PersistenceRead(format!("{:?}: {}", path, e)));
            return None;
        }
    };

    if contents.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed {:?}: {}", path, e);
            None
        }
    }
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

/// Temp file, fsync, rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| StorageError::PersistenceWrite(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    let temp_path = path.with_extension("json.tmp");
    let written = fs::File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::PersistenceWrite(format!("Failed to write {:?}: {}", temp_path, e)));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StorageError::PersistenceWrite(format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e))
    })
}
