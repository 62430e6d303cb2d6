use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bracket::{BracketConfig, BracketState};
use crate::error::PersistError;
use crate::types::{DirectViewMode, RankedSlot, SourceMode, TierConfig, TierState, SNAPSHOT_VERSION};

fn default_version() -> u32 {
    1
}

/// Everything the engine needs to resume where it left off.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub ranking: Vec<RankedSlot>,
    pub max_ranking_size: usize,
    #[serde(default)]
    pub active_mode: SourceMode,
    #[serde(default)]
    pub direct_view_mode: DirectViewMode,
    #[serde(default)]
    pub bracket_state: Option<BracketState>,
    #[serde(default)]
    pub bracket_config: Option<BracketConfig>,
    pub tier_state: TierState,
    pub tier_config: TierConfig,
    pub saved_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn check_version(&self) -> Result<(), PersistError> {
        if self.version > SNAPSHOT_VERSION {
            return Err(PersistError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(())
    }
}

pub trait SnapshotStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Snapshot>, PersistError>;
    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError>;
}

/// One pretty-printed JSON document on disk.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let display = self.path.display().to_string();
        let data = fs::read_to_string(&self.path).map_err(|source| PersistError::Read {
            path: display.clone(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_str(&data).map_err(|source| PersistError::Parse { path: display, source })?;
        snapshot.check_version()?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        let display = self.path.display().to_string();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| PersistError::Write {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        let payload = serde_json::to_string_pretty(snapshot)?;
        // readers never observe a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload).map_err(|source| PersistError::Write {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| PersistError::Write { path: display, source })?;
        debug!("snapshot saved to {}", self.path.display());
        Ok(())
    }
}

enum WriterMessage {
    Save(Snapshot),
    Shutdown,
}

/// Fire-and-forget snapshot writer on its own thread. Consecutive pending
/// snapshots collapse to the newest; failures are logged, never returned.
pub struct SnapshotWriter {
    tx: Sender<WriterMessage>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotWriter {
    pub fn spawn<S>(store: S) -> Self
    where
        S: SnapshotStore + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<WriterMessage>();
        let handle = std::thread::spawn(move || {
            while let Ok(message) = rx.recv() {
                let mut latest = match message {
                    WriterMessage::Save(snapshot) => snapshot,
                    WriterMessage::Shutdown => break,
                };
                let mut stop = false;
                for queued in rx.try_iter() {
                    match queued {
                        WriterMessage::Save(snapshot) => latest = snapshot,
                        WriterMessage::Shutdown => {
                            stop = true;
                            break;
                        }
                    }
                }
                if let Err(e) = store.save(&latest) {
                    error!("snapshot write failed: {e}");
                }
                if stop {
                    break;
                }
            }
            debug!("snapshot writer stopped");
        });
        info!("snapshot writer started");
        SnapshotWriter { tx, handle: Some(handle) }
    }

    /// Queue a snapshot. Never blocks the caller.
    pub fn persist(&self, snapshot: Snapshot) {
        if self.tx.send(WriterMessage::Save(snapshot)).is_err() {
            warn!("snapshot writer is gone; snapshot dropped");
        }
    }

    /// Flush everything queued so far and stop the thread.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else { return };
        let _ = self.tx.send(WriterMessage::Shutdown);
        if handle.join().is_err() {
            error!("snapshot writer panicked");
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::empty_tier_state;
    use crate::types::{TransferableItem, DEFAULT_RANKING_SIZE};
    use std::sync::{Arc, Mutex};

    fn sample() -> Snapshot {
        let mut ranking: Vec<RankedSlot> = (0..DEFAULT_RANKING_SIZE).map(RankedSlot::empty).collect();
        ranking[0] = RankedSlot::occupied(0, TransferableItem::new("a", "A"), SourceMode::Direct, Utc::now());
        let tier_config = TierConfig::default();
        Snapshot {
            version: SNAPSHOT_VERSION,
            ranking,
            max_ranking_size: DEFAULT_RANKING_SIZE,
            active_mode: SourceMode::Direct,
            direct_view_mode: DirectViewMode::Grid,
            bracket_state: None,
            bracket_config: None,
            tier_state: empty_tier_state(&tier_config),
            tier_config,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn file_store_round_trips_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("board.json"));
        assert!(store.load().unwrap().is_none());

        let snapshot = sample();
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn newer_versions_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("board.json"));
        let mut snapshot = sample();
        snapshot.version = SNAPSHOT_VERSION + 1;
        store.save(&snapshot).unwrap();
        assert!(matches!(store.load(), Err(PersistError::UnsupportedVersion { .. })));
    }

    #[test]
    fn missing_version_reads_as_v1() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("version");
        let snapshot: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonFileStore::new(&path).load(), Err(PersistError::Parse { .. })));
    }

    #[derive(Clone, Default)]
    struct RecordingStore {
        saved: Arc<Mutex<Vec<Snapshot>>>,
    }

    impl SnapshotStore for RecordingStore {
        fn load(&self) -> Result<Option<Snapshot>, PersistError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }

        fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
            self.saved.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    #[test]
    fn writer_flushes_latest_on_shutdown() {
        let store = RecordingStore::default();
        let mut writer = SnapshotWriter::spawn(store.clone());
        let mut last = sample();
        for size in 1..=5 {
            last = sample();
            last.max_ranking_size = size;
            writer.persist(last.clone());
        }
        writer.shutdown();
        let saved = store.saved.lock().unwrap();
        assert!(!saved.is_empty());
        assert_eq!(saved.last(), Some(&last));
    }
}
