use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{ Path, PathBuf };
use std::sync::Mutex;
use thiserror::Error;

use super::UsageSnapshot;

pub const DEFAULT_STORAGE_KEY: &str = "insight_analytics_v1";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot storage IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {found} (expected {expected})")]
    Version {
        found: u32,
        expected: u32,
    },
    #[error("snapshot storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u32,
    snapshot: UsageSnapshot,
}

pub fn encode(snapshot: &UsageSnapshot) -> Result<String, StoreError> {
    let record = PersistedSnapshot { version: SNAPSHOT_VERSION, snapshot: snapshot.clone() };
    Ok(serde_json::to_string_pretty(&record)?)
}

pub fn decode(text: &str) -> Result<UsageSnapshot, StoreError> {
    let record: PersistedSnapshot = serde_json::from_str(text)?;
    if record.version != SNAPSHOT_VERSION {
        return Err(StoreError::Version { found: record.version, expected: SNAPSHOT_VERSION });
    }
    Ok(record.snapshot)
}

/// Holds the serialized snapshot under one namespaced key.
///
/// Calls are synchronous so a mutation's read-modify-persist finishes before the
/// caller yields.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored under the key yet.
    fn load(&self) -> Result<Option<String>, StoreError>;

    fn save(&self, serialized: &str) -> Result<(), StoreError>;
}

/// One JSON file per key inside a data directory.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self { path: dir.as_ref().join(format!("{}.json", key)) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(content))
    }

    /// Writes a sibling temp file and renames it over the target.
    fn save(&self, serialized: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(serialized.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Process-local store keyed like browser local storage. Useful for tests and
/// ephemeral deployments.
#[derive(Default)]
pub struct MemorySnapshotStore {
    key: String,
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    pub fn new(key: &str) -> Self {
        Self { key: key.to_string(), entries: Mutex::new(HashMap::new()) }
    }

    pub fn raw(&self) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&self.key).cloned())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        let entries = self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(&self.key).cloned())
    }

    fn save(&self, serialized: &str) -> Result<(), StoreError> {
        let mut entries = self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        entries.insert(self.key.clone(), serialized.to_string());
        Ok(())
    }
}
