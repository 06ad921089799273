//! Panel Persistence
//!
//! Panels and the master unit survive restarts through a [`Persistence`]
//! backend: loaded once at startup, saved after every command that changes
//! a persisted field. Runtime flags (`playing`, `stale`) are never
//! persisted, so every panel loads paused.
//!
//! Save failures are logged by the caller and never abort a command.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{PanelId, Position, Size};

/// Current on-disk format version
pub const STATE_VERSION: u32 = 1;

/// Persisted fields of one panel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPanel {
    /// Panel ID
    pub id: PanelId,
    /// Display number
    pub number: u32,
    /// Display title
    pub title: String,
    /// Source code
    pub source_code: String,
    /// Workspace position
    #[serde(default)]
    pub position: Position,
    /// Workspace size
    #[serde(default)]
    pub size: Size,
    /// Stacking order
    #[serde(default)]
    pub z_index: u32,
}

/// Persisted fields of the master unit
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMaster {
    /// Collapsed presentation flag
    #[serde(default)]
    pub compact: bool,
    /// Source code
    #[serde(default)]
    pub source_code: String,
}

/// Everything that survives a restart
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version
    pub version: u32,
    /// Panels in insertion order
    pub panels: Vec<PersistedPanel>,
    /// Master unit
    #[serde(default)]
    pub master: PersistedMaster,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            panels: Vec::new(),
            master: PersistedMaster::default(),
        }
    }
}

/// Errors from a persistence backend
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure
    #[error("state file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// State could not be encoded or decoded
    #[error("invalid state data: {0}")]
    Format(#[from] serde_json::Error),

    /// State file was written by an incompatible version
    #[error("unsupported state version {found} (expected {expected})")]
    Version {
        /// Version found in the file
        found: u32,
        /// Version this build understands
        expected: u32,
    },
}

/// Storage backend for [`PersistedState`]
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Load the stored state; `None` when nothing was saved yet
    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError>;

    /// Replace the stored state
    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError>;
}

/// Default state file: `$XDG_DATA_HOME/panelsync/state.json`
#[must_use]
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("panelsync").join("state.json"))
}

// ============================================================================
// JSON file backend
// ============================================================================

/// JSON file with atomic replace (temp file + rename)
#[derive(Clone, Debug)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File this backend writes
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let state: PersistedState = serde_json::from_str(&contents)?;
        if state.version != STATE_VERSION {
            return Err(PersistenceError::Version {
                found: state.version,
                expected: STATE_VERSION,
            });
        }

        tracing::debug!(
            path = %self.path.display(),
            panels = state.panels.len(),
            "Loaded state"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), "Saved state");
        Ok(())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-memory backend for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: Mutex<Option<PersistedState>>,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `state`
    #[must_use]
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Last saved state
    #[must_use]
    pub fn snapshot(&self) -> Option<PersistedState> {
        self.state.lock().clone()
    }

    /// Number of saves performed
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        Ok(self.state.lock().clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        *self.state.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_state() -> PersistedState {
        PersistedState {
            version: STATE_VERSION,
            panels: vec![PersistedPanel {
                id: PanelId::from("panel_1_0"),
                number: 1,
                title: "Bass".to_string(),
                source_code: "note(\"c2\")".to_string(),
                position: Position::new(10.0, 20.0),
                size: Size::default(),
                z_index: 1,
            }],
            master: PersistedMaster {
                compact: true,
                source_code: "setcps(0.5)".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("nested").join("state.json"));

        store.save(&sample_state()).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, Some(sample_state()));
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_uses_camel_case_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        JsonFilePersistence::new(&path)
            .save(&sample_state())
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"sourceCode\""));
        assert!(raw.contains("\"zIndex\""));
        assert!(!raw.contains("playing"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFilePersistence::new(&path).load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Format(_)));
    }

    #[tokio::test]
    async fn test_future_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version":99,"panels":[]}"#).unwrap();

        let err = JsonFilePersistence::new(&path).load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Version { found: 99, .. }));
    }

    #[tokio::test]
    async fn test_memory_persistence_counts_saves() {
        let store = MemoryPersistence::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(&sample_state()).await.unwrap();
        store.save(&PersistedState::default()).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.snapshot(), Some(PersistedState::default()));
    }
}
