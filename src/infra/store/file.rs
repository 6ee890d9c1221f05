//! File-backed slot store.
//!
//! The whole table is written as one JSON document after every mutation:
//! serialize to `<path>.tmp`, then rename over `<path>`. Opening an existing
//! file reloads the table, so slots survive a restart.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use super::memory::{Persistence, SlotTableStore};
use crate::core::{AppResult, Notifier, SlotError, SlotTable};
use crate::util::clock::Clock;

/// JSON snapshot writer.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    /// Writer for `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table back, or an empty one if the file does not exist.
    pub fn load(&self) -> AppResult<SlotTable> {
        if !self.path.exists() {
            return Ok(SlotTable::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading slot file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(SlotTable::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing slot file {}", self.path.display()))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Persistence for JsonFile {
    fn save(&self, table: &SlotTable) -> Result<(), SlotError> {
        let body = serde_json::to_vec(table).map_err(|e| SlotError::Storage(e.to_string()))?;
        let tmp = self.tmp_path();
        fs::write(&tmp, body)
            .map_err(|e| SlotError::Storage(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| SlotError::Storage(format!("{}: {e}", self.path.display())))
    }
}

/// Store persisted to a JSON file.
pub type FileSlotStore = SlotTableStore<JsonFile>;

impl FileSlotStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>, notifier: Notifier, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let file = JsonFile::new(path);
        if let Some(dir) = file.path().parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating slot directory {}", dir.display()))?;
        }
        let table = file.load()?;
        tracing::info!("opened slot file {} ({} slots)", file.path().display(), table.len());
        Ok(Self::with_table(table, notifier, clock, file))
    }
}
