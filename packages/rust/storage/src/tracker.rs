//! JSON-file processing tracker.
//!
//! Holds the ordered list of [`ReconciliationStatus`] records from past
//! population passes. Append-only apart from stale-entry pruning, which the
//! batch coordinator does by rebuilding the list.

use std::path::{Path, PathBuf};

use csrledger_shared::{LedgerError, ReconciliationStatus, Result};

/// Tracker persisted as a pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct TrackerFile {
    path: PathBuf,
}

impl TrackerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries. A missing file is an empty tracker.
    pub fn load(&self) -> Result<Vec<ReconciliationStatus>> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "tracker file not found, starting empty");
            return Ok(Vec::new());
        }

        let content =
            std::fs::read_to_string(&self.path).map_err(|e| LedgerError::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            LedgerError::parse(format!("invalid tracker file {}: {e}", self.path.display()))
        })
    }

    /// Replace the file with `entries`. Writes a sibling temp file and
    /// renames it so a crash never leaves a truncated tracker.
    pub fn save(&self, entries: &[ReconciliationStatus]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| LedgerError::parse(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| LedgerError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| LedgerError::io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "tracker saved");
        Ok(())
    }

    /// Append entries to the persisted list.
    pub fn append(&self, new_entries: &[ReconciliationStatus]) -> Result<()> {
        let mut entries = self.load()?;
        entries.extend_from_slice(new_entries);
        self.save(&entries)
    }
}
