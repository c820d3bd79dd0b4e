use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use super::index::{RemoteIndex, photo_name};

/// Per-directory ledger of files the service permanently rejected.
pub const LEDGER_FILE: &str = ".failed_files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: String,
    pub timestamp: i64,
}

/// Persists the set of unsalvageable files for one directory so later runs
/// skip them without touching the network. Ledger problems never abort a
/// run; reading degrades to empty, writing to a skipped save.
#[derive(Debug)]
pub struct FailureLedger {
    path: PathBuf,
    records: Vec<FailureRecord>,
}

impl FailureLedger {
    /// Read the ledger (absence is not an error) and merge every record into
    /// the index as a sentinel entry, keyed by the recorded path's stem.
    pub fn load(directory: &Path, index: &mut RemoteIndex) -> Self {
        let path = directory.join(LEDGER_FILE);
        let records = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<Vec<FailureRecord>>(&data) {
                Ok(records) => records,
                Err(err) => {
                    warn!("malformed failure ledger {}: {err}", path.display());
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!("failed to read failure ledger {}: {err}", path.display());
                Vec::new()
            }
        };
        for record in &records {
            index.merge_failure(&photo_name(Path::new(&record.path)), record.timestamp);
        }
        Self { path, records }
    }

    pub fn append(&mut self, path: impl Into<String>, timestamp: i64) {
        self.records.push(FailureRecord {
            path: path.into(),
            timestamp,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overwrite the on-disk ledger with the full in-memory list. An empty
    /// list skips the write, so a previously persisted non-empty ledger is
    /// never erased.
    pub fn save(&self) {
        if self.records.is_empty() {
            return;
        }
        match serde_json::to_vec_pretty(&self.records) {
            Ok(data) => {
                if let Err(err) = std::fs::write(&self.path, data) {
                    warn!("failed to write failure ledger {}: {err}", self.path.display());
                }
            }
            Err(err) => warn!("failed to encode failure ledger: {err}"),
        }
    }
}
