use std::{collections::BTreeMap, io::Write, path::Path};

use common::error::AppError;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::fragment::DocumentRecord;

/// Durable document-name → fragment-count mapping, persisted as a flat JSON
/// object independently of the fragment index itself.
#[derive(Debug, Default)]
pub struct DocumentLedger {
    counts: BTreeMap<String, usize>,
}

impl DocumentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `added` fragments for `name`, creating the record or adding to
    /// the existing count. Re-ingesting the same name accumulates, matching
    /// the store's append-only insert. Returns the new total for `name`.
    pub fn record_ingest(&mut self, name: &str, added: usize) -> usize {
        let count = self.counts.entry(name.to_string()).or_insert(0);
        *count += added;
        *count
    }

    /// Removes the record for `name`. Returns `false` when absent; an unknown
    /// name is a not-found signal, not an error.
    pub fn remove(&mut self, name: &str) -> bool {
        self.counts.remove(name).is_some()
    }

    /// Puts `name` back to an earlier observed state: a previous count, or
    /// absent. Used by the corpus manager to roll back a failed persist.
    pub(crate) fn restore(&mut self, name: &str, previous: Option<usize>) {
        match previous {
            Some(count) => {
                self.counts.insert(name.to_string(), count);
            }
            None => {
                self.counts.remove(name);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.counts.contains_key(name)
    }

    pub fn fragment_count(&self, name: &str) -> Option<usize> {
        self.counts.get(name).copied()
    }

    /// All records, ordered by document name.
    pub fn list(&self) -> Vec<DocumentRecord> {
        self.counts
            .iter()
            .map(|(name, fragment_count)| DocumentRecord {
                name: name.clone(),
                fragment_count: *fragment_count,
            })
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.counts.len()
    }

    pub fn total_fragments(&self) -> usize {
        self.counts.values().sum()
    }

    /// Writes the ledger to `path` through a temp file in the same directory
    /// followed by an atomic rename; a crash mid-write leaves the previous
    /// ledger intact.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::StorePersist(format!("creating ledger directory: {err}")))?;

        let encoded = serde_json::to_vec_pretty(&self.counts)
            .map_err(|err| AppError::StorePersist(format!("encoding ledger: {err}")))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::StorePersist(format!("creating temp ledger file: {err}")))?;
        tmp.write_all(&encoded)
            .map_err(|err| AppError::StorePersist(format!("writing ledger: {err}")))?;
        tmp.persist(path)
            .map_err(|err| AppError::StorePersist(format!("swapping ledger into place: {err}")))?;

        debug!(documents = self.counts.len(), path = %path.display(), "Document ledger saved");
        Ok(())
    }

    /// Loads the ledger from `path`. A missing file means a fresh corpus; a
    /// corrupt file is logged and treated as empty rather than surfaced.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ledger file found, starting fresh");
                return Self::new();
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to read ledger, starting fresh");
                return Self::new();
            }
        };

        match serde_json::from_slice::<BTreeMap<String, usize>>(&bytes) {
            Ok(counts) => {
                info!(documents = counts.len(), path = %path.display(), "Document ledger loaded");
                Self { counts }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Corrupt ledger file, starting fresh");
                Self::new()
            }
        }
    }
}
