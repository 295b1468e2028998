use std::{cmp::Ordering, io::Write, path::Path};

use common::error::AppError;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::fragment::Fragment;

/// Flat exact-scan cosine index over unit-normalized fragment embeddings.
///
/// Embeddings are normalized by the embedding provider before they reach the
/// store, so the dot product used for scoring is the cosine similarity. The
/// store has no removal primitive: deletion is expressed as [`rebuild`] with
/// the surviving population.
///
/// [`rebuild`]: FragmentStore::rebuild
#[derive(Debug, Default)]
pub struct FragmentStore {
    fragments: Vec<Fragment>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch of fragments, returning how many were added. The first
    /// insert defines the store; later inserts extend it. Identical text is
    /// not deduplicated: re-ingesting the same content creates duplicate
    /// fragments, which is the documented accumulate-on-re-ingest behavior.
    pub fn insert(&mut self, fragments: Vec<Fragment>) -> usize {
        let added = fragments.len();
        self.fragments.extend(fragments);
        added
    }

    /// Returns up to `k` fragments nearest to `query`, best first. Ties are
    /// broken by insertion order so results are deterministic. An empty store
    /// yields an empty result, never an error. A query whose dimension does
    /// not match the stored embeddings yields no results: partial dot
    /// products would rank on garbage.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<&Fragment> {
        if self.fragments.is_empty() || k == 0 {
            return Vec::new();
        }

        if self
            .dimension()
            .is_some_and(|dimension| dimension != query.len())
        {
            warn!(
                query_dimension = query.len(),
                index_dimension = self.dimension(),
                "Query dimension does not match index, returning no results"
            );
            return Vec::new();
        }

        let mut scored: Vec<(f32, usize)> = self
            .fragments
            .iter()
            .enumerate()
            .map(|(position, fragment)| (dot(query, &fragment.embedding), position))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        scored
            .into_iter()
            .take(k)
            .filter_map(|(_, position)| self.fragments.get(position))
            .collect()
    }

    /// Replaces the entire population atomically. This is the deletion
    /// primitive: the caller partitions the current fragments and rebuilds
    /// with the survivors, an O(total fragment count) operation regardless of
    /// how many fragments were removed.
    pub fn rebuild(&mut self, fragments: Vec<Fragment>) {
        self.fragments = fragments;
    }

    pub fn count(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Dimension of the stored embeddings, `None` while empty. Callers use
    /// this to detect a reload against a provider with a different dimension.
    pub fn dimension(&self) -> Option<usize> {
        self.fragments.first().map(|fragment| fragment.embedding.len())
    }

    /// Full current population, in insertion order.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Drops fragments beyond `len`, restoring the population to an earlier
    /// insert boundary. Used to roll back a failed ingest.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.fragments.truncate(len);
    }

    /// Serializes the population to `path` via a temp file in the same
    /// directory followed by an atomic rename, so a crash mid-write cannot
    /// clobber the previous index.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::StorePersist(format!("creating index directory: {err}")))?;

        let encoded = bincode::serialize(&self.fragments)
            .map_err(|err| AppError::StorePersist(format!("encoding index: {err}")))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::StorePersist(format!("creating temp index file: {err}")))?;
        tmp.write_all(&encoded)
            .map_err(|err| AppError::StorePersist(format!("writing index: {err}")))?;
        tmp.persist(path)
            .map_err(|err| AppError::StorePersist(format!("swapping index into place: {err}")))?;

        debug!(fragments = self.fragments.len(), path = %path.display(), "Fragment index saved");
        Ok(())
    }

    /// Loads a previously saved index. A missing or unreadable file is not an
    /// error: the store starts empty and is created lazily on first insert.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No existing fragment index, starting empty");
                return Self::new();
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to read fragment index, starting empty");
                return Self::new();
            }
        };

        match bincode::deserialize::<Vec<Fragment>>(&bytes) {
            Ok(fragments) => {
                info!(fragments = fragments.len(), path = %path.display(), "Fragment index loaded");
                Self { fragments }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Corrupt fragment index, starting empty");
                Self::new()
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
