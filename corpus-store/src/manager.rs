use std::path::{Path, PathBuf};

use common::error::AppError;
use tracing::{info, warn};

use crate::{
    fragment::{CorpusStats, DocumentRecord, Fragment},
    ledger::DocumentLedger,
    store::FragmentStore,
};

/// Default file name for the serialized fragment index.
pub const INDEX_FILE: &str = "fragments.bin";
/// Default file name for the document ledger.
pub const LEDGER_FILE: &str = "documents.json";

/// Keeps the fragment store and the document ledger consistent as one unit
/// and is the sole writer of their persisted state.
///
/// Mutating operations take `&mut self`: the design assumes at most one
/// concurrent mutation, and callers that interleave writers must serialize
/// them externally. Reads take `&self` and observe plain snapshots.
pub struct CorpusManager {
    store: FragmentStore,
    ledger: DocumentLedger,
    index_path: PathBuf,
    ledger_path: PathBuf,
}

impl CorpusManager {
    /// Loads both persisted artifacts independently. Either one missing or
    /// corrupt yields empty state, created lazily on the first ingest.
    pub fn open(index_path: impl Into<PathBuf>, ledger_path: impl Into<PathBuf>) -> Self {
        let index_path = index_path.into();
        let ledger_path = ledger_path.into();

        let store = FragmentStore::load(&index_path);
        let ledger = DocumentLedger::load(&ledger_path);

        if store.count() != ledger.total_fragments() {
            // Possible after a crash between the two persist steps; the index
            // may carry fragments the ledger never learned about.
            warn!(
                indexed = store.count(),
                recorded = ledger.total_fragments(),
                "Fragment index and ledger disagree on fragment count"
            );
        }

        Self {
            store,
            ledger,
            index_path,
            ledger_path,
        }
    }

    /// Opens a corpus under `dir` with the default artifact file names.
    pub fn open_in(dir: &Path) -> Self {
        Self::open(dir.join(INDEX_FILE), dir.join(LEDGER_FILE))
    }

    /// Tags every fragment with `document_name`, appends the batch to the
    /// store, records it in the ledger, and persists both — store first, then
    /// ledger. A crash between the two steps leaves orphan index growth the
    /// ledger never reports, which is invisible to readers; persisting the
    /// ledger first could instead claim fragments the index lacks. Any persist
    /// failure rolls the in-memory state back and returns the error.
    pub fn ingest(
        &mut self,
        mut fragments: Vec<Fragment>,
        document_name: &str,
    ) -> Result<usize, AppError> {
        if fragments.is_empty() {
            warn!(document = document_name, "Ingest called with zero fragments, nothing to do");
            return Ok(0);
        }

        self.check_dimensions(&fragments)?;

        for fragment in &mut fragments {
            fragment.source_document = document_name.to_string();
        }

        let added = fragments.len();
        let population_before = self.store.count();
        self.store.insert(fragments);

        if let Err(err) = self.store.save(&self.index_path) {
            self.store.truncate(population_before);
            return Err(err);
        }

        let ledger_before = self.ledger.fragment_count(document_name);
        let total = self.ledger.record_ingest(document_name, added);

        if let Err(err) = self.ledger.save(&self.ledger_path) {
            self.ledger.restore(document_name, ledger_before);
            self.store.truncate(population_before);
            self.resave_store_after_rollback();
            return Err(err);
        }

        info!(
            document = document_name,
            added,
            total,
            indexed = self.store.count(),
            "Ingested fragments"
        );
        Ok(added)
    }

    /// Removes a document and all of its fragments. Returns `Ok(false)` for
    /// an unknown name, leaving the corpus untouched. The surviving set is
    /// partitioned from the current in-memory population and the index is
    /// rebuilt from it — the store exposes no cheaper removal primitive, so
    /// this costs O(total fragments) regardless of the document's size.
    pub fn delete_document(&mut self, name: &str) -> Result<bool, AppError> {
        if !self.ledger.contains(name) {
            warn!(document = name, "Delete requested for unknown document");
            return Ok(false);
        }

        let previous: Vec<Fragment> = self.store.fragments().to_vec();
        let survivors: Vec<Fragment> = previous
            .iter()
            .filter(|fragment| fragment.source_document != name)
            .cloned()
            .collect();
        let removed = previous.len() - survivors.len();

        self.store.rebuild(survivors);
        if let Err(err) = self.store.save(&self.index_path) {
            self.store.rebuild(previous);
            return Err(err);
        }

        let recorded = self.ledger.fragment_count(name);
        self.ledger.remove(name);

        if let Err(err) = self.ledger.save(&self.ledger_path) {
            // Undo the delete entirely: a persisted ledger must never claim
            // fragments the persisted index lacks, so the restored index is
            // re-saved as well.
            self.ledger.restore(name, recorded);
            self.store.rebuild(previous);
            self.resave_store_after_rollback();
            return Err(err);
        }

        info!(
            document = name,
            removed,
            remaining = self.store.count(),
            "Deleted document"
        );
        Ok(true)
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            document_count: self.ledger.document_count(),
            fragment_count: self.store.count(),
        }
    }

    pub fn list_documents(&self) -> Vec<DocumentRecord> {
        self.ledger.list()
    }

    pub fn is_ready(&self) -> bool {
        !self.store.is_empty()
    }

    /// Embedding dimension of the loaded index, `None` while empty. Read-path
    /// callers compare this against their provider before searching: a
    /// mismatch means the index was persisted under a different embedding
    /// configuration.
    pub fn dimension(&self) -> Option<usize> {
        self.store.dimension()
    }

    /// Searches the live store directly. Empty corpus yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<&Fragment> {
        self.store.search(query, k)
    }

    /// A bound search handle, or `None` while the corpus is empty. The handle
    /// borrows the live store, so it reflects store contents at call time and
    /// cannot outlive a later mutation.
    pub fn retriever(&self, k: usize) -> Option<Retriever<'_>> {
        if !self.is_ready() {
            warn!("Corpus is empty, no retriever available");
            return None;
        }
        Some(Retriever {
            store: &self.store,
            k,
        })
    }

    /// Rejects a batch whose embedding dimension conflicts with the loaded
    /// store; a mismatch means the index was built by a different embedding
    /// configuration and searching it would be meaningless.
    fn check_dimensions(&self, fragments: &[Fragment]) -> Result<(), AppError> {
        let Some(first) = fragments.first() else {
            return Ok(());
        };
        let batch_dim = first.embedding.len();

        if let Some(fragment) = fragments
            .iter()
            .find(|fragment| fragment.embedding.len() != batch_dim)
        {
            return Err(AppError::Embedding(format!(
                "inconsistent embedding dimensions within batch: {} vs {}",
                batch_dim,
                fragment.embedding.len()
            )));
        }

        if let Some(store_dim) = self.store.dimension() {
            if store_dim != batch_dim {
                return Err(AppError::Embedding(format!(
                    "embedding dimension {batch_dim} does not match existing index dimension {store_dim}"
                )));
            }
        }

        Ok(())
    }

    fn resave_store_after_rollback(&self) {
        if let Err(err) = self.store.save(&self.index_path) {
            warn!(error = %err, "Failed to re-save fragment index after rollback");
        }
    }
}

/// Search bound to a result budget, borrowing the live store.
pub struct Retriever<'a> {
    store: &'a FragmentStore,
    k: usize,
}

impl Retriever<'_> {
    pub fn retrieve(&self, query: &[f32]) -> Vec<&Fragment> {
        self.store.search(query, self.k)
    }
}
