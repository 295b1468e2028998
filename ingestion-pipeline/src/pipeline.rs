use std::{path::Path, sync::Arc};

use common::{
    error::AppError,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use corpus_store::{CorpusManager, Fragment};
use tracing::{info, info_span, warn};

use crate::{
    chunker::chunk_pages,
    extract::{extract_pages, SourceKind},
};

/// Drives one document from raw bytes to indexed fragments: extract, chunk,
/// embed, then hand the batch to the corpus manager, which tags and persists
/// it. Embedding failures abort before any corpus mutation; there is no
/// internal retry.
pub struct IngestionPipeline {
    embeddings: Arc<EmbeddingProvider>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl IngestionPipeline {
    pub fn new(embeddings: Arc<EmbeddingProvider>, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            embeddings,
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn from_config(embeddings: Arc<EmbeddingProvider>, config: &AppConfig) -> Self {
        Self::new(embeddings, config.chunk_size, config.chunk_overlap)
    }

    /// Ingests one uploaded document. Returns the number of fragments added
    /// (zero when the file holds no extractable text).
    pub async fn ingest_bytes(
        &self,
        corpus: &mut CorpusManager,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<usize, AppError> {
        let span = info_span!("ingest_document", document = %file_name);
        let _enter = span.enter();

        let kind = SourceKind::from_file_name(file_name)?;

        // PDF parsing is CPU-bound; keep it off the async executor.
        let pages = match kind {
            SourceKind::Pdf => {
                tokio::task::spawn_blocking(move || extract_pages(&bytes, kind)).await??
            }
            SourceKind::Text | SourceKind::Markdown => extract_pages(&bytes, kind)?,
        };

        let drafts = chunk_pages(&pages, kind, self.chunk_size, self.chunk_overlap)?;
        if drafts.is_empty() {
            warn!(document = %file_name, "Document produced no fragments");
            return Ok(0);
        }

        let texts: Vec<String> = drafts.iter().map(|draft| draft.text.clone()).collect();
        let embeddings = self
            .embeddings
            .embed_batch(texts)
            .await
            .map_err(|err| AppError::Embedding(err.to_string()))?;

        if embeddings.len() != drafts.len() {
            return Err(AppError::Embedding(format!(
                "embedding count {} does not match fragment count {}",
                embeddings.len(),
                drafts.len()
            )));
        }

        let fragments: Vec<Fragment> = drafts
            .into_iter()
            .zip(embeddings)
            .map(|(draft, embedding)| {
                Fragment::new(draft.text, embedding, draft.page, draft.sequence_index)
            })
            .collect();

        let added = corpus.ingest(fragments, file_name)?;
        info!(document = %file_name, added, "Document ingested");
        Ok(added)
    }

    /// Convenience wrapper reading the document from disk first.
    pub async fn ingest_file(
        &self,
        corpus: &mut CorpusManager,
        path: &Path,
    ) -> Result<usize, AppError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                AppError::Validation(format!("path has no usable file name: {}", path.display()))
            })?
            .to_string();

        let bytes = tokio::fs::read(path).await?;
        self.ingest_bytes(corpus, bytes, &file_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_store::manager::{INDEX_FILE, LEDGER_FILE};

    fn test_pipeline() -> IngestionPipeline {
        let embeddings =
            Arc::new(EmbeddingProvider::new_hashed(32).expect("hashed provider"));
        IngestionPipeline::new(embeddings, 100, 20)
    }

    fn open_manager(dir: &Path) -> CorpusManager {
        CorpusManager::open(dir.join(INDEX_FILE), dir.join(LEDGER_FILE))
    }

    #[tokio::test]
    async fn test_ingest_text_document_end_to_end() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut corpus = open_manager(dir.path());
        let pipeline = test_pipeline();

        let body = "Beekeeping requires patience. ".repeat(20);
        let added = pipeline
            .ingest_bytes(&mut corpus, body.into_bytes(), "bees.txt")
            .await
            .expect("ingest should succeed");

        assert!(added > 1, "long text should split into several fragments");
        let stats = corpus.stats();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.fragment_count, added);

        let records = corpus.list_documents();
        assert_eq!(records[0].name, "bees.txt");
        assert_eq!(records[0].fragment_count, added);
    }

    #[tokio::test]
    async fn test_unsupported_extension_rejected_before_corpus_touch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut corpus = open_manager(dir.path());
        let pipeline = test_pipeline();

        let err = pipeline
            .ingest_bytes(&mut corpus, b"binary".to_vec(), "slides.pptx")
            .await
            .expect_err("must reject");

        assert!(matches!(err, AppError::UnsupportedInputType(_)));
        assert_eq!(corpus.stats().fragment_count, 0);
        assert!(!dir.path().join(INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_empty_document_adds_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut corpus = open_manager(dir.path());
        let pipeline = test_pipeline();

        let added = pipeline
            .ingest_bytes(&mut corpus, b"   ".to_vec(), "blank.txt")
            .await
            .expect("ingest of blank file is a no-op");

        assert_eq!(added, 0);
        assert_eq!(corpus.stats().document_count, 0);
    }

    #[tokio::test]
    async fn test_markdown_document_is_ingestible() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut corpus = open_manager(dir.path());
        let pipeline = test_pipeline();

        let added = pipeline
            .ingest_bytes(
                &mut corpus,
                b"# Title\n\nA short note about nothing much.".to_vec(),
                "note.md",
            )
            .await
            .expect("ingest should succeed");

        assert!(added >= 1);
        assert!(corpus.is_ready());
    }
}
