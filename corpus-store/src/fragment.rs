use serde::{Deserialize, Serialize};

/// A contiguous slice of a source document's text, the atomic unit of
/// retrieval. Immutable once ingested; owned by the fragment store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub embedding: Vec<f32>,
    pub source_document: String,
    pub page: Option<u32>,
    pub sequence_index: usize,
}

impl Fragment {
    pub fn new(
        text: String,
        embedding: Vec<f32>,
        page: Option<u32>,
        sequence_index: usize,
    ) -> Self {
        Self {
            text,
            embedding,
            source_document: String::new(),
            page,
            sequence_index,
        }
    }
}

/// One ledger entry: a logical document name and how many fragments it
/// contributed to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub name: String,
    pub fragment_count: usize,
}

/// Corpus-wide counters. The fragment count comes from the index population,
/// the document count from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub document_count: usize,
    pub fragment_count: usize,
}
