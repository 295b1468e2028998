pub mod chunker;
pub mod extract;
pub mod pipeline;

pub use chunker::{chunk_pages, DraftFragment};
pub use extract::{extract_pages, ExtractedPage, SourceKind};
pub use pipeline::IngestionPipeline;
