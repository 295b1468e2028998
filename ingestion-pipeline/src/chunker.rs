use common::error::AppError;
use text_splitter::{ChunkConfig, MarkdownSplitter, TextSplitter};

use crate::extract::{ExtractedPage, SourceKind};

/// A fragment-to-be: chunked text with its source page, before embedding and
/// document tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftFragment {
    pub text: String,
    pub page: Option<u32>,
    pub sequence_index: usize,
}

/// Splits extracted pages into overlapping chunks, numbering them across the
/// whole document. Markdown is split along its structure; everything else by
/// character windows.
pub fn chunk_pages(
    pages: &[ExtractedPage],
    kind: SourceKind,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<DraftFragment>, AppError> {
    let config = ChunkConfig::new(chunk_size)
        .with_overlap(chunk_overlap)
        .map_err(|err| AppError::Validation(format!("invalid chunking configuration: {err}")))?;

    let mut drafts = Vec::new();
    let mut sequence_index = 0usize;

    match kind {
        SourceKind::Markdown => {
            let splitter = MarkdownSplitter::new(config);
            for page in pages {
                for chunk in splitter.chunks(&page.text) {
                    drafts.push(DraftFragment {
                        text: chunk.to_string(),
                        page: page.page,
                        sequence_index,
                    });
                    sequence_index += 1;
                }
            }
        }
        SourceKind::Pdf | SourceKind::Text => {
            let splitter = TextSplitter::new(config);
            for page in pages {
                for chunk in splitter.chunks(&page.text) {
                    drafts.push(DraftFragment {
                        text: chunk.to_string(),
                        page: page.page,
                        sequence_index,
                    });
                    sequence_index += 1;
                }
            }
        }
    }

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str, page: Option<u32>) -> ExtractedPage {
        ExtractedPage {
            text: text.to_string(),
            page,
        }
    }

    #[test]
    fn test_short_page_is_one_chunk() {
        let drafts = chunk_pages(&[page("short text", None)], SourceKind::Text, 100, 10)
            .expect("chunking");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "short text");
        assert_eq!(drafts[0].sequence_index, 0);
    }

    #[test]
    fn test_long_page_is_split() {
        let long = "word ".repeat(200);
        let drafts =
            chunk_pages(&[page(&long, Some(1))], SourceKind::Text, 100, 20).expect("chunking");

        assert!(drafts.len() > 1, "expected multiple chunks");
        assert!(drafts.iter().all(|d| d.page == Some(1)));
        assert!(drafts.iter().all(|d| d.text.len() <= 100));
    }

    #[test]
    fn test_sequence_indexes_run_across_pages() {
        let drafts = chunk_pages(
            &[page("first page", Some(1)), page("second page", Some(2))],
            SourceKind::Text,
            100,
            0,
        )
        .expect("chunking");

        let indexes: Vec<usize> = drafts.iter().map(|d| d.sequence_index).collect();
        assert_eq!(indexes, vec![0, 1]);
        assert_eq!(drafts[0].page, Some(1));
        assert_eq!(drafts[1].page, Some(2));
    }

    #[test]
    fn test_markdown_splitting_keeps_sections() {
        let markdown = "# Title\n\nSome intro text.\n\n## Section\n\nMore body text.";
        let drafts = chunk_pages(&[page(markdown, None)], SourceKind::Markdown, 40, 0)
            .expect("chunking");

        assert!(!drafts.is_empty());
        assert!(drafts.iter().any(|d| d.text.contains("# Title")));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = chunk_pages(&[page("text", None)], SourceKind::Text, 10, 10)
            .expect_err("overlap >= size must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }
}
