use std::{ffi::OsStr, path::Path};

use common::error::AppError;
use lopdf::Document;
use tracing::{debug, warn};

/// File types accepted for ingestion. Anything else is rejected before any
/// parsing work happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Text,
    Markdown,
}

impl SourceKind {
    pub fn from_file_name(file_name: &str) -> Result<Self, AppError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("txt") => Ok(Self::Text),
            Some("md") | Some("markdown") => Ok(Self::Markdown),
            other => Err(AppError::UnsupportedInputType(format!(
                "unsupported file type: {}. Supported types: .pdf, .txt, .md",
                other.unwrap_or("none")
            ))),
        }
    }
}

/// One extracted unit of source text. `page` is populated when the format
/// carries page structure (PDF) and `None` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub text: String,
    pub page: Option<u32>,
}

/// Turns raw uploaded bytes into ordered text pages. Pure with respect to the
/// corpus: no I/O beyond reading the given bytes.
pub fn extract_pages(bytes: &[u8], kind: SourceKind) -> Result<Vec<ExtractedPage>, AppError> {
    match kind {
        SourceKind::Pdf => extract_pdf(bytes),
        SourceKind::Text | SourceKind::Markdown => {
            let text = std::str::from_utf8(bytes)
                .map_err(|err| AppError::Parsing(format!("file is not valid UTF-8: {err}")))?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![ExtractedPage {
                text: trimmed.to_string(),
                page: None,
            }])
        }
    }
}

/// Per-page extraction through the PDF's page tree, falling back to a
/// whole-document text pass when no page yields anything (some producers
/// store the text layer in a way the per-page walk misses).
fn extract_pdf(bytes: &[u8]) -> Result<Vec<ExtractedPage>, AppError> {
    let document = Document::load_mem(bytes)
        .map_err(|err| AppError::Parsing(format!("failed to parse PDF: {err}")))?;

    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();

    let mut pages = Vec::with_capacity(page_numbers.len());
    for number in page_numbers {
        match document.extract_text(&[number]) {
            Ok(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    pages.push(ExtractedPage {
                        text: trimmed.to_string(),
                        page: Some(number),
                    });
                }
            }
            Err(err) => {
                debug!(page = number, error = %err, "Per-page PDF text extraction failed");
            }
        }
    }

    if !pages.is_empty() {
        return Ok(pages);
    }

    warn!("Per-page PDF extraction yielded nothing, trying whole-document pass");
    let whole = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| AppError::Parsing(format!("failed to extract text from PDF: {err}")))?;
    let trimmed = whole.trim();
    if trimmed.is_empty() {
        return Err(AppError::Parsing(
            "PDF contains no extractable text".to_string(),
        ));
    }

    Ok(vec![ExtractedPage {
        text: trimmed.to_string(),
        page: None,
    }])
}
