//! Loading documents from disk.

use std::path::Path;

use tracing::info;

use crate::document::Document;
use crate::error::{RagError, Result};

/// Load a document from `path`.
///
/// PDFs are extracted with `pdf-extract` (feature `pdf`); form feeds in the
/// extracted text mark page boundaries. Any other file is read as UTF-8.
/// The document id is the file stem.
///
/// # Errors
///
/// Returns [`RagError::DocumentUnreadable`] if the file is missing or cannot
/// be decoded, and [`RagError::EmptyDocument`] if it contains no text.
pub fn load_document(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(unreadable(path, "no such file"));
    }

    let id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let is_pdf =
        path.extension().is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"));
    let document = if is_pdf {
        load_pdf(path, id)?
    } else {
        let text = std::fs::read_to_string(path).map_err(|e| unreadable(path, e))?;
        Document::new(id, text)
    };

    if document.is_blank() {
        return Err(RagError::EmptyDocument { document_id: document.id });
    }

    info!(
        document.id = %document.id,
        chars = document.text.chars().count(),
        pages = document.page_offsets.len(),
        "loaded document"
    );
    Ok(document.with_source_uri(path.display().to_string()))
}

#[cfg(feature = "pdf")]
fn load_pdf(path: &Path, id: String) -> Result<Document> {
    let text = pdf_extract::extract_text(path).map_err(|e| unreadable(path, e))?;
    Ok(Document::from_pages(id, text.split('\x0C')))
}

#[cfg(not(feature = "pdf"))]
fn load_pdf(path: &Path, _id: String) -> Result<Document> {
    Err(unreadable(path, "PDF support is disabled (enable the `pdf` feature)"))
}

fn unreadable(path: &Path, message: impl std::fmt::Display) -> RagError {
    RagError::DocumentUnreadable { path: path.display().to_string(), message: message.to_string() }
}
