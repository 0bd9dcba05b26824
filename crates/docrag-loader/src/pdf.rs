use std::panic;
use std::path::Path;

use docrag_core::error::Result;

use crate::load_error;

/// Extract the text of every page, in page order.
pub(crate) fn extract_pages(path: &Path) -> Result<Vec<String>> {
    // pdf-extract panics on some malformed inputs
    let pages = panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path))
        .map_err(|_| load_error(path, "pdf parser panicked"))?
        .map_err(|e| load_error(path, e))?;
    tracing::debug!(path = %path.display(), pages = pages.len(), "pdf text extracted");
    Ok(pages)
}
