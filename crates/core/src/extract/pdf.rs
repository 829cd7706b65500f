//! PDF text extraction.

use crate::error::ExtractError;
use std::path::Path;

#[cfg(feature = "pdf")]
pub(crate) fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    pdf_extract::extract_text(path).map_err(|e| ExtractError::Parse {
        format: "pdf",
        message: e.to_string(),
    })
}

#[cfg(not(feature = "pdf"))]
pub(crate) fn extract_pdf(_path: &Path) -> Result<String, ExtractError> {
    Err(ExtractError::CapabilityMissing("pdf"))
}

#[cfg(all(test, feature = "pdf"))]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_a_typed_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4 not really a pdf").unwrap();
        let err = extract_pdf(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Parse { format: "pdf", .. }));
    }
}
