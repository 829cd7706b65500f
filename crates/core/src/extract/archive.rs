//! Archive metadata extraction: entry names only, no decompression.

use crate::error::ExtractError;
use std::path::Path;

#[cfg(feature = "archive")]
pub(crate) fn list_entries(path: &Path, max_entries: usize) -> Result<String, ExtractError> {
    let file = std::fs::File::open(path)?;
    let archive = zip::ZipArchive::new(file).map_err(|e| ExtractError::Parse {
        format: "archive",
        message: e.to_string(),
    })?;
    let total = archive.len();
    let names: Vec<&str> = archive.file_names().take(max_entries).collect();
    let mut out = format!("Archive with {} entries: {}", total, names.join(", "));
    if total > max_entries {
        out.push_str(", …");
    }
    Ok(out)
}

#[cfg(not(feature = "archive"))]
pub(crate) fn list_entries(_path: &Path, _max_entries: usize) -> Result<String, ExtractError> {
    Err(ExtractError::CapabilityMissing("archive"))
}

#[cfg(all(test, feature = "archive"))]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, names: &[&str]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let opts = zip::write::FileOptions::default();
        for name in names {
            writer.start_file(*name, opts).unwrap();
            writer.write_all(b"payload").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn lists_entry_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        write_zip(&path, &["taxes/2024.pdf", "taxes/receipts.csv"]);
        let out = list_entries(&path, 100).unwrap();
        assert!(out.contains("taxes/2024.pdf"));
        assert!(out.contains("2 entries"));
    }

    #[test]
    fn caps_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.zip");
        let names: Vec<String> = (0..50).map(|i| format!("file_{i}.txt")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        write_zip(&path, &refs);
        let out = list_entries(&path, 5).unwrap();
        assert!(out.contains("50 entries"));
        assert!(out.ends_with("…"));
        assert!(!out.contains("file_40.txt"));
    }

    #[test]
    fn non_zip_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.zip");
        std::fs::write(&path, b"not an archive").unwrap();
        let err = list_entries(&path, 10).unwrap_err();
        assert!(matches!(err, ExtractError::Parse { .. }));
    }
}
