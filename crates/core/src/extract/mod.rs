//! Per-format text extraction with size and time guards.
//!
//! Dispatch is a tagged enum over a fixed format set. Optional extractors
//! (OCR, EXIF) are cargo features surfaced as capability flags resolved once
//! at composition time. Every return path goes through the final length cap.

mod archive;
mod raster;
mod office;
mod pdf;
mod sheet;
mod text;

use crate::config::ExtractionConfig;
use crate::deadline::with_deadline;
use crate::error::ExtractError;
use crate::models::{ExtractedText, ExtractionMethod, FileHandle};
use crate::normalize::clean_text;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Everything the pipeline knows how to open. Media extensions never reach
/// the extractor; the orchestrator resolves them by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Markup,
    Pdf,
    Docx,
    DocLegacy,
    Pptx,
    Sheet,
    Image,
    Archive,
    Unknown,
}

const TEXT_EXTS: &[&str] = &[
    "txt", "md", "log", "rtf", "csv", "tsv", "json", "toml", "yaml", "yml", "ini", "rs", "py",
    "js", "ts", "go", "java", "c", "cpp", "h", "sh", "sql",
];
const MARKUP_EXTS: &[&str] = &["html", "htm", "xml", "svg", "xhtml"];
const SHEET_EXTS: &[&str] = &["xlsx", "xls", "xlsm", "ods"];
const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "bmp", "webp"];
const ARCHIVE_EXTS: &[&str] = &["zip"];
const MEDIA_EXTS: &[&str] = &[
    "mp3", "wav", "flac", "m4a", "aac", "ogg", "mp4", "mov", "avi", "mkv", "webm", "wmv", "m4v",
];

/// Audio/video bypass extraction and backend analysis entirely.
pub fn is_media_extension(ext: &str) -> bool {
    MEDIA_EXTS.contains(&ext)
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Self {
        if TEXT_EXTS.contains(&ext) {
            FileKind::Text
        } else if MARKUP_EXTS.contains(&ext) {
            FileKind::Markup
        } else if ext == "pdf" {
            FileKind::Pdf
        } else if ext == "docx" {
            FileKind::Docx
        } else if ext == "doc" {
            FileKind::DocLegacy
        } else if ext == "pptx" || ext == "ppt" {
            FileKind::Pptx
        } else if SHEET_EXTS.contains(&ext) {
            FileKind::Sheet
        } else if IMAGE_EXTS.contains(&ext) {
            FileKind::Image
        } else if ARCHIVE_EXTS.contains(&ext) {
            FileKind::Archive
        } else {
            FileKind::Unknown
        }
    }

    fn label(self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Markup => "markup",
            FileKind::Pdf => "pdf",
            FileKind::Docx => "docx",
            FileKind::DocLegacy => "doc",
            FileKind::Pptx => "pptx",
            FileKind::Sheet => "spreadsheet",
            FileKind::Image => "image",
            FileKind::Archive => "archive",
            FileKind::Unknown => "unknown",
        }
    }

    /// Raster/OCR and spreadsheet paths get the larger budget.
    fn budget_secs(self, cfg: &ExtractionConfig) -> u64 {
        match self {
            FileKind::Pdf | FileKind::Sheet | FileKind::Image => cfg.heavy_timeout_secs,
            _ => cfg.text_timeout_secs,
        }
    }
}

/// Which optional extractors this build carries. Resolved from cargo
/// features once, at composition time.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub pdf: bool,
    pub office: bool,
    pub archive: bool,
    pub ocr: bool,
    pub exif: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        Self {
            pdf: cfg!(feature = "pdf"),
            office: cfg!(feature = "office"),
            archive: cfg!(feature = "archive"),
            ocr: cfg!(feature = "ocr"),
            exif: cfg!(feature = "exif"),
        }
    }
}

/// Extracts bounded UTF-8 text for the handle's format, or a typed error.
///
/// Order of guards: size precheck, signature-based kind resolution, the
/// format's deadline around a blocking worker, then the final length cap.
pub async fn extract(
    handle: &FileHandle,
    cfg: &ExtractionConfig,
    caps: Capabilities,
) -> Result<ExtractedText, ExtractError> {
    if handle.size > cfg.max_file_bytes {
        return Err(ExtractError::SizeExceeded {
            size: handle.size,
            limit: cfg.max_file_bytes,
        });
    }

    let kind = resolve_kind(&handle.path, &handle.extension).await?;
    let format = kind.label();
    let budget = Duration::from_secs(kind.budget_secs(cfg));

    let path = handle.path.clone();
    let size = handle.size;
    let worker_cfg = cfg.clone();
    let (raw, method) = with_deadline(
        budget,
        || ExtractError::Timeout {
            format,
            budget_secs: budget.as_secs(),
        },
        async {
            tokio::task::spawn_blocking(move || dispatch(kind, &path, size, &worker_cfg, caps))
                .await
                .map_err(|e| ExtractError::Parse {
                    format,
                    message: format!("extraction worker failed: {}", e),
                })?
        },
    )
    .await?;

    debug!(
        path = %handle.path.display(),
        format,
        method = %method,
        chars = raw.len(),
        "extracted"
    );
    Ok(ExtractedText::new(
        clean_text(&raw, cfg.max_text_chars),
        method,
    ))
}

fn dispatch(
    kind: FileKind,
    path: &Path,
    size: u64,
    cfg: &ExtractionConfig,
    caps: Capabilities,
) -> Result<(String, ExtractionMethod), ExtractError> {
    match kind {
        FileKind::Text => {
            let raw = text::read_bounded_text(path, byte_cap(cfg))?;
            Ok((raw, ExtractionMethod::Content))
        }
        FileKind::Markup => {
            let raw = text::read_bounded_text(path, byte_cap(cfg))?;
            Ok((text::strip_markup(&raw), ExtractionMethod::Content))
        }
        FileKind::Pdf => {
            if !caps.pdf {
                return Err(ExtractError::CapabilityMissing("pdf"));
            }
            let body = pdf::extract_pdf(path)?;
            // A well-formed PDF with next to no text is plausibly a scan.
            if body.trim().len() < SCAN_TEXT_THRESHOLD
                && caps.ocr
                && size <= cfg.ocr.max_file_bytes
            {
                let ocr_text = raster::ocr_pdf(path, &cfg.ocr)?;
                if !ocr_text.trim().is_empty() {
                    return Ok((ocr_text, ExtractionMethod::Ocr));
                }
            }
            Ok((body, ExtractionMethod::Content))
        }
        FileKind::Docx => {
            if !caps.office {
                return Err(ExtractError::CapabilityMissing("office"));
            }
            office::extract_docx(path, cfg)
        }
        FileKind::DocLegacy => {
            let raw = office::extract_doc_legacy(path, byte_cap(cfg))?;
            Ok((raw, ExtractionMethod::Content))
        }
        FileKind::Pptx => {
            if !caps.office {
                return Err(ExtractError::CapabilityMissing("office"));
            }
            office::extract_pptx(path, cfg)
        }
        FileKind::Sheet => {
            if !caps.office {
                return Err(ExtractError::CapabilityMissing("office"));
            }
            let raw = sheet::extract_sheet(path, cfg)?;
            Ok((raw, ExtractionMethod::Content))
        }
        FileKind::Image => raster::extract_image(path, size, cfg, caps),
        FileKind::Archive => {
            if !caps.archive {
                return Err(ExtractError::CapabilityMissing("archive"));
            }
            let raw = archive::list_entries(path, cfg.max_archive_entries)?;
            Ok((raw, ExtractionMethod::ArchiveMetadata))
        }
        FileKind::Unknown => Err(ExtractError::Unsupported(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string(),
        )),
    }
}

/// Byte budget for streamed text reads; generous multiplier over the char
/// cap so multi-byte text still fills it.
fn byte_cap(cfg: &ExtractionConfig) -> usize {
    cfg.max_text_chars.saturating_mul(4)
}

/// A parsed PDF whose body is shorter than this is treated as a scan
/// candidate for the OCR fallback.
const SCAN_TEXT_THRESHOLD: usize = 64;

/// Container signature as read from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signature {
    Zip,
    Ole,
    Pdf,
    Other,
}

/// Legacy vs. zip-packaged office formats share extensions in the wild;
/// trust the signature bytes over the name and redirect misrouted files.
async fn resolve_kind(path: &Path, ext: &str) -> Result<FileKind, ExtractError> {
    let kind = FileKind::from_extension(ext);
    let ambiguous = matches!(
        kind,
        FileKind::Docx | FileKind::DocLegacy | FileKind::Pptx | FileKind::Sheet | FileKind::Unknown
    );
    if !ambiguous {
        return Ok(kind);
    }
    let sig = sniff_signature(path).await?;
    Ok(match (kind, sig) {
        (FileKind::DocLegacy, Signature::Zip) => FileKind::Docx,
        (FileKind::Docx, Signature::Ole) => FileKind::DocLegacy,
        // calamine reads both xls and xlsx, so Sheet stands either way.
        (FileKind::Pptx, Signature::Ole) => FileKind::DocLegacy,
        (FileKind::Unknown, Signature::Zip) => FileKind::Archive,
        (FileKind::Unknown, Signature::Pdf) => FileKind::Pdf,
        (k, _) => k,
    })
}

async fn sniff_signature(path: &Path) -> Result<Signature, ExtractError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = [0u8; 512];
    let n = file.read(&mut buf).await?;
    let head = &buf[..n];

    if let Some(kind) = infer::get(head) {
        let mime = kind.mime_type();
        if mime == "application/pdf" {
            return Ok(Signature::Pdf);
        }
        if mime == "application/zip" || mime.contains("officedocument") {
            return Ok(Signature::Zip);
        }
        if mime == "application/x-ole-storage"
            || mime == "application/msword"
            || mime == "application/vnd.ms-excel"
        {
            return Ok(Signature::Ole);
        }
    }
    // infer covers the common cases; fall back to raw magic for the rest.
    if head.starts_with(b"PK\x03\x04") {
        Ok(Signature::Zip)
    } else if head.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
        Ok(Signature::Ole)
    } else if head.starts_with(b"%PDF") {
        Ok(Signature::Pdf)
    } else {
        Ok(Signature::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_for(path: &Path) -> FileHandle {
        let meta = std::fs::metadata(path).unwrap();
        FileHandle {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default(),
            size: meta.len(),
            mtime: 0,
        }
    }

    #[test]
    fn media_extensions_are_recognized() {
        assert!(is_media_extension("mp3"));
        assert!(is_media_extension("mkv"));
        assert!(!is_media_extension("pdf"));
    }

    #[tokio::test]
    async fn size_precheck_fires_before_any_read() {
        let cfg = ExtractionConfig {
            max_file_bytes: 8,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        std::fs::write(&path, b"0123456789abcdef").unwrap();
        let err = extract(&handle_for(&path), &cfg, Capabilities::detect())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::SizeExceeded { size: 16, .. }));
    }

    #[tokio::test]
    async fn text_extraction_respects_the_cap() {
        let cfg = ExtractionConfig {
            max_text_chars: 40,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "word ".repeat(500)).unwrap();
        let out = extract(&handle_for(&path), &cfg, Capabilities::detect())
            .await
            .unwrap();
        assert!(out.text.chars().count() <= 40);
        assert_eq!(out.method, ExtractionMethod::Content);
    }

    #[tokio::test]
    async fn zip_signature_redirects_misnamed_doc() {
        // A zip container with a .doc extension must be routed to the
        // zip-family extractor, not the legacy scavenger.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.doc");
        std::fs::write(&path, b"PK\x03\x04\x14\x00\x00\x00").unwrap();
        let kind = resolve_kind(&path, "doc").await.unwrap();
        assert_eq!(kind, FileKind::Docx);
    }

    #[tokio::test]
    async fn ole_signature_redirects_misnamed_docx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0u8; 64]);
        std::fs::write(&path, &bytes).unwrap();
        let kind = resolve_kind(&path, "docx").await.unwrap();
        assert_eq!(kind, FileKind::DocLegacy);
    }

    #[tokio::test]
    async fn unknown_extension_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.xyz");
        std::fs::write(&path, b"opaque").unwrap();
        let err = extract(
            &handle_for(&path),
            &ExtractionConfig::default(),
            Capabilities::detect(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
        assert!(!err.suggestion().is_empty());
    }

    #[tokio::test]
    async fn markup_is_tag_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<html><body><h1>Quarterly Report</h1><p>Numbers are up.</p></body></html>").unwrap();
        let out = extract(
            &handle_for(&path),
            &ExtractionConfig::default(),
            Capabilities::detect(),
        )
        .await
        .unwrap();
        assert!(out.text.contains("Quarterly Report"));
        assert!(!out.text.contains("<h1>"));
    }
}
