//! Word-processor and presentation formats.
//!
//! DOCX gets a structured parse first and falls back to tag-stripping the
//! raw document XML; if even the container is unreadable the entry listing
//! is reported as archive metadata. Legacy OLE documents have no maintained
//! parser, so their text is scavenged from printable runs.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::models::ExtractionMethod;
use std::path::Path;

#[cfg(feature = "office")]
use std::io::Read;

/// Decompressed per-entry ceiling, against zip bombs.
#[cfg(feature = "office")]
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[cfg(feature = "office")]
pub(crate) fn extract_docx(
    path: &Path,
    cfg: &ExtractionConfig,
) -> Result<(String, ExtractionMethod), ExtractError> {
    let bytes = std::fs::read(path)?;

    // Primary: structured parse.
    if let Ok(docx) = docx_rs::read_docx(&bytes) {
        let text = collect_docx_text(&docx);
        if !text.trim().is_empty() {
            return Ok((text, ExtractionMethod::Content));
        }
    }

    // Fallback: tag-strip word/document.xml out of the container.
    match docx_tag_strip(&bytes) {
        Ok(text) if !text.trim().is_empty() => Ok((text, ExtractionMethod::Content)),
        _ => {
            // Last resort: report what the container holds.
            let listing = zip_entry_listing(&bytes, cfg.max_archive_entries)?;
            Ok((listing, ExtractionMethod::ArchiveMetadata))
        }
    }
}

#[cfg(feature = "office")]
fn collect_docx_text(docx: &docx_rs::Docx) -> String {
    let mut out = String::new();
    for child in &docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(para) = child {
            let mut line = String::new();
            for pc in &para.children {
                if let docx_rs::ParagraphChild::Run(run) = pc {
                    for rc in &run.children {
                        if let docx_rs::RunChild::Text(t) = rc {
                            line.push_str(&t.text);
                        }
                    }
                }
            }
            if !line.trim().is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(line.trim());
            }
        }
    }
    out
}

#[cfg(feature = "office")]
fn docx_tag_strip(bytes: &[u8]) -> Result<String, ExtractError> {
    let xml = read_zip_entry(bytes, "word/document.xml")?;
    Ok(collect_tagged_text(&xml, b"t"))
}

#[cfg(feature = "office")]
pub(crate) fn extract_pptx(
    path: &Path,
    cfg: &ExtractionConfig,
) -> Result<(String, ExtractionMethod), ExtractError> {
    let bytes = std::fs::read(path)?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
        .map_err(|e| parse_err("pptx", e))?;

    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in slide_names.into_iter().take(cfg.max_sheets.max(20)) {
        let entry = archive.by_name(&name).map_err(|e| parse_err("pptx", e))?;
        let mut xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(ExtractError::Io)?;
        let text = collect_tagged_text(&xml, b"t");
        if !text.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&text);
        }
    }

    if out.trim().is_empty() {
        let listing = zip_entry_listing(&bytes, cfg.max_archive_entries)?;
        return Ok((listing, ExtractionMethod::ArchiveMetadata));
    }
    Ok((out, ExtractionMethod::Content))
}

/// Collects the text content of every `<ns:tag>` element.
#[cfg(feature = "office")]
fn collect_tagged_text(xml: &[u8], tag: &[u8]) -> String {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_tag = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                in_tag = e.local_name().as_ref() == tag;
            }
            Ok(quick_xml::events::Event::End(_)) => in_tag = false,
            Ok(quick_xml::events::Event::Text(t)) if in_tag => {
                if let Ok(text) = t.unescape() {
                    if !out.is_empty() && !text.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(&text);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

#[cfg(feature = "office")]
fn read_zip_entry(bytes: &[u8], name: &str) -> Result<Vec<u8>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| parse_err("docx", e))?;
    let entry = archive.by_name(name).map_err(|e| parse_err("docx", e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ExtractError::Io)?;
    Ok(out)
}

#[cfg(feature = "office")]
fn zip_entry_listing(bytes: &[u8], max_entries: usize) -> Result<String, ExtractError> {
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| parse_err("container", e))?;
    let names: Vec<&str> = archive.file_names().take(max_entries).collect();
    Ok(format!("Archive contents: {}", names.join(", ")))
}

#[cfg(feature = "office")]
fn parse_err(format: &'static str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Parse {
        format,
        message: e.to_string(),
    }
}

#[cfg(not(feature = "office"))]
pub(crate) fn extract_docx(
    _path: &Path,
    _cfg: &ExtractionConfig,
) -> Result<(String, ExtractionMethod), ExtractError> {
    Err(ExtractError::CapabilityMissing("office"))
}

#[cfg(not(feature = "office"))]
pub(crate) fn extract_pptx(
    _path: &Path,
    _cfg: &ExtractionConfig,
) -> Result<(String, ExtractionMethod), ExtractError> {
    Err(ExtractError::CapabilityMissing("office"))
}

/// Scavenges printable runs out of a legacy OLE document prefix. Both
/// single-byte and UTF-16LE runs appear in .doc bodies.
pub(crate) fn extract_doc_legacy(path: &Path, max_bytes: usize) -> Result<String, ExtractError> {
    let bytes = super::text::read_bounded_bytes(path, max_bytes)?;
    let mut runs: Vec<String> = Vec::new();

    // Single-byte printable runs.
    let mut current = String::new();
    for &b in &bytes {
        if (0x20..0x7F).contains(&b) {
            current.push(b as char);
        } else if current.len() >= MIN_RUN_LEN {
            runs.push(std::mem::take(&mut current));
        } else {
            current.clear();
        }
    }
    if current.len() >= MIN_RUN_LEN {
        runs.push(current);
    }

    // UTF-16LE runs (ASCII range only; that covers .doc body text).
    let mut wide = String::new();
    for pair in bytes.chunks_exact(2) {
        let code = u16::from_le_bytes([pair[0], pair[1]]);
        if (0x20..0x7F).contains(&code) {
            wide.push(code as u8 as char);
        } else if wide.len() >= MIN_RUN_LEN {
            runs.push(std::mem::take(&mut wide));
        } else {
            wide.clear();
        }
    }
    if wide.len() >= MIN_RUN_LEN {
        runs.push(wide);
    }

    // Keep runs that look like prose, not field codes.
    runs.retain(|r| r.chars().filter(|c| c.is_alphabetic()).count() * 2 >= r.len());
    Ok(runs.join(" "))
}

const MIN_RUN_LEN: usize = 6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_doc_scavenges_wide_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.doc");
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0u8; 32]);
        for ch in "Meeting notes from the quarterly review".encode_utf16() {
            bytes.extend_from_slice(&ch.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 32]);
        std::fs::write(&path, &bytes).unwrap();

        let out = extract_doc_legacy(&path, 64 * 1024).unwrap();
        assert!(out.contains("Meeting notes"), "got: {out}");
    }

    #[test]
    fn legacy_doc_drops_binary_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.doc");
        // Pseudo-random bytes: printable runs stay far below the minimum
        // run length.
        let mut state = 0x12345678u32;
        let bytes: Vec<u8> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();
        std::fs::write(&path, &bytes).unwrap();
        let out = extract_doc_legacy(&path, 64 * 1024).unwrap();
        assert!(out.len() < 200, "got: {out}");
    }

    #[cfg(feature = "office")]
    #[test]
    fn docx_tag_strip_reads_document_xml() {
        use std::io::Write;
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let opts = zip::write::FileOptions::default();
            writer.start_file("word/document.xml", opts).unwrap();
            writer
                .write_all(
                    br#"<?xml version="1.0"?><w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>Invoice for services</w:t></w:r></w:p></w:body></w:document>"#,
                )
                .unwrap();
            writer.finish().unwrap();
        }
        let text = docx_tag_strip(cursor.get_ref()).unwrap();
        assert!(text.contains("Invoice for services"));
    }
}
