//! Plain-text and markup extraction.

use crate::error::ExtractError;
use std::io::Read;
use std::path::Path;

/// Streams at most `max_bytes` from the file in fixed chunks, terminating
/// early at the cap. Large files are never fully buffered.
pub(crate) fn read_bounded_bytes(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ExtractError> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
    let mut chunk = [0u8; 8 * 1024];
    while buf.len() < max_bytes {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let take = n.min(max_bytes - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }
    Ok(buf)
}

pub(crate) fn read_bounded_text(path: &Path, max_bytes: usize) -> Result<String, ExtractError> {
    let buf = read_bounded_bytes(path, max_bytes)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Strips tags from HTML/XML, keeping text content. Tolerant of the tag
/// soup real pages contain: reader errors end the walk instead of failing
/// the extraction, since partial text is still useful for classification.
pub(crate) fn strip_markup(input: &str) -> String {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_str(input);
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"script" | b"style") {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if matches!(e.local_name().as_ref(), b"script" | b"style") {
                    skip_depth = skip_depth.saturating_sub(1);
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if skip_depth == 0 => {
                if let Ok(text) = t.unescape() {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(trimmed);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_read_stops_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        std::fs::write(&path, "x".repeat(100_000)).unwrap();
        let out = read_bounded_text(&path, 1_000).unwrap();
        assert_eq!(out.len(), 1_000);
    }

    #[test]
    fn strips_tags_and_skips_scripts() {
        let html = "<html><head><script>var x = 1;</script></head>\
                    <body><p>Hello <b>world</b></p></body></html>";
        let out = strip_markup(html);
        assert_eq!(out, "Hello world");
    }

    #[test]
    fn malformed_markup_yields_partial_text() {
        let html = "<p>first part</p><p>second <unclosed";
        let out = strip_markup(html);
        assert!(out.contains("first part"));
    }
}
