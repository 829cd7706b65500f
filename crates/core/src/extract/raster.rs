//! Image handling: metadata summaries and the OCR path.
//!
//! OCR runs under stricter caps than ordinary extraction: the raster is
//! downscaled to a bounded dimension before recognition, and scanned-PDF
//! rasters are only pulled from DCT-encoded (JPEG) streams.

use crate::config::{ExtractionConfig, OcrConfig};
use crate::error::ExtractError;
use crate::extract::Capabilities;
use crate::models::ExtractionMethod;
use std::path::Path;

pub(crate) fn extract_image(
    path: &Path,
    size: u64,
    cfg: &ExtractionConfig,
    caps: Capabilities,
) -> Result<(String, ExtractionMethod), ExtractError> {
    let mut sections: Vec<String> = Vec::new();
    let mut method = ExtractionMethod::Content;

    if caps.ocr && size <= cfg.ocr.max_file_bytes {
        // OCR failure on a photo is routine; the metadata path still runs.
        if let Ok(text) = ocr_image(path, &cfg.ocr) {
            if !text.trim().is_empty() {
                sections.push(text);
                method = ExtractionMethod::Ocr;
            }
        }
    }

    if caps.exif {
        if let Some(summary) = exif_summary(path) {
            sections.push(summary);
        }
    }

    #[cfg(feature = "image-meta")]
    if let Ok((w, h)) = image::image_dimensions(path) {
        sections.push(format!("Image dimensions: {}x{}", w, h));
    }

    Ok((sections.join("\n"), method))
}

#[cfg(feature = "exif")]
fn exif_summary(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let data = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let parts: Vec<String> = data
        .fields()
        .take(32)
        .map(|f| format!("{}: {}", f.tag, f.display_value().with_unit(&data)))
        .collect();
    (!parts.is_empty()).then(|| format!("Image metadata: {}", parts.join("; ")))
}

#[cfg(not(feature = "exif"))]
fn exif_summary(_path: &Path) -> Option<String> {
    None
}

#[cfg(feature = "ocr")]
fn ocr_image(path: &Path, cfg: &OcrConfig) -> Result<String, ExtractError> {
    let img = image::open(path).map_err(|e| ExtractError::Parse {
        format: "image",
        message: e.to_string(),
    })?;
    ocr_dynamic_image(img, cfg)
}

#[cfg(not(feature = "ocr"))]
fn ocr_image(_path: &Path, _cfg: &OcrConfig) -> Result<String, ExtractError> {
    Err(ExtractError::CapabilityMissing("ocr"))
}

#[cfg(feature = "ocr")]
fn ocr_dynamic_image(img: image::DynamicImage, cfg: &OcrConfig) -> Result<String, ExtractError> {
    let ocr_err = |e: &dyn std::fmt::Display| ExtractError::Parse {
        format: "ocr",
        message: e.to_string(),
    };

    let img = if img.width() > cfg.max_dimension || img.height() > cfg.max_dimension {
        img.thumbnail(cfg.max_dimension, cfg.max_dimension)
    } else {
        img
    };

    let mut png = std::io::Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageOutputFormat::Png)
        .map_err(|e| ocr_err(&e))?;

    let mut tess = leptess::LepTess::new(None, "eng").map_err(|e| ocr_err(&e))?;
    tess.set_image_from_mem(png.get_ref())
        .map_err(|e| ocr_err(&e))?;
    tess.get_utf8_text().map_err(|e| ocr_err(&e))
}

/// Pulls the largest JPEG-encoded raster out of the PDF and recognizes it.
/// Returns empty text when no usable raster exists, which the caller treats
/// as "OCR not applicable".
#[cfg(all(feature = "ocr", feature = "pdf"))]
pub(crate) fn ocr_pdf(path: &Path, cfg: &OcrConfig) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load(path).map_err(|e| ExtractError::Parse {
        format: "pdf",
        message: e.to_string(),
    })?;

    let mut best: Option<Vec<u8>> = None;
    for object in doc.objects.values() {
        if let lopdf::Object::Stream(stream) = object {
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(|o| o.as_name())
                .map(|n| n == b"Image")
                .unwrap_or(false);
            let is_dct = stream
                .dict
                .get(b"Filter")
                .map(filter_contains_dct)
                .unwrap_or(false);
            if is_image && is_dct && best.as_ref().map(|b| stream.content.len() > b.len()).unwrap_or(true)
            {
                best = Some(stream.content.clone());
            }
        }
    }

    let Some(jpeg) = best else {
        return Ok(String::new());
    };
    let img = image::load_from_memory(&jpeg).map_err(|e| ExtractError::Parse {
        format: "ocr",
        message: e.to_string(),
    })?;
    ocr_dynamic_image(img, cfg)
}

#[cfg(all(feature = "ocr", feature = "pdf"))]
fn filter_contains_dct(obj: &lopdf::Object) -> bool {
    match obj {
        lopdf::Object::Name(name) => name == b"DCTDecode",
        lopdf::Object::Array(items) => items
            .iter()
            .any(|o| o.as_name().map(|n| n == b"DCTDecode").unwrap_or(false)),
        _ => false,
    }
}

#[cfg(not(all(feature = "ocr", feature = "pdf")))]
pub(crate) fn ocr_pdf(_path: &Path, _cfg: &OcrConfig) -> Result<String, ExtractError> {
    Ok(String::new())
}
