//! Spreadsheet extraction via calamine, with capped sheets and rows.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use std::path::Path;

#[cfg(feature = "office")]
pub(crate) fn extract_sheet(path: &Path, cfg: &ExtractionConfig) -> Result<String, ExtractError> {
    use calamine::{open_workbook_auto, DataType, Reader};

    let mut workbook = open_workbook_auto(path).map_err(|e| ExtractError::Parse {
        format: "spreadsheet",
        message: e.to_string(),
    })?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_owned();
    let mut out = String::new();
    for name in sheet_names.iter().take(cfg.max_sheets) {
        let range = match workbook.worksheet_range(name) {
            Some(Ok(range)) => range,
            // A broken sheet does not fail the workbook.
            Some(Err(_)) | None => continue,
        };
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("Sheet: ");
        out.push_str(name);
        for row in range.rows().take(cfg.max_sheet_rows) {
            let cells: Vec<String> = row
                .iter()
                .filter_map(|cell| match cell {
                    DataType::Empty => None,
                    DataType::String(s) => {
                        let s = s.trim();
                        (!s.is_empty()).then(|| s.to_string())
                    }
                    other => Some(other.to_string()),
                })
                .collect();
            if !cells.is_empty() {
                out.push('\n');
                out.push_str(&cells.join(", "));
            }
        }
    }
    Ok(out)
}

#[cfg(not(feature = "office"))]
pub(crate) fn extract_sheet(_path: &Path, _cfg: &ExtractionConfig) -> Result<String, ExtractError> {
    Err(ExtractError::CapabilityMissing("office"))
}
