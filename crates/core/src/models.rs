//! Data types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Category used when nothing better can be determined. Every branch of the
/// pipeline converges to a non-empty category.
pub const DEFAULT_CATEGORY: &str = "Documents";

/// Immutable snapshot of a file, taken once per analysis attempt. The
/// size/mtime pair forms the cache signature and detects mutation during
/// analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    /// Lowercased extension without the dot; empty when absent.
    pub extension: String,
    pub size: u64,
    /// Modification time, unix seconds.
    pub mtime: i64,
}

impl FileHandle {
    pub async fn snapshot(path: &Path) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default(),
            size: meta.len(),
            mtime: mtime_secs(&meta),
        })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }

    /// Re-stats the file and reports whether size and mtime are unchanged
    /// since the snapshot. A missing file counts as changed.
    pub async fn still_matches(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == self.size && mtime_secs(&meta) == self.mtime,
            Err(_) => false,
        }
    }

    /// The file's own modification date, calendar form. Used as the default
    /// when the model reports none.
    pub fn mtime_date(&self) -> String {
        chrono::DateTime::from_timestamp(self.mtime, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "1970-01-01".to_string())
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// How the text used for classification was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    Content,
    Ocr,
    ArchiveMetadata,
    FilenameOnly,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExtractionMethod::Content => "content",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::ArchiveMetadata => "archive-metadata",
            ExtractionMethod::FilenameOnly => "filename-only",
        };
        f.write_str(s)
    }
}

/// Bounded plain text plus its provenance. Dropped by the orchestrator as
/// soon as the backend call completes to bound peak memory on large
/// documents.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
}

impl ExtractedText {
    pub fn new(text: String, method: ExtractionMethod) -> Self {
        Self { text, method }
    }
}

/// User-defined target category. Supplied per call by the
/// folder-configuration collaborator; never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartFolder {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One ranked folder candidate. Scores are in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderMatch {
    pub folder: String,
    pub score: f32,
}

/// The single externally-visible contract of the pipeline. Every branch —
/// backend, cache hit, heuristic fallback — converges to this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub category: String,
    pub keywords: Vec<String>,
    /// 0–100.
    pub confidence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Calendar form, `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    pub extraction_method: ExtractionMethod,
    /// Full candidate list, attached for display/audit even when the
    /// backend category was kept.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub folder_matches: Vec<FolderMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Deferred vector-index persistence emission, consumed by the write-back
/// queue. Full replacement per id, last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBackRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub meta: serde_json::Value,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_camel_case() {
        let result = AnalysisResult {
            category: "Finance".into(),
            keywords: vec!["invoice".into()],
            confidence: 80,
            suggested_name: Some("invoice-2024".into()),
            purpose: None,
            date: None,
            entities: vec![],
            extraction_method: ExtractionMethod::Content,
            folder_matches: vec![],
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["suggestedName"], "invoice-2024");
        assert_eq!(json["extractionMethod"], "content");
        assert!(json.get("purpose").is_none());
    }

    #[tokio::test]
    async fn snapshot_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "one").await.unwrap();
        let handle = FileHandle::snapshot(&path).await.unwrap();
        assert!(handle.still_matches().await);

        tokio::fs::write(&path, "a longer body").await.unwrap();
        assert!(!handle.still_matches().await);
    }
}
