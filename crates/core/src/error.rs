//! Typed errors for the analysis pipeline.

use providers::ProviderError;
use thiserror::Error;

/// Per-format extraction failure. Carries enough context for a caller to
/// explain a degraded result to the user.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file exceeds the size limit ({size} > {limit} bytes)")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("{format} extraction timed out after {budget_secs}s")]
    Timeout {
        format: &'static str,
        budget_secs: u64,
    },

    #[error("unsupported format: .{0}")]
    Unsupported(String),

    #[error("{format} parse failed: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("the {0} extractor is not enabled in this build")]
    CapabilityMissing(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// User-facing hint attached to degraded results.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ExtractError::SizeExceeded { .. } => {
                "file is too large to analyze; it was categorized by name only"
            }
            ExtractError::Timeout { .. } => {
                "extraction took too long; try again or categorize manually"
            }
            ExtractError::Unsupported(_) => {
                "this file type cannot be read; it was categorized by name only"
            }
            ExtractError::Parse { .. } => {
                "the file appears corrupted or in an unexpected format"
            }
            ExtractError::CapabilityMissing(_) => {
                "rebuild with the matching feature enabled to analyze this file type"
            }
            ExtractError::Io(_) => "the file could not be read; check permissions",
        }
    }
}

/// Backend-side failure. Parse problems are recovered inside the analysis
/// client (repair-then-degrade); what escapes here resolves to the
/// heuristic fallback path, never to a caller-visible panic.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("backend unreachable after {attempts} attempts")]
    BackendUnavailable { attempts: u32 },

    #[error("could not parse model output: {0}")]
    Parse(String),

    #[error("{stage} exceeded its {budget_secs}s budget")]
    Timeout {
        stage: &'static str,
        budget_secs: u64,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Vector-index failures, kept separate so refinement call-sites can swallow
/// them without touching the backend taxonomy.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("vector index initialization timed out after {budget_secs}s")]
    InitTimeout { budget_secs: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
