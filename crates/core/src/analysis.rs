//! Analysis backend client: builds the classification prompt, invokes
//! generation with dedup and a hard deadline, repairs the returned JSON,
//! and normalizes the result into the `AnalysisResult` contract.

use crate::deadline::with_deadline;
use crate::fallback;
use crate::models::{
    AnalysisResult, ExtractionMethod, FileHandle, SmartFolder, DEFAULT_CATEGORY,
};
use providers::{GenerateOptions, GenerationProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

/// Confidence assigned when the model responded but its output could not be
/// salvaged.
const DEGRADED_CONFIDENCE: u8 = 30;

/// Cloneable failure shared across deduplicated callers. Both variants
/// resolve to the heuristic fallback upstream.
#[derive(Debug, Clone)]
pub enum AnalysisFailure {
    Unavailable(String),
    TimedOut(u64),
}

impl std::fmt::Display for AnalysisFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisFailure::Unavailable(msg) => write!(f, "backend unavailable: {}", msg),
            AnalysisFailure::TimedOut(secs) => write!(f, "generation exceeded {}s budget", secs),
        }
    }
}

type SharedOutcome = Arc<OnceCell<Result<AnalysisResult, AnalysisFailure>>>;

pub struct AnalysisClient {
    provider: Arc<dyn GenerationProvider>,
    budget: Duration,
    preflight_attempts: u32,
    preflight_delay: Duration,
    min_heuristic_score: f32,
    inflight: Mutex<HashMap<String, SharedOutcome>>,
}

impl AnalysisClient {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        budget: Duration,
        preflight_attempts: u32,
        preflight_delay: Duration,
        min_heuristic_score: f32,
    ) -> Self {
        Self {
            provider,
            budget,
            preflight_attempts,
            preflight_delay,
            min_heuristic_score,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Short-retry liveness probe, run before any extraction work.
    pub async fn preflight(&self) -> bool {
        for attempt in 0..self.preflight_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.preflight_delay).await;
            }
            if self.provider.heartbeat().await.is_ok() {
                return true;
            }
        }
        false
    }

    /// Classifies extracted text. Identical (content, model, folder-set)
    /// requests in flight share one backend invocation; every caller
    /// observes the same outcome. Model-level faults degrade, they do not
    /// fail — only transport-level unavailability/timeout surfaces as `Err`.
    pub async fn analyze(
        &self,
        text: &str,
        handle: &FileHandle,
        folders: &[SmartFolder],
        method: ExtractionMethod,
    ) -> Result<AnalysisResult, AnalysisFailure> {
        let key = dedup_key(text, self.provider.model(), folders);
        let cell: SharedOutcome = {
            let mut map = self.inflight.lock().await;
            map.entry(key.clone()).or_default().clone()
        };
        let outcome = cell
            .get_or_init(|| self.analyze_inner(text, handle, folders, method))
            .await
            .clone();
        self.inflight.lock().await.remove(&key);
        outcome
    }

    async fn analyze_inner(
        &self,
        text: &str,
        handle: &FileHandle,
        folders: &[SmartFolder],
        method: ExtractionMethod,
    ) -> Result<AnalysisResult, AnalysisFailure> {
        let prompt = build_prompt(handle.file_name(), text, folders);
        let options = GenerateOptions {
            temperature: Some(0.1),
            max_tokens: Some(600),
            json: true,
        };

        // The provider retries transient failures internally; the deadline
        // bounds the whole retried call.
        let generated = with_deadline(
            self.budget,
            || AnalysisFailure::TimedOut(self.budget.as_secs()),
            async {
                self.provider
                    .generate(&prompt, &options)
                    .await
                    .map_err(|e| AnalysisFailure::Unavailable(e.to_string()))
            },
        )
        .await?;

        match parse_model_json(&generated.response) {
            Ok(value) => Ok(normalize_result(&value, handle, folders, method)),
            Err(parse_err) => {
                warn!(file = %handle.file_name(), error = %parse_err, "model output unusable, degrading");
                Ok(self.degraded_result(handle, folders, method, parse_err))
            }
        }
    }

    /// Fixed low-confidence error result for unusable model output. The
    /// category still comes from the deterministic classifier so the
    /// folder contract holds.
    fn degraded_result(
        &self,
        handle: &FileHandle,
        folders: &[SmartFolder],
        method: ExtractionMethod,
        parse_err: String,
    ) -> AnalysisResult {
        let mut result = fallback::classify_by_name(
            handle.file_name(),
            &handle.extension,
            folders,
            self.min_heuristic_score,
        );
        result.confidence = DEGRADED_CONFIDENCE;
        result.extraction_method = method;
        result.error = Some(format!("model output unusable: {}", parse_err));
        result
    }
}

/// Canonical folder-set signature: names sorted, case preserved.
pub fn folder_signature(folders: &[SmartFolder]) -> String {
    let mut names: Vec<&str> = folders.iter().map(|f| f.name.as_str()).collect();
    names.sort_unstable();
    names.join("\u{1f}")
}

fn dedup_key(text: &str, model: &str, folders: &[SmartFolder]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model.as_bytes());
    hasher.update(&[0]);
    hasher.update(folder_signature(folders).as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn build_prompt(file_name: &str, text: &str, folders: &[SmartFolder]) -> String {
    let mut prompt = String::from(
        "You are a file-organization assistant. Analyze the document below and \
         respond with a single JSON object and nothing else.\n\
         Required schema:\n\
         {\"category\": string, \"keywords\": [3-10 short strings], \
         \"confidence\": integer 0-100, \"suggestedName\": string, \
         \"purpose\": one-sentence summary, \"date\": \"YYYY-MM-DD\" or null, \
         \"entities\": [strings]}\n",
    );
    if !folders.is_empty() {
        prompt.push_str("Choose \"category\" EXACTLY from this list, copied verbatim: ");
        for (i, folder) in folders.iter().enumerate() {
            if i > 0 {
                prompt.push_str(", ");
            }
            prompt.push('"');
            prompt.push_str(&folder.name);
            prompt.push('"');
            if !folder.description.is_empty() {
                prompt.push_str(" (");
                prompt.push_str(&folder.description);
                prompt.push(')');
            }
        }
        prompt.push_str(". Do not invent a category.\n");
    }
    prompt.push_str("File name: ");
    prompt.push_str(file_name);
    prompt.push_str("\nDocument content:\n");
    prompt.push_str(text);
    prompt
}

/// Repair ladder for model output: strict parse → strip code fences →
/// balanced-brace extraction → give up. The producer is unreliable by
/// nature; minor formatting faults must not cost an analysis.
pub fn parse_model_json(raw: &str) -> Result<serde_json::Value, String> {
    let trimmed = raw.trim();

    if let Some(value) = try_object(trimmed) {
        return Ok(value);
    }
    if let Some(inner) = strip_fences(trimmed) {
        if let Some(value) = try_object(inner.trim()) {
            return Ok(value);
        }
    }
    if let Some(slice) = extract_braced(trimmed) {
        if let Some(value) = try_object(slice) {
            return Ok(value);
        }
    }
    Err("no JSON object found in model output".to_string())
}

fn try_object(candidate: &str) -> Option<serde_json::Value> {
    serde_json::from_str::<serde_json::Value>(candidate)
        .ok()
        .filter(|v| v.is_object())
}

fn strip_fences(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Returns the first balanced `{…}` slice, string- and escape-aware.
fn extract_braced(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalizes a parsed model object into the result contract: verbatim
/// category matching, string-only keywords, deterministic confidence, and
/// calendar-form dates defaulting to the file's own mtime.
pub fn normalize_result(
    value: &serde_json::Value,
    handle: &FileHandle,
    folders: &[SmartFolder],
    method: ExtractionMethod,
) -> AnalysisResult {
    let raw_category = value
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();
    let category = normalize_category(raw_category, folders);

    let mut keywords: Vec<String> = value
        .get("keywords")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .map(|s| s.chars().take(48).collect())
                .collect()
        })
        .unwrap_or_default();
    dedup_preserving_order(&mut keywords);
    keywords.truncate(10);
    if keywords.len() < 3 {
        for token in filename_tokens(handle.file_name()) {
            if keywords.len() >= 3 {
                break;
            }
            if !keywords.contains(&token) {
                keywords.push(token);
            }
        }
    }

    let purpose = string_field(value, &["purpose", "summary"]);
    let suggested_name = string_field(value, &["suggestedName", "suggested_name"])
        .map(|s| sanitize_name(&s))
        .filter(|s| !s.is_empty());
    let entities: Vec<String> = value
        .get("entities")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(16)
                .collect()
        })
        .unwrap_or_default();

    let confidence = match model_confidence(value) {
        Some(c) => c,
        // Recomputed deterministically so vacuous fields cannot inflate it.
        None => recompute_confidence(&keywords, &purpose, &suggested_name, &entities),
    };

    let date = value
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(parse_calendar_date)
        .unwrap_or_else(|| handle.mtime_date());

    AnalysisResult {
        category,
        keywords,
        confidence,
        suggested_name,
        purpose,
        date: Some(date),
        entities,
        extraction_method: method,
        folder_matches: vec![],
        error: None,
    }
}

fn normalize_category(raw: &str, folders: &[SmartFolder]) -> String {
    if folders.is_empty() {
        return if raw.is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            raw.to_string()
        };
    }
    folders
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(raw))
        .map(|f| f.name.clone())
        .unwrap_or_else(|| {
            debug!(category = raw, "model category not in folder set");
            DEFAULT_CATEGORY.to_string()
        })
}

fn model_confidence(value: &serde_json::Value) -> Option<u8> {
    let n = match value.get("confidence") {
        Some(serde_json::Value::Number(n)) => n.as_f64()?,
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && (0.0..=100.0).contains(&n)).then(|| n.round() as u8)
}

fn recompute_confidence(
    keywords: &[String],
    purpose: &Option<String>,
    suggested_name: &Option<String>,
    entities: &[String],
) -> u8 {
    let mut score = 55u8;
    if keywords.len() >= 3 {
        score += 10;
    }
    if purpose.is_some() {
        score += 10;
    }
    if suggested_name.is_some() {
        score += 10;
    }
    if !entities.is_empty() {
        score += 5;
    }
    score.min(90)
}

fn string_field(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(k))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .take(120)
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_calendar_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return None;
    }
    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%B %d, %Y", "%b %d, %Y"];
    for fmt in FORMATS {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, fmt) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    None
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

fn filename_tokens(file_name: &str) -> Vec<String> {
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    stem.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && !t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::{GenerateResponse, ProviderError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn handle() -> FileHandle {
        FileHandle {
            path: "/tmp/budget.xlsx".into(),
            extension: "xlsx".into(),
            size: 10,
            mtime: 1_700_000_000,
        }
    }

    fn folders() -> Vec<SmartFolder> {
        ["Finance", "HR"]
            .iter()
            .map(|n| SmartFolder {
                name: n.to_string(),
                description: String::new(),
                path: String::new(),
                keywords: vec![],
                tags: vec![],
            })
            .collect()
    }

    #[test]
    fn strict_json_parses() {
        let v = parse_model_json(r#"{"category": "Finance"}"#).unwrap();
        assert_eq!(v["category"], "Finance");
    }

    #[test]
    fn fenced_json_is_repaired() {
        let raw = "Here you go:\n```json\n{\"category\": \"Finance\"}\n```\nanything else?";
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["category"], "Finance");
    }

    #[test]
    fn stray_text_around_braces_is_repaired() {
        let raw = "Sure! {\"category\": \"HR\", \"note\": \"has { nested } text\"} hope that helps";
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["category"], "HR");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let raw = r#"prefix {"a": "}{", "b": 1} suffix"#;
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["b"], 1);
    }

    #[test]
    fn hopeless_output_gives_up() {
        assert!(parse_model_json("I cannot classify this file.").is_err());
        assert!(parse_model_json("[1, 2, 3]").is_err());
    }

    #[test]
    fn category_is_matched_verbatim_case_insensitively() {
        let value = serde_json::json!({"category": "finance", "keywords": ["a", "b", "c"]});
        let result = normalize_result(&value, &handle(), &folders(), ExtractionMethod::Content);
        assert_eq!(result.category, "Finance");
    }

    #[test]
    fn invented_category_is_not_kept() {
        let value = serde_json::json!({"category": "Cool Stuff"});
        let result = normalize_result(&value, &handle(), &folders(), ExtractionMethod::Content);
        assert_eq!(result.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn keywords_are_filtered_to_strings() {
        let value = serde_json::json!({
            "category": "Finance",
            "keywords": ["Budget", 42, null, "budget", "  ", "rows"]
        });
        let result = normalize_result(&value, &handle(), &folders(), ExtractionMethod::Content);
        assert!(result.keywords.contains(&"budget".to_string()));
        assert!(result.keywords.contains(&"rows".to_string()));
        assert!(!result.keywords.iter().any(|k| k == "42"));
        // Deduplicated: "Budget" and "budget" collapse.
        assert_eq!(result.keywords.iter().filter(|k| *k == "budget").count(), 1);
    }

    #[test]
    fn out_of_range_confidence_is_recomputed() {
        let value = serde_json::json!({
            "category": "Finance",
            "confidence": 250,
            "keywords": ["a", "b", "c"],
            "purpose": "quarterly budget",
            "suggestedName": "budget-q3",
        });
        let result = normalize_result(&value, &handle(), &folders(), ExtractionMethod::Content);
        assert_eq!(result.confidence, 85); // 55 + 10 + 10 + 10, capped below certainty
    }

    #[test]
    fn valid_model_confidence_is_kept() {
        let value = serde_json::json!({"category": "Finance", "confidence": 72});
        let result = normalize_result(&value, &handle(), &folders(), ExtractionMethod::Content);
        assert_eq!(result.confidence, 72);
    }

    #[test]
    fn missing_date_defaults_to_file_mtime() {
        let value = serde_json::json!({"category": "Finance"});
        let result = normalize_result(&value, &handle(), &folders(), ExtractionMethod::Content);
        assert_eq!(result.date.as_deref(), Some("2023-11-14"));
    }

    #[test]
    fn model_dates_are_normalized_to_calendar_form() {
        assert_eq!(parse_calendar_date("2024/03/09").as_deref(), Some("2024-03-09"));
        assert_eq!(
            parse_calendar_date("March 9, 2024").as_deref(),
            Some("2024-03-09")
        );
        assert_eq!(parse_calendar_date("not a date"), None);
    }

    struct CountingProvider {
        calls: AtomicU32,
        response: String,
        delay_ms: u64,
    }

    #[async_trait::async_trait]
    impl GenerationProvider for CountingProvider {
        fn model(&self) -> &str {
            "mock"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<GenerateResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(GenerateResponse {
                response: self.response.clone(),
            })
        }

        async fn heartbeat(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn client(provider: Arc<dyn GenerationProvider>) -> AnalysisClient {
        AnalysisClient::new(
            provider,
            Duration::from_secs(5),
            2,
            Duration::from_millis(10),
            5.0,
        )
    }

    #[tokio::test]
    async fn concurrent_identical_requests_share_one_call() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            response: r#"{"category": "Finance", "keywords": ["x", "y", "z"]}"#.into(),
            delay_ms: 50,
        });
        let client = client(provider.clone());
        let h = handle();
        let f = folders();

        let (a, b) = tokio::join!(
            client.analyze("same text", &h, &f, ExtractionMethod::Content),
            client.analyze("same text", &h, &f, ExtractionMethod::Content),
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn different_text_is_not_deduplicated() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            response: r#"{"category": "Finance"}"#.into(),
            delay_ms: 10,
        });
        let client = client(provider.clone());
        let h = handle();
        let f = folders();

        let (_, _) = tokio::join!(
            client.analyze("text one", &h, &f, ExtractionMethod::Content),
            client.analyze("text two", &h, &f, ExtractionMethod::Content),
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unusable_output_degrades_instead_of_failing() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            response: "I refuse to answer in JSON.".into(),
            delay_ms: 0,
        });
        let client = client(provider);
        let result = client
            .analyze("text", &handle(), &folders(), ExtractionMethod::Content)
            .await
            .unwrap();
        assert_eq!(result.confidence, DEGRADED_CONFIDENCE);
        assert!(result.error.as_deref().unwrap().contains("unusable"));
        assert!(!result.category.is_empty());
    }

    #[tokio::test]
    async fn slow_backend_times_out_into_failure() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            response: r#"{"category": "Finance"}"#.into(),
            delay_ms: 5_000,
        });
        let client = AnalysisClient::new(
            provider,
            Duration::from_millis(50),
            1,
            Duration::from_millis(1),
            5.0,
        );
        let err = client
            .analyze("text", &handle(), &folders(), ExtractionMethod::Content)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisFailure::TimedOut(_)));
    }

    #[test]
    fn folder_signature_is_order_independent() {
        let mut a = folders();
        a.reverse();
        assert_eq!(folder_signature(&a), folder_signature(&folders()));
    }
}
