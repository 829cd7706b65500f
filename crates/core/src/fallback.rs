//! Deterministic filename/extension classifier. Runs with zero network
//! calls; it is the terminal branch of every degraded path, so it must
//! always produce a non-empty category.

use crate::models::{AnalysisResult, ExtractionMethod, SmartFolder, DEFAULT_CATEGORY};

/// Extension concepts: a file extension votes for folders whose name or
/// description evokes the concept words.
const EXT_CONCEPTS: &[(&[&str], &[&str])] = &[
    (
        &["stl", "obj", "3mf", "gcode", "step", "stp"],
        &["3d", "print", "printing", "model", "cad"],
    ),
    (
        &["psd", "ai", "fig", "sketch", "xcf"],
        &["design", "art", "graphic", "creative"],
    ),
    (
        &["rs", "py", "js", "ts", "go", "java", "c", "cpp", "sh"],
        &["code", "source", "dev", "project", "software"],
    ),
    (
        &["jpg", "jpeg", "png", "heic", "raw", "tiff"],
        &["photo", "picture", "image", "camera"],
    ),
    (
        &["xls", "xlsx", "csv"],
        &["finance", "budget", "accounting", "data", "report"],
    ),
];

/// Topical keyword table, tried when no configured folder scores high
/// enough.
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Financial",
        &[
            "invoice", "receipt", "budget", "tax", "statement", "payroll", "expense", "bank",
            "payment",
        ],
    ),
    (
        "Legal",
        &["contract", "agreement", "nda", "license", "terms", "policy", "compliance"],
    ),
    (
        "Projects",
        &["project", "proposal", "plan", "roadmap", "milestone", "sprint"],
    ),
    (
        "Personal",
        &["family", "vacation", "holiday", "birthday", "recipe", "wedding"],
    ),
    (
        "Technical",
        &["manual", "guide", "api", "config", "readme", "setup", "install", "spec"],
    ),
    (
        "Research",
        &["paper", "study", "thesis", "analysis", "survey", "abstract", "journal"],
    ),
    (
        "Marketing",
        &["campaign", "brand", "social", "newsletter", "press", "promo"],
    ),
    (
        "HR",
        &["resume", "cv", "offer", "onboarding", "benefits", "employee", "interview"],
    ),
];

/// Last resort: extension → category.
const EXT_CATEGORIES: &[(&str, &str)] = &[
    ("pdf", "Documents"),
    ("doc", "Documents"),
    ("docx", "Documents"),
    ("odt", "Documents"),
    ("txt", "Documents"),
    ("md", "Documents"),
    ("rtf", "Documents"),
    ("xls", "Spreadsheets"),
    ("xlsx", "Spreadsheets"),
    ("ods", "Spreadsheets"),
    ("csv", "Spreadsheets"),
    ("ppt", "Presentations"),
    ("pptx", "Presentations"),
    ("key", "Presentations"),
    ("jpg", "Images"),
    ("jpeg", "Images"),
    ("png", "Images"),
    ("gif", "Images"),
    ("heic", "Images"),
    ("tiff", "Images"),
    ("bmp", "Images"),
    ("webp", "Images"),
    ("svg", "Images"),
    ("mp3", "Audio"),
    ("wav", "Audio"),
    ("flac", "Audio"),
    ("m4a", "Audio"),
    ("mp4", "Video"),
    ("mov", "Video"),
    ("avi", "Video"),
    ("mkv", "Video"),
    ("webm", "Video"),
    ("zip", "Archives"),
    ("rar", "Archives"),
    ("7z", "Archives"),
    ("tar", "Archives"),
    ("gz", "Archives"),
    ("stl", "3D Models"),
    ("obj", "3D Models"),
    ("3mf", "3D Models"),
    ("gcode", "3D Models"),
    ("rs", "Code"),
    ("py", "Code"),
    ("js", "Code"),
    ("ts", "Code"),
    ("go", "Code"),
    ("java", "Code"),
    ("exe", "Applications"),
    ("dmg", "Applications"),
    ("msi", "Applications"),
];

/// Classifies from the filename alone. Pure: identical inputs always yield
/// identical outputs.
pub fn classify_by_name(
    file_name: &str,
    extension: &str,
    folders: &[SmartFolder],
    min_score: f32,
) -> AnalysisResult {
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name)
        .to_lowercase();
    let ext = extension.to_lowercase();

    let mut keywords = name_tokens(&stem);

    // 1. Weighted scoring against the configured folders.
    let mut best: Option<(&SmartFolder, f32)> = None;
    for folder in folders {
        let score = score_folder(&stem, &ext, folder);
        if score >= min_score && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((folder, score));
        }
    }
    if let Some((folder, _)) = best {
        keywords.truncate(5);
        return build(folder.name.clone(), keywords, 70);
    }

    // 2. Topical keyword table.
    for (category, words) in TOPIC_KEYWORDS {
        if let Some(hit) = words.iter().find(|w| stem.contains(**w)) {
            if !keywords.iter().any(|k| k == hit) {
                keywords.insert(0, (*hit).to_string());
            }
            keywords.truncate(5);
            return build((*category).to_string(), keywords, 65);
        }
    }

    // 3. Extension lookup, then the built-in default.
    let category = EXT_CATEGORIES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, c)| (*c).to_string())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    keywords.truncate(5);
    build(category, keywords, 60)
}

fn build(category: String, mut keywords: Vec<String>, confidence: u8) -> AnalysisResult {
    if keywords.is_empty() {
        keywords.push("file".to_string());
    }
    AnalysisResult {
        category,
        keywords,
        confidence,
        suggested_name: None,
        purpose: None,
        date: None,
        entities: vec![],
        extraction_method: ExtractionMethod::FilenameOnly,
        folder_matches: vec![],
        error: None,
    }
}

fn score_folder(stem: &str, ext: &str, folder: &SmartFolder) -> f32 {
    let mut score = 0.0f32;
    let name = folder.name.to_lowercase();

    let stem = stem.trim();
    if !name.is_empty() && !stem.is_empty() && (stem.contains(&name) || name.contains(stem)) {
        score += 10.0;
    }
    for token in tokenize(&folder.name) {
        if stem.contains(&token) {
            score += 4.0;
        }
    }
    for word in tokenize(&folder.description) {
        if word.len() > 3 && stem.contains(&word) {
            score += 2.0;
        }
    }
    for kw in folder.keywords.iter().chain(folder.tags.iter()) {
        if stem.contains(&kw.to_lowercase()) {
            score += 5.0;
        }
    }
    for segment in folder.path.split(['/', '\\']) {
        for token in tokenize(segment) {
            if token.len() > 2 && stem.contains(&token) {
                score += 1.0;
            }
        }
    }
    // Extension-aware bonus: CAD files score against "3D Printing" folders
    // and the like.
    for (exts, concepts) in EXT_CONCEPTS {
        if exts.contains(&ext) {
            let haystack = format!("{} {}", name, folder.description.to_lowercase());
            if concepts.iter().any(|c| haystack.contains(c)) {
                score += 5.0;
            }
        }
    }
    score
}

fn tokenize(input: &str) -> Vec<String> {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

fn name_tokens(stem: &str) -> Vec<String> {
    let mut tokens: Vec<String> = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && !t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| t.to_lowercase())
        .collect();
    tokens.dedup();
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str, description: &str, keywords: &[&str]) -> SmartFolder {
        SmartFolder {
            name: name.to_string(),
            description: description.to_string(),
            path: format!("/home/user/{}", name),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            tags: vec![],
        }
    }

    #[test]
    fn identical_inputs_yield_identical_outputs() {
        let folders = vec![folder("Finance", "bills and invoices", &["invoice"])];
        let a = classify_by_name("invoice_2024.pdf", "pdf", &folders, 5.0);
        let b = classify_by_name("invoice_2024.pdf", "pdf", &folders, 5.0);
        assert_eq!(a, b);
    }

    #[test]
    fn matches_configured_folder_by_keyword() {
        let folders = vec![
            folder("Finance", "bills and invoices", &["invoice", "receipt"]),
            folder("Vacation", "trip photos", &[]),
        ];
        let result = classify_by_name("invoice_2024.pdf", "pdf", &folders, 5.0);
        assert_eq!(result.category, "Finance");
        assert!((60..=75).contains(&result.confidence));
        assert_eq!(result.extraction_method, ExtractionMethod::FilenameOnly);
    }

    #[test]
    fn falls_through_to_topic_table() {
        let result = classify_by_name("invoice_march.pdf", "pdf", &[], 5.0);
        assert_eq!(result.category, "Financial");
        assert_eq!(result.confidence, 65);
    }

    #[test]
    fn falls_through_to_extension_table() {
        let result = classify_by_name("xyzzy.mp3", "mp3", &[], 5.0);
        assert_eq!(result.category, "Audio");
        assert_eq!(result.confidence, 60);
    }

    #[test]
    fn never_returns_an_empty_category() {
        let result = classify_by_name("", "", &[], 5.0);
        assert!(!result.category.is_empty());
        assert!(!result.keywords.is_empty());
    }

    #[test]
    fn cad_extension_scores_3d_printing_folder() {
        let folders = vec![
            folder("3D Printing", "printable models", &[]),
            folder("Documents", "general paperwork", &[]),
        ];
        let result = classify_by_name("bracket_v2.stl", "stl", &folders, 5.0);
        assert_eq!(result.category, "3D Printing");
    }

    #[test]
    fn below_threshold_keeps_folders_out() {
        let folders = vec![folder("Finance", "bills", &[])];
        let result = classify_by_name("zzz.unknownext", "unknownext", &folders, 5.0);
        assert_eq!(result.category, DEFAULT_CATEGORY);
    }
}
