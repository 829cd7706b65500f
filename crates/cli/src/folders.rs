//! Folder catalog loading: one TOML file per smart folder in a directory.

use smartsort_core::models::SmartFolder;
use std::path::Path;

pub fn load_folders_from_dir(dir: &Path) -> anyhow::Result<Vec<SmartFolder>> {
    let mut folders = Vec::new();
    if !dir.exists() {
        return Ok(folders);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) == Some("toml") {
            let content = std::fs::read_to_string(entry.path())?;
            let folder: SmartFolder = toml::from_str(&content)?;
            folders.push(folder);
        }
    }
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("finance.toml"),
            r#"
name = "Finance"
description = "bills and invoices"
path = "/home/user/Finance"
keywords = ["invoice", "receipt"]
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let folders = load_folders_from_dir(dir.path()).unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "Finance");
        assert_eq!(folders[0].keywords, vec!["invoice", "receipt"]);
    }

    #[test]
    fn missing_dir_is_an_empty_catalog() {
        let folders = load_folders_from_dir(Path::new("/definitely/not/here")).unwrap();
        assert!(folders.is_empty());
    }
}
