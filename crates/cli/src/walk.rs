//! File listing for the analyze command: expands directories, skips hidden
//! entries and exclude patterns.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn collect_files(inputs: &[PathBuf], excludes: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let exclude_set = build_globset(excludes)?;
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        for entry in WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            // The root itself is exempt so explicitly-named hidden
            // directories still work.
            .filter_entry(|e| {
                e.depth() == 0 || (!is_hidden(e.path()) && !exclude_set.is_match(e.path()))
            })
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    Ok(files)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("bad exclude glob: {pattern}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_directories_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.pdf"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();

        let files = collect_files(&[dir.path().to_path_buf()], &[]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"b.pdf".to_string()));
        assert!(!names.contains(&".hidden".to_string()));
    }

    #[test]
    fn exclude_globs_apply() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "x").unwrap();
        std::fs::write(dir.path().join("skip.log"), "x").unwrap();

        let files =
            collect_files(&[dir.path().to_path_buf()], &["**/*.log".to_string()]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.txt"));
    }
}
