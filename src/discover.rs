//! Filesystem discovery for local ingestion.
//!
//! Enumerates the documentation files under a root directory,
//! filtered by extension and sorted lexicographically so batch runs
//! see the same ordering every time. Ordering stability is what makes
//! resumable batches (`start_from`) work at all.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Enumerate ingestable files under `root` in deterministic order.
///
/// A file root returns just that file (extension filter still
/// applies). `extensions` entries are matched case-insensitively as
/// filename suffixes, e.g. `".md"`.
pub fn enumerate_files(root: &Path, recursive: bool, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::Validation(format!(
            "path does not exist: {}",
            root.display()
        )));
    }

    if root.is_file() {
        return Ok(if matches_extension(root, extensions) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(root).max_depth(max_depth).follow_links(false) {
        let entry = entry.map_err(|e| Error::Validation(format!("walk error: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matches_extension(entry.path(), extensions) {
            files.push(entry.into_path());
        }
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn enumerates_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        fs::write(dir.path().join("a.md"), "a").unwrap();
        fs::write(dir.path().join("c.log"), "noise").unwrap();

        let files = enumerate_files(dir.path(), true, &exts(&[".md"])).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
    }

    #[test]
    fn non_recursive_skips_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("top.md"), "t").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/nested.md"), "n").unwrap();

        let flat = enumerate_files(dir.path(), false, &exts(&[".md"])).unwrap();
        assert_eq!(flat.len(), 1);

        let deep = enumerate_files(dir.path(), true, &exts(&[".md"])).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn single_file_root_returns_itself() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("readme.md");
        fs::write(&file, "hi").unwrap();

        let files = enumerate_files(&file, true, &exts(&[".md"])).unwrap();
        assert_eq!(files, vec![file.clone()]);

        let filtered = enumerate_files(&file, true, &exts(&[".rst"])).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = enumerate_files(Path::new("/no/such/dir"), true, &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("UPPER.MD"), "u").unwrap();
        let files = enumerate_files(dir.path(), true, &exts(&[".md"])).unwrap();
        assert_eq!(files.len(), 1);
    }
}
