//! Folder scanner: discovers spreadsheet files and loads them as Tables

use crate::error::{Error, Result};
use crate::parser::{is_supported, parse_file, source_id_of};
use crate::table::Table;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Prefix of lock files left behind by spreadsheet editors
const LOCK_FILE_PREFIX: &str = "~$";

/// Options for [`load_folder`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Paths skipped during the scan (typically the output and sync target)
    pub exclude: Vec<PathBuf>,
}

/// A file that was found but could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub source_id: String,
    pub message: String,
}

/// Tables loaded from a folder plus the files that failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedFolder {
    pub root: PathBuf,
    /// Loaded tables, ordered by file name
    pub tables: Vec<Table>,
    pub failures: Vec<LoadFailure>,
}

impl LoadedFolder {
    /// Source ids of all loaded tables
    pub fn source_ids(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.source_id.as_str()).collect()
    }
}

/// List the supported spreadsheet files under `root`, sorted by path
pub fn discover_files<P: AsRef<Path>>(root: P, options: &LoadOptions) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(Error::NotADirectory(root.to_path_buf()));
    }

    let excluded: Vec<PathBuf> = options
        .exclude
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();

    let mut walker = WalkDir::new(root).follow_links(true).min_depth(1);
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_supported(path) {
            continue;
        }
        if source_id_of(path).starts_with(LOCK_FILE_PREFIX) {
            continue;
        }
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if excluded.contains(&canonical) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Load every supported spreadsheet in a folder.
///
/// A file that cannot be parsed is recorded in [`LoadedFolder::failures`]
/// and the rest of the folder still loads. Only an unreadable folder fails
/// the whole call.
pub fn load_folder<P: AsRef<Path>>(root: P, options: &LoadOptions) -> Result<LoadedFolder> {
    let root = root.as_ref();
    let files = discover_files(root, options)?;

    let mut tables = Vec::new();
    let mut failures = Vec::new();

    for path in files {
        match parse_file(&path) {
            Ok(table) => tables.push(table),
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                failures.push(LoadFailure {
                    source_id: source_id_of(&path),
                    message: e.to_string(),
                    path,
                });
            }
        }
    }

    info!(
        "loaded {} table(s) from {} ({} failed)",
        tables.len(),
        root.display(),
        failures.len()
    );

    Ok(LoadedFolder {
        root: root.to_path_buf(),
        tables,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn folder(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_loads_supported_files_in_name_order() {
        let dir = folder(&[
            ("b.csv", "学号\n2\n"),
            ("a.csv", "学号\n1\n"),
            ("notes.txt", "ignored"),
        ]);

        let loaded = load_folder(dir.path(), &LoadOptions::default()).unwrap();

        assert_eq!(loaded.source_ids(), vec!["a.csv", "b.csv"]);
        assert!(loaded.failures.is_empty());
    }

    #[test]
    fn test_broken_file_is_recorded_not_fatal() {
        let dir = folder(&[("good.csv", "学号\n1\n"), ("broken.xlsx", "not a workbook")]);

        let loaded = load_folder(dir.path(), &LoadOptions::default()).unwrap();

        assert_eq!(loaded.source_ids(), vec!["good.csv"]);
        assert_eq!(loaded.failures.len(), 1);
        assert_eq!(loaded.failures[0].source_id, "broken.xlsx");
    }

    #[test]
    fn test_lock_files_and_exclusions_skipped() {
        let dir = folder(&[
            ("~$a.xlsx", "lock"),
            ("a.csv", "学号\n1\n"),
            ("out.csv", "学号\n1\n"),
        ]);
        let options = LoadOptions {
            exclude: vec![dir.path().join("out.csv")],
            ..LoadOptions::default()
        };

        let files = discover_files(dir.path(), &options).unwrap();

        assert_eq!(files, vec![dir.path().join("a.csv")]);
    }

    #[test]
    fn test_recursion_is_opt_in() {
        let dir = folder(&[("a.csv", "x\n1\n"), ("sub/b.csv", "x\n2\n")]);

        let flat = discover_files(dir.path(), &LoadOptions::default()).unwrap();
        assert_eq!(flat.len(), 1);

        let options = LoadOptions {
            recursive: true,
            ..LoadOptions::default()
        };
        let deep = discover_files(dir.path(), &options).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = load_folder(dir.path().join("nope"), &LoadOptions::default());
        assert!(matches!(result, Err(Error::NotADirectory(_))));
    }
}
