#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tabmerge_core::{write_table, Table, WriteOptions};
use tempfile::{tempdir, TempDir};

/// Scratch folder of spreadsheets, removed on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a text file (CSV) under the workspace and returns its path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Writes `table` as a workbook under the workspace and returns its path.
    pub fn write_xlsx(&self, name: &str, table: &Table) -> PathBuf {
        let options = WriteOptions {
            overwrite: true,
            ..WriteOptions::default()
        };
        write_table(table, self.temp_dir.path().join(name), &options).expect("write workbook")
    }

    /// A separate output location outside the scanned folder.
    pub fn output(&self, name: &str) -> PathBuf {
        let dir = self.temp_dir.path().join("out");
        fs::create_dir_all(&dir).expect("create output dir");
        dir.join(name)
    }
}

/// Builds an in-memory table from CSV text.
pub fn table(source: &str, csv: &str) -> Table {
    tabmerge_core::parser::parse_csv_str(csv, source).expect("parse csv")
}

/// Display text of a cell, empty when absent.
pub fn text(table: &Table, row: usize, column: &str) -> String {
    table
        .value(row, column)
        .map(|v| v.to_string())
        .unwrap_or_default()
}
