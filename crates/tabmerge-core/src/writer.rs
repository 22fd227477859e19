//! Table writers: CSV through the `csv` crate, XLSX through `rust_xlsxwriter`
//!
//! Output is first written to a temporary file in the destination directory
//! and then renamed over the destination, so a failed write never leaves a
//! partial file behind.

use crate::error::{Error, Result};
use crate::table::{CellValue, Table};
use log::info;
use rust_xlsxwriter::{Workbook, Worksheet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const DATA_SHEET: &str = "data";
const SUMMARY_SHEET: &str = "summary";

/// Options for [`write_table`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Replace an existing destination; otherwise pick `name_N.ext`
    pub overwrite: bool,
    /// Label/value rows written to a second sheet (XLSX only)
    pub summary: Vec<(String, String)>,
}

/// Write `table` to `dest`, choosing the format from the extension.
///
/// Returns the path actually written, which differs from `dest` when the
/// destination exists and overwriting is off.
pub fn write_table<P: AsRef<Path>>(
    table: &Table,
    dest: P,
    options: &WriteOptions,
) -> Result<PathBuf> {
    let dest = dest.as_ref();
    let format = OutputFormat::of(dest)?;
    let path = if options.overwrite {
        dest.to_path_buf()
    } else {
        available_path(dest)
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let write_error = |source: std::io::Error| Error::Write {
        path: path.clone(),
        source,
    };

    let mut temp = NamedTempFile::new_in(&dir).map_err(write_error)?;
    match format {
        OutputFormat::Csv => {
            write_csv(table, &path, temp.as_file_mut())?;
            temp.as_file_mut().flush().map_err(write_error)?;
        }
        OutputFormat::Xlsx => build_workbook(table, &options.summary)?
            .save(temp.path())
            .map_err(|e| write_error(std::io::Error::other(e)))?,
    }
    temp.persist(&path).map_err(|e| write_error(e.error))?;

    info!(
        "wrote {} row(s) x {} column(s) to {}",
        table.row_count(),
        table.column_count(),
        path.display()
    );
    Ok(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Xlsx,
}

impl OutputFormat {
    fn of(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("xlsx") => Ok(Self::Xlsx),
            _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// First of `dest`, `stem_1.ext`, `stem_2.ext`, ... that does not exist yet
fn available_path(dest: &Path) -> PathBuf {
    if !dest.exists() {
        return dest.to_path_buf();
    }
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dest.with_file_name(format!("{stem}_{n}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dest.to_path_buf())
}

fn write_csv<W: Write>(table: &Table, path: &Path, out: W) -> Result<()> {
    let write_error = |source: std::io::Error| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    let csv_error = |source: csv::Error| write_error(source.into());

    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(table.columns.iter().map(|c| c.name.as_str()))
        .map_err(csv_error)?;
    for row in &table.rows {
        writer
            .write_record(row.cells.iter().map(CellValue::to_string_value))
            .map_err(csv_error)?;
    }
    writer.flush().map_err(write_error)?;
    Ok(())
}

fn build_workbook(table: &Table, summary: &[(String, String)]) -> Result<Workbook> {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name(DATA_SHEET)?;
    for (col, column) in table.columns.iter().enumerate() {
        sheet.write_string(0, col as u16, &column.name)?;
    }
    for (row_idx, row) in table.rows.iter().enumerate() {
        for (col, cell) in row.cells.iter().enumerate() {
            write_cell(sheet, (row_idx + 1) as u32, col as u16, cell)?;
        }
    }

    if !summary.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(SUMMARY_SHEET)?;
        for (row, (label, value)) in summary.iter().enumerate() {
            sheet.write_string(row as u32, 0, label)?;
            sheet.write_string(row as u32, 1, value)?;
        }
    }

    Ok(workbook)
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &CellValue) -> Result<()> {
    match cell {
        CellValue::Integer(i) => {
            sheet.write_number(row, col, *i as f64)?;
        }
        CellValue::Float(f) => {
            sheet.write_number(row, col, *f)?;
        }
        CellValue::Empty => {}
        other => {
            sheet.write_string(row, col, other.to_string_value())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_csv, parse_csv_str, parse_workbook};
    use std::fs;
    use tempfile::TempDir;

    fn sample() -> Table {
        parse_csv_str("学号,姓名,成绩\n007,张三,90\n2,\"Li, Si\",\n", "sample.csv").unwrap()
    }

    #[test]
    fn test_csv_output_reads_back() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.csv");

        let written = write_table(&sample(), &dest, &WriteOptions::default()).unwrap();

        assert_eq!(written, dest);
        let table = parse_csv(&written).unwrap();
        assert_eq!(table.column_names(), vec!["学号", "姓名", "成绩"]);
        assert_eq!(table.value(0, "学号"), Some(&CellValue::text("007")));
        assert_eq!(table.value(1, "姓名"), Some(&CellValue::text("Li, Si")));
        assert_eq!(table.value(1, "成绩"), Some(&CellValue::Empty));
    }

    #[test]
    fn test_existing_destination_gets_numbered_name() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.csv");
        fs::write(&dest, "keep me").unwrap();
        fs::write(dir.path().join("out_1.csv"), "and me").unwrap();

        let written = write_table(&sample(), &dest, &WriteOptions::default()).unwrap();

        assert_eq!(written, dir.path().join("out_2.csv"));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "keep me");
    }

    #[test]
    fn test_overwrite_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.csv");
        fs::write(&dest, "old").unwrap();
        let options = WriteOptions {
            overwrite: true,
            ..WriteOptions::default()
        };

        let written = write_table(&sample(), &dest, &options).unwrap();

        assert_eq!(written, dest);
        assert!(fs::read_to_string(&dest).unwrap().starts_with("学号"));
    }

    #[test]
    fn test_xlsx_output_reads_back() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.xlsx");
        let options = WriteOptions {
            overwrite: false,
            summary: vec![("rows".to_string(), "2".to_string())],
        };

        let written = write_table(&sample(), &dest, &options).unwrap();

        let table = parse_workbook(&written).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, "成绩"), Some(&CellValue::Integer(90)));
        assert_eq!(table.value(0, "学号"), Some(&CellValue::text("007")));
    }

    #[test]
    fn test_missing_directory_is_write_error() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing").join("out.csv");

        let err = write_table(&sample(), &dest, &WriteOptions::default()).unwrap_err();

        assert!(matches!(err, Error::Write { .. }));
        assert!(!dest.exists());
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    #[test]
    fn test_csv_output_failure_is_write_error() {
        let dest = Path::new("out.csv");

        let err = write_csv(&sample(), dest, FailingWriter).unwrap_err();

        match err {
            Error::Write { path, .. } => assert_eq!(path, dest),
            other => panic!("expected a write error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let err = write_table(&sample(), dir.path().join("out.txt"), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
