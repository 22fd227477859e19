//! Spreadsheet parsers: CSV through the `csv` crate, workbooks through `calamine`

use crate::error::{Error, Result};
use crate::table::{CellValue, Table};
use calamine::{open_workbook_auto, DataType, Reader};
use chrono::{Days, NaiveDate};
use log::warn;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// File extensions understood by [`parse_file`]
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xlsm", "xls", "ods"];

/// Whether the path has one of the [`SUPPORTED_EXTENSIONS`]
pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Parse any supported spreadsheet file, dispatching on its extension
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    match extension_of(path).as_deref() {
        Some("csv") => parse_csv(path),
        Some("xlsx" | "xlsm" | "xls" | "ods") => parse_workbook(path),
        _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Parse a CSV file into a Table
pub fn parse_csv<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut table = read_csv(BufReader::new(file), path)?;
    table.path = Some(path.to_path_buf());
    Ok(table)
}

/// Parse CSV from a string (useful for testing)
pub fn parse_csv_str(content: &str, source_name: &str) -> Result<Table> {
    read_csv(content.as_bytes(), Path::new(source_name))
}

fn read_csv<R: Read>(reader: R, path: &Path) -> Result<Table> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // Allow varying number of fields
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| Error::Csv {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut table = Table::with_columns(source_id_of(path), &headers.iter().collect::<Vec<_>>());

    if table.columns.is_empty() {
        return Err(Error::Parse {
            path: path.to_path_buf(),
            message: "no columns found in CSV".to_string(),
        });
    }

    for (row_idx, result) in csv_reader.records().enumerate() {
        let record = result.map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;

        if record.len() > table.column_count() {
            warn!(
                "row {} in {} has more cells than columns, truncating",
                row_idx + 1,
                path.display()
            );
        }

        table.push_row(record.iter().map(CellValue::parse).collect());
    }

    Ok(table)
}

/// Parse the first worksheet of an Excel/ODS workbook into a Table.
///
/// The first non-empty row is the header; fully empty rows are skipped.
pub fn parse_workbook<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let workbook_error = |source: calamine::Error| Error::Workbook {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook = open_workbook_auto(path).map_err(workbook_error)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Parse {
            path: path.to_path_buf(),
            message: "workbook has no worksheets".to_string(),
        })?
        .map_err(workbook_error)?;

    let mut rows = range
        .rows()
        .filter(|row| row.iter().any(|cell| !matches!(cell, DataType::Empty)));

    let header: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(header_label).collect(),
        None => {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                message: "no header row found in worksheet".to_string(),
            })
        }
    };

    let mut table = Table::with_columns(source_id_of(path), &header);
    table.path = Some(path.to_path_buf());
    for row in rows {
        table.push_row(row.iter().map(cell_value).collect());
    }

    Ok(table)
}

fn header_label(cell: &DataType) -> String {
    match cell_value(cell) {
        CellValue::Empty => String::new(),
        other => other.to_string_value(),
    }
}

fn cell_value(cell: &DataType) -> CellValue {
    match cell {
        DataType::Int(i) => CellValue::Integer(*i),
        DataType::Float(f) => float_value(*f),
        DataType::String(s) if s.trim().is_empty() => CellValue::Empty,
        DataType::String(s) => CellValue::Text(s.trim().to_string()),
        DataType::Bool(b) => CellValue::Text(b.to_string()),
        DataType::DateTime(serial) => excel_date(*serial)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Float(*serial)),
        DataType::Empty => CellValue::Empty,
        other => CellValue::Text(other.to_string()),
    }
}

/// Spreadsheets store every number as a float; integral ones become integers
fn float_value(f: f64) -> CellValue {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        CellValue::Integer(f as i64)
    } else {
        CellValue::Float(f)
    }
}

/// Convert an Excel serial day number (1900 date system) to a date.
///
/// Excel counts a 1900-02-29 that never existed as serial 60, so serials
/// below it count from 1899-12-31 and the rest from 1899-12-30. Serial 60
/// itself maps to 1900-02-28.
fn excel_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let days = serial.floor() as u64;
    let (base, days) = match days {
        0..=59 => (NaiveDate::from_ymd_opt(1899, 12, 31)?, days),
        60 => (NaiveDate::from_ymd_opt(1899, 12, 31)?, 59),
        _ => (NaiveDate::from_ymd_opt(1899, 12, 30)?, days),
    };
    base.checked_add_days(Days::new(days))
}

pub(crate) fn source_id_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
