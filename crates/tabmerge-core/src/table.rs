//! Core table types for representing loaded spreadsheet data

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A parsed table from a single spreadsheet file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Identity of the originating file (its file name)
    pub source_id: String,
    /// Full path of the originating file, when loaded from disk
    pub path: Option<PathBuf>,
    /// Column definitions
    pub columns: Vec<Column>,
    /// Row data
    pub rows: Vec<Row>,
}

impl Table {
    /// Create a new empty table
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            path: None,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Create an empty table with the given column labels
    pub fn with_columns<S: AsRef<str>>(source_id: impl Into<String>, names: &[S]) -> Self {
        let mut table = Self::new(source_id);
        table.columns = names
            .iter()
            .enumerate()
            .map(|(i, name)| Column::new(name.as_ref().to_string(), i))
            .collect();
        table
    }

    /// Append a row, padding short rows with empty cells and truncating long ones
    pub fn push_row(&mut self, mut cells: Vec<CellValue>) {
        cells.resize(self.columns.len(), CellValue::Empty);
        self.rows.push(Row::new(cells));
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column labels in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Value of the named column in the given row
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let col = self.find_column(column)?;
        self.rows.get(row).and_then(|r| r.get(col.index))
    }
}

/// A column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Raw column label as it appears in the header row
    pub name: String,
    /// Column index (0-based)
    pub index: usize,
}

impl Column {
    /// Create a new column
    pub fn new(name: String, index: usize) -> Self {
        Self { name, index }
    }
}

/// A row of data, one cell per column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub cells: Vec<CellValue>,
}

impl Row {
    /// Create a new row
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self { cells }
    }

    /// Get a cell value by column index
    pub fn get(&self, index: usize) -> Option<&CellValue> {
        self.cells.get(index)
    }
}

/// A cell value with type detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// Calendar date
    Date(NaiveDate),
    /// Text value
    Text(String),
    /// Empty/null cell
    Empty,
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Thousands separators and currency signs ignored in money amounts
const MONEY_MARKS: &[char] = &[',', '¥', '￥', '$', '元'];

impl CellValue {
    /// Parse a string into a CellValue, detecting the type
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        // Codes such as "007" keep their leading zeros
        if !has_leading_zero(trimmed) {
            if let Ok(i) = trimmed.parse::<i64>() {
                return CellValue::Integer(i);
            }

            if let Ok(f) = trimmed.parse::<f64>() {
                if f.is_finite() {
                    return CellValue::Float(f);
                }
            }
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return CellValue::Date(date);
            }
        }

        CellValue::Text(trimmed.to_string())
    }

    /// Shorthand for a text cell
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Empty, whitespace-only text, or one of the given placeholder markers
    pub fn is_blank(&self, markers: &[String]) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => {
                let s = s.trim();
                s.is_empty() || markers.iter().any(|m| m == s)
            }
            _ => false,
        }
    }

    /// Convert to a display string
    pub fn to_string_value(&self) -> String {
        self.to_string()
    }

    /// Key used to decide whether two cells hold the same value.
    ///
    /// Integers and integral floats compare equal, text is trimmed.
    pub fn compare_key(&self) -> String {
        match self {
            CellValue::Text(s) => s.trim().to_string(),
            other => other.to_string(),
        }
    }

    /// Numeric amount of a money cell such as `1,000`, `￥1000` or `1000元`
    pub fn money_amount(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::Text(s) => {
                let cleaned: String = s.chars().filter(|c| !MONEY_MARKS.contains(c)).collect();
                cleaned.trim().parse::<f64>().ok().filter(|f| f.is_finite())
            }
            _ => None,
        }
    }
}

fn has_leading_zero(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.")
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(fl) => write!(f, "{}", fl),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Empty => write!(f, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_parse_integer() {
        assert_eq!(CellValue::parse("42"), CellValue::Integer(42));
        assert_eq!(CellValue::parse("-123"), CellValue::Integer(-123));
        assert_eq!(CellValue::parse(" 0 "), CellValue::Integer(0));
    }

    #[test]
    fn test_cell_value_parse_keeps_leading_zeros() {
        assert_eq!(CellValue::parse("007"), CellValue::text("007"));
        assert_eq!(CellValue::parse("0.5"), CellValue::Float(0.5));
    }

    #[test]
    fn test_cell_value_parse_float() {
        assert_eq!(CellValue::parse("3.5"), CellValue::Float(3.5));
        assert_eq!(CellValue::parse("-2.5"), CellValue::Float(-2.5));
    }

    #[test]
    fn test_cell_value_parse_date() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        assert_eq!(CellValue::parse("2024-09-01"), CellValue::Date(date));
        assert_eq!(CellValue::parse("2024/09/01"), CellValue::Date(date));
    }

    #[test]
    fn test_cell_value_parse_text() {
        assert_eq!(CellValue::parse("张三"), CellValue::text("张三"));
        assert_eq!(CellValue::parse("B+"), CellValue::text("B+"));
        assert_eq!(CellValue::parse("inf"), CellValue::text("inf"));
    }

    #[test]
    fn test_cell_value_parse_empty() {
        assert_eq!(CellValue::parse(""), CellValue::Empty);
        assert_eq!(CellValue::parse("   "), CellValue::Empty);
    }

    #[test]
    fn test_blank_markers() {
        let markers = vec!["<空值>".to_string()];
        assert!(CellValue::Empty.is_blank(&markers));
        assert!(CellValue::text("  ").is_blank(&markers));
        assert!(CellValue::text("<空值>").is_blank(&markers));
        assert!(!CellValue::text("<空值>").is_blank(&[]));
        assert!(!CellValue::Integer(0).is_blank(&markers));
    }

    #[test]
    fn test_compare_key_numbers() {
        assert_eq!(
            CellValue::Integer(3).compare_key(),
            CellValue::Float(3.0).compare_key()
        );
        assert_eq!(CellValue::text(" a ").compare_key(), "a");
    }

    #[test]
    fn test_money_amount_ignores_separators_and_currency() {
        assert_eq!(CellValue::parse("1,000").money_amount(), Some(1000.0));
        assert_eq!(CellValue::text("1000元").money_amount(), Some(1000.0));
        assert_eq!(CellValue::text("￥12.5").money_amount(), Some(12.5));
        assert_eq!(CellValue::Integer(7).money_amount(), Some(7.0));
        assert_eq!(CellValue::text("free").money_amount(), None);
        assert_eq!(CellValue::Empty.money_amount(), None);
    }

    #[test]
    fn test_push_row_pads_and_truncates() {
        let mut table = Table::with_columns("t.csv", &["a", "b"]);
        table.push_row(vec![CellValue::Integer(1)]);
        table.push_row(vec![
            CellValue::Integer(1),
            CellValue::Integer(2),
            CellValue::Integer(3),
        ]);

        assert_eq!(table.rows[0].cells, vec![CellValue::Integer(1), CellValue::Empty]);
        assert_eq!(table.rows[1].cells.len(), 2);
        assert_eq!(table.value(1, "b"), Some(&CellValue::Integer(2)));
    }
}
