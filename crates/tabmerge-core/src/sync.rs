//! Sync engine: fill or overwrite target fields from keyed source rows

use crate::config::{SyncConfig, UpdateMode};
use crate::matcher::Matcher;
use crate::schema::UnifiedSchema;
use crate::selector::{select, Exclusion, RequestedField};
use crate::table::{CellValue, Table};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::slice;

/// A source row replaced in the index by a later one with the same key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCollision {
    pub key: Vec<String>,
    pub previous: String,
    pub replaced_by: String,
}

/// Per-mapping-entry update counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub target: String,
    pub source: String,
    /// Target column the entry resolved to, if any
    pub target_column: Option<String>,
    pub rows_updated: usize,
}

/// Counts and diagnostics produced by a sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub target: String,
    pub rows_total: usize,
    pub rows_matched: usize,
    pub unmatched_rows: usize,
    pub fields: Vec<FieldUpdate>,
    /// Sources used for the index, in order
    pub sources: Vec<String>,
    /// Sources lacking one of the key fields
    pub excluded_sources: Vec<Exclusion>,
    /// Target-side key fields the target has no column for
    pub missing_target_keys: Vec<String>,
    /// (source id, source field) pairs a source cannot supply
    pub unsupplied_fields: Vec<(String, String)>,
    pub key_collisions: Vec<KeyCollision>,
}

/// Result of [`sync_tables`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub table: Table,
    pub report: SyncReport,
}

/// Synchronize `target` from `sources` according to `config`.
///
/// The output has the same rows and columns as `target`; only mapped cells
/// of key-matched rows change.
pub fn sync_tables(
    target: &Table,
    sources: &[Table],
    config: &SyncConfig,
    matcher: &Matcher,
) -> SyncOutcome {
    let markers = &config.empty_markers;
    let mut report = SyncReport {
        target: target.source_id.clone(),
        rows_total: target.row_count(),
        ..SyncReport::default()
    };
    if config.key_mapping.is_empty() {
        warn!("{}: no key fields mapped, nothing to sync", target.source_id);
        report.unmatched_rows = target.row_count();
        return SyncOutcome {
            table: target.clone(),
            report,
        };
    }

    let target_schema = UnifiedSchema::reconcile(slice::from_ref(target), matcher);
    let target_column = |name: &str| {
        target_schema
            .resolve(name, matcher)
            .and_then(|r| target_schema.column_for(r.index, 0))
    };

    let target_key: Vec<Option<usize>> = config
        .key_mapping
        .iter()
        .map(|pair| target_column(&pair.target))
        .collect();
    report.missing_target_keys = config
        .key_mapping
        .iter()
        .zip(&target_key)
        .filter(|(_, col)| col.is_none())
        .map(|(pair, _)| pair.target.clone())
        .collect();

    let target_fields: Vec<Option<usize>> = config
        .field_mapping
        .iter()
        .map(|pair| target_column(&pair.target))
        .collect();
    report.fields = config
        .field_mapping
        .iter()
        .zip(&target_fields)
        .map(|(pair, col)| FieldUpdate {
            target: pair.target.clone(),
            source: pair.source.clone(),
            target_column: col.map(|c| target.columns[c].name.clone()),
            rows_updated: 0,
        })
        .collect();
    for update in report.fields.iter().filter(|u| u.target_column.is_none()) {
        warn!(
            "{}: mapped field '{}' has no column in the target, skipping it",
            target.source_id, update.target
        );
    }

    // Source side: key fields decide which sources take part
    let source_schema = UnifiedSchema::reconcile(sources, matcher);
    let key_names: Vec<String> = config.key_mapping.iter().map(|p| p.source.clone()).collect();
    let selection = select(sources, &source_schema, &key_names, matcher);
    report.excluded_sources = selection.excluded.clone();

    let mapped_names: Vec<String> = config
        .field_mapping
        .iter()
        .map(|p| p.source.clone())
        .collect();
    let mapped = RequestedField::resolve_all(&mapped_names, &source_schema, matcher);

    let mut index: HashMap<Vec<String>, (usize, usize)> = HashMap::new();
    let mut source_columns: HashMap<usize, Vec<Option<usize>>> = HashMap::new();

    for (source_index, source) in selection.included_tables(sources) {
        report.sources.push(source.source_id.clone());

        let columns: Vec<Option<usize>> = mapped
            .iter()
            .map(|m| m.field.and_then(|f| source_schema.column_for(f, source_index)))
            .collect();
        for (m, col) in mapped.iter().zip(&columns) {
            if col.is_none() {
                report
                    .unsupplied_fields
                    .push((source.source_id.clone(), m.name.clone()));
            }
        }
        source_columns.insert(source_index, columns);

        let key_columns: Vec<usize> = selection
            .required
            .iter()
            .filter_map(|r| r.field.and_then(|f| source_schema.column_for(f, source_index)))
            .collect();

        for (row_index, row) in source.rows.iter().enumerate() {
            let Some(key) = key_tuple(row.cells.as_slice(), &key_columns, markers) else {
                continue;
            };
            if let Some((previous, _)) = index.insert(key.clone(), (source_index, row_index)) {
                debug!("key {:?} from {} replaces an earlier row", key, source.source_id);
                report.key_collisions.push(KeyCollision {
                    key,
                    previous: sources[previous].source_id.clone(),
                    replaced_by: source.source_id.clone(),
                });
            }
        }
    }

    let mut table = target.clone();
    let target_key_columns: Option<Vec<usize>> = target_key.iter().copied().collect();

    for row in &mut table.rows {
        let hit = target_key_columns
            .as_ref()
            .and_then(|cols| key_tuple(&row.cells, cols, markers))
            .and_then(|key| index.get(&key).copied());
        let Some((source_index, source_row)) = hit else {
            report.unmatched_rows += 1;
            continue;
        };
        report.rows_matched += 1;

        let source_cells = &sources[source_index].rows[source_row].cells;
        let columns = &source_columns[&source_index];
        for (i, update) in report.fields.iter_mut().enumerate() {
            let (Some(target_col), Some(source_col)) = (target_fields[i], columns[i]) else {
                continue;
            };
            let value = source_cells.get(source_col).unwrap_or(&CellValue::Empty);
            if apply_value(&mut row.cells[target_col], value, config.update_mode, markers) {
                update.rows_updated += 1;
            }
        }
    }

    info!(
        "synced {}: {} of {} row(s) matched from {} source(s), {} unmatched",
        report.target,
        report.rows_matched,
        report.rows_total,
        report.sources.len(),
        report.unmatched_rows
    );

    SyncOutcome { table, report }
}

/// Key tuple for a row; `None` when any component is blank
fn key_tuple(cells: &[CellValue], columns: &[usize], markers: &[String]) -> Option<Vec<String>> {
    columns
        .iter()
        .map(|&c| {
            let value = cells.get(c)?;
            (!value.is_blank(markers)).then(|| value.compare_key())
        })
        .collect()
}

/// Write `value` into `cell` per the update mode; true when the cell changed
fn apply_value(
    cell: &mut CellValue,
    value: &CellValue,
    mode: UpdateMode,
    markers: &[String],
) -> bool {
    if value.is_blank(markers) {
        return false;
    }
    let writable = match mode {
        UpdateMode::FillMissingOnly => cell.is_blank(markers),
        UpdateMode::OverwriteAlways => {
            cell.is_blank(markers) || cell.compare_key() != value.compare_key()
        }
    };
    if writable {
        *cell = value.clone();
    }
    writable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldPair;
    use crate::parser::parse_csv_str;

    fn sync_config(keys: &[(&str, &str)], fields: &[(&str, &str)], mode: UpdateMode) -> SyncConfig {
        SyncConfig {
            key_mapping: keys.iter().map(|(t, s)| FieldPair::new(*t, *s)).collect(),
            field_mapping: fields.iter().map(|(t, s)| FieldPair::new(*t, *s)).collect(),
            update_mode: mode,
            ..SyncConfig::default()
        }
    }

    fn grade_by_id(mode: UpdateMode) -> SyncConfig {
        sync_config(&[("id", "id")], &[("grade", "grade")], mode)
    }

    fn text(table: &Table, row: usize, column: &str) -> String {
        table.value(row, column).map(|v| v.to_string()).unwrap_or_default()
    }

    #[test]
    fn test_fill_missing_grade() {
        let target = parse_csv_str("id,name,grade\n1,A,\n", "target.csv").unwrap();
        let source = parse_csv_str("id,name,grade\n1,A,B+\n", "source.csv").unwrap();
        let config = grade_by_id(UpdateMode::FillMissingOnly);

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());

        assert_eq!(text(&outcome.table, 0, "grade"), "B+");
        assert_eq!(text(&outcome.table, 0, "name"), "A");
        assert_eq!(outcome.report.rows_matched, 1);
        assert_eq!(outcome.report.fields[0].rows_updated, 1);
    }

    #[test]
    fn test_fill_missing_keeps_existing_values() {
        let target = parse_csv_str("id,grade\n1,A\n2,\n", "target.csv").unwrap();
        let source = parse_csv_str("id,grade\n1,C\n2,B\n", "source.csv").unwrap();
        let config = grade_by_id(UpdateMode::FillMissingOnly);

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());

        assert_eq!(text(&outcome.table, 0, "grade"), "A");
        assert_eq!(text(&outcome.table, 1, "grade"), "B");
        assert_eq!(outcome.report.fields[0].rows_updated, 1);
    }

    #[test]
    fn test_overwrite_always() {
        let target = parse_csv_str("id,grade\n1,A\n2,B\n", "target.csv").unwrap();
        let source = parse_csv_str("id,grade\n1,C\n2,B\n", "source.csv").unwrap();
        let config = grade_by_id(UpdateMode::OverwriteAlways);

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());

        assert_eq!(text(&outcome.table, 0, "grade"), "C");
        assert_eq!(outcome.report.fields[0].rows_updated, 1);
        assert_eq!(outcome.report.rows_matched, 2);
    }

    #[test]
    fn test_empty_marker_counts_as_missing() {
        let target = parse_csv_str("id,grade\n1,<空值>\n", "target.csv").unwrap();
        let source = parse_csv_str("id,grade\n1,A\n", "source.csv").unwrap();
        let config = grade_by_id(UpdateMode::FillMissingOnly);

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());
        assert_eq!(text(&outcome.table, 0, "grade"), "A");
    }

    #[test]
    fn test_unmatched_rows_pass_through() {
        let target = parse_csv_str("id,grade\n1,\n9,\n,\n", "target.csv").unwrap();
        let source = parse_csv_str("id,grade\n1,A\n", "source.csv").unwrap();
        let config = grade_by_id(UpdateMode::FillMissingOnly);

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());

        assert_eq!(outcome.table.row_count(), 3);
        assert_eq!(outcome.table.columns, target.columns);
        assert_eq!(outcome.report.unmatched_rows, 2);
        assert_eq!(outcome.table.rows[1], target.rows[1]);
    }

    #[test]
    fn test_later_source_wins_on_collision() {
        let target = parse_csv_str("学号,成绩\n1,\n", "target.csv").unwrap();
        let first = parse_csv_str("学号,成绩\n1,80\n", "first.csv").unwrap();
        let second = parse_csv_str("学生学号,分数\n1,95\n", "second.csv").unwrap();
        let config = sync_config(&[("学号", "学号")], &[("成绩", "成绩")], UpdateMode::FillMissingOnly);

        let outcome = sync_tables(&target, &[first, second], &config, &Matcher::default());

        assert_eq!(text(&outcome.table, 0, "成绩"), "95");
        assert_eq!(outcome.report.key_collisions.len(), 1);
        assert_eq!(outcome.report.key_collisions[0].previous, "first.csv");
        assert_eq!(outcome.report.key_collisions[0].replaced_by, "second.csv");
    }

    #[test]
    fn test_source_missing_key_is_excluded() {
        let target = parse_csv_str("id,grade\n1,\n", "target.csv").unwrap();
        let keyless = parse_csv_str("grade\nA\n", "keyless.csv").unwrap();
        let config = grade_by_id(UpdateMode::FillMissingOnly);

        let outcome = sync_tables(&target, &[keyless], &config, &Matcher::default());

        assert_eq!(outcome.report.excluded_sources.len(), 1);
        assert_eq!(outcome.report.excluded_sources[0].source_id, "keyless.csv");
        assert_eq!(outcome.report.unmatched_rows, 1);
        assert_eq!(outcome.table, target);
    }

    #[test]
    fn test_target_missing_key_leaves_rows_unmatched() {
        let target = parse_csv_str("name,grade\nA,\n", "target.csv").unwrap();
        let source = parse_csv_str("id,grade\n1,A\n", "source.csv").unwrap();
        let config = grade_by_id(UpdateMode::FillMissingOnly);

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());

        assert_eq!(outcome.report.missing_target_keys, vec!["id".to_string()]);
        assert_eq!(outcome.report.rows_matched, 0);
        assert_eq!(outcome.table, target);
    }

    #[test]
    fn test_unmapped_target_field_is_reported() {
        let target = parse_csv_str("id,grade\n1,\n", "target.csv").unwrap();
        let source = parse_csv_str("id,grade,address\n1,A,X\n", "source.csv").unwrap();
        let config = sync_config(
            &[("id", "id")],
            &[("grade", "grade"), ("address", "address")],
            UpdateMode::OverwriteAlways,
        );

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());

        assert_eq!(outcome.table.column_count(), 2);
        assert_eq!(outcome.report.fields[1].target_column, None);
        assert_eq!(outcome.report.fields[1].rows_updated, 0);
        assert_eq!(text(&outcome.table, 0, "grade"), "A");
    }

    #[test]
    fn test_empty_key_mapping_matches_nothing() {
        let target = parse_csv_str("id,grade\n1,\n2,\n", "target.csv").unwrap();
        let source = parse_csv_str("id,grade\n1,A\n", "source.csv").unwrap();
        let config = sync_config(&[], &[("grade", "grade")], UpdateMode::OverwriteAlways);

        let outcome = sync_tables(&target, &[source], &config, &Matcher::default());

        assert_eq!(outcome.table, target);
        assert_eq!(outcome.report.rows_matched, 0);
        assert_eq!(outcome.report.unmatched_rows, 2);
        assert!(outcome.report.sources.is_empty());
    }
}
