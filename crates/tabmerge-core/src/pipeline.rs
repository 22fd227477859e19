//! Run pipeline shared by merge and sync
//!
//! `Loaded -> FieldsAnalyzed -> FilesSelected -> {Merged | Synced} -> Written`.
//! Every transition consumes the previous stage, so a run can only move
//! forward. Per-file and per-table problems accumulate in the [`RunReport`];
//! only configuration and write errors abort.

use crate::config::{MergeConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::matcher::Matcher;
use crate::merger::{apply_resolution, merge_tables, MergePlan, MergeReport};
use crate::scanner::{load_folder, LoadFailure, LoadOptions};
use crate::schema::{FieldReport, UnifiedSchema};
use crate::selector::{select, Selection};
use crate::sync::{sync_tables, SyncReport};
use crate::table::Table;
use crate::writer::{write_table, WriteOptions};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a run found out, in a form callers can render or serialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Source ids of the loaded tables, in load order
    pub loaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
    pub fields: FieldReport,
    pub selection: Option<Selection>,
    pub merge: Option<MergeReport>,
    pub sync: Option<SyncReport>,
    /// Path actually written
    pub output: Option<PathBuf>,
}

impl RunReport {
    /// Label/value rows for a summary sheet
    pub fn summary_rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("tables loaded".to_string(), self.loaded.len().to_string()),
            ("load failures".to_string(), self.failures.len().to_string()),
            ("fields found".to_string(), self.fields.fields.len().to_string()),
        ];
        if let Some(selection) = &self.selection {
            rows.push(("tables included".to_string(), selection.included.len().to_string()));
            rows.push(("tables excluded".to_string(), selection.excluded.len().to_string()));
        }
        if let Some(merge) = &self.merge {
            rows.extend([
                ("rows read".to_string(), merge.rows_read.to_string()),
                ("rows emitted".to_string(), merge.rows_emitted.to_string()),
                ("duplicates merged".to_string(), merge.duplicates_merged.to_string()),
                ("conflicts flagged".to_string(), merge.conflicts_flagged.to_string()),
            ]);
        }
        if let Some(sync) = &self.sync {
            rows.extend([
                ("rows matched".to_string(), sync.rows_matched.to_string()),
                ("rows unmatched".to_string(), sync.unmatched_rows.to_string()),
                ("key collisions".to_string(), sync.key_collisions.len().to_string()),
            ]);
            for field in &sync.fields {
                rows.push((format!("updated: {}", field.target), field.rows_updated.to_string()));
            }
        }
        for failure in &self.failures {
            rows.push((format!("failed: {}", failure.source_id), failure.message.clone()));
        }
        if let Some(selection) = &self.selection {
            for exclusion in &selection.excluded {
                rows.push((
                    format!("excluded: {}", exclusion.source_id),
                    exclusion.missing.join(", "),
                ));
            }
        }
        rows
    }
}

/// Tables loaded and ready for analysis
#[derive(Debug)]
pub struct Loaded {
    tables: Vec<Table>,
    failures: Vec<LoadFailure>,
    matcher: Matcher,
}

impl Loaded {
    /// Load every spreadsheet in `folder`
    pub fn from_folder<P: AsRef<Path>>(
        folder: P,
        options: &LoadOptions,
        matcher: Matcher,
    ) -> Result<Self> {
        let loaded = load_folder(folder, options)?;
        Ok(Self {
            tables: loaded.tables,
            failures: loaded.failures,
            matcher,
        })
    }

    /// Start from tables that are already in memory
    pub fn from_tables(tables: Vec<Table>, matcher: Matcher) -> Self {
        Self {
            tables,
            failures: Vec::new(),
            matcher,
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn failures(&self) -> &[LoadFailure] {
        &self.failures
    }

    /// Reconcile the column labels of every loaded table
    pub fn analyze(self) -> FieldsAnalyzed {
        let schema = UnifiedSchema::reconcile(&self.tables, &self.matcher);
        info!(
            "reconciled {} table(s) into {} field(s)",
            self.tables.len(),
            schema.fields.len()
        );
        FieldsAnalyzed {
            loaded: self,
            schema,
        }
    }
}

/// Tables with a reconciled schema
#[derive(Debug)]
pub struct FieldsAnalyzed {
    loaded: Loaded,
    schema: UnifiedSchema,
}

impl FieldsAnalyzed {
    pub fn schema(&self) -> &UnifiedSchema {
        &self.schema
    }

    pub fn field_report(&self) -> FieldReport {
        self.schema.report()
    }

    /// Report of what is known so far
    pub fn report(&self) -> RunReport {
        RunReport {
            loaded: self
                .loaded
                .tables
                .iter()
                .map(|t| t.source_id.clone())
                .collect(),
            failures: self.loaded.failures.clone(),
            fields: self.field_report(),
            selection: None,
            merge: None,
            sync: None,
            output: None,
        }
    }

    /// Keep the tables that carry every required field
    pub fn select(self, required: &[String]) -> FilesSelected {
        let selection = select(
            &self.loaded.tables,
            &self.schema,
            required,
            &self.loaded.matcher,
        );
        FilesSelected {
            analyzed: self,
            selection,
        }
    }
}

/// Tables split into included and excluded
#[derive(Debug)]
pub struct FilesSelected {
    analyzed: FieldsAnalyzed,
    selection: Selection,
}

impl FilesSelected {
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    fn report(&self) -> RunReport {
        RunReport {
            selection: Some(self.selection.clone()),
            ..self.analyzed.report()
        }
    }

    /// Merge the included tables
    pub fn merge(self, config: &MergeConfig) -> Result<Merged> {
        let loaded = &self.analyzed.loaded;
        let plan = MergePlan::new(&self.analyzed.schema, config, &loaded.matcher)?;
        let outcome = merge_tables(&loaded.tables, &self.analyzed.schema, &self.selection, &plan);

        let mut report = self.report();
        report.merge = Some(outcome.report);
        Ok(Merged {
            table: outcome.table,
            report,
        })
    }

    /// Sync `target` from the included tables.
    ///
    /// The selection should have been made on the source-side key fields;
    /// tables excluded by it are reported as excluded sources.
    pub fn sync(self, target: &Table, config: &SyncConfig) -> Result<Synced> {
        config.validate()?;
        let loaded = &self.analyzed.loaded;
        let sources: Vec<Table> = self
            .selection
            .included_tables(&loaded.tables)
            .map(|(_, t)| t.clone())
            .collect();
        let outcome = sync_tables(target, &sources, config, &loaded.matcher);

        let mut sync = outcome.report;
        let mut excluded = self.selection.excluded.clone();
        excluded.extend(sync.excluded_sources);
        sync.excluded_sources = excluded;

        let mut report = self.report();
        report.sync = Some(sync);
        Ok(Synced {
            table: outcome.table,
            report,
        })
    }
}

/// Merge result waiting to be written
#[derive(Debug)]
pub struct Merged {
    pub table: Table,
    pub report: RunReport,
}

impl Merged {
    /// Replace a deferred conflict's placeholder row with the chosen variant
    pub fn resolve(mut self, conflict: usize, choice: usize) -> Result<Self> {
        let merge = self
            .report
            .merge
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("no merge report".to_string()))?;
        let descriptor = merge.conflicts.get(conflict).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "conflict #{conflict} does not exist ({} flagged)",
                merge.conflicts.len()
            ))
        })?;
        self.table = apply_resolution(&self.table, descriptor, choice)?;
        Ok(self)
    }

    pub fn write<P: AsRef<Path>>(self, dest: P, options: &WriteOptions) -> Result<Written> {
        Written::new(&self.table, self.report, dest.as_ref(), options)
    }
}

/// Sync result waiting to be written
#[derive(Debug)]
pub struct Synced {
    pub table: Table,
    pub report: RunReport,
}

impl Synced {
    pub fn write<P: AsRef<Path>>(self, dest: P, options: &WriteOptions) -> Result<Written> {
        Written::new(&self.table, self.report, dest.as_ref(), options)
    }
}

/// Final stage: output on disk
#[derive(Debug)]
pub struct Written {
    pub path: PathBuf,
    pub report: RunReport,
}

impl Written {
    fn new(
        table: &Table,
        mut report: RunReport,
        dest: &Path,
        options: &WriteOptions,
    ) -> Result<Self> {
        let options = if options.summary.is_empty() {
            options.clone()
        } else {
            let mut rows = options.summary.clone();
            rows.extend(report.summary_rows());
            WriteOptions {
                summary: rows,
                ..options.clone()
            }
        };
        let path = write_table(table, dest, &options)?;
        report.output = Some(path.clone());
        Ok(Self { path, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConflictPolicy, FieldPair, UpdateMode};
    use crate::merger::Resolution;
    use crate::parser::parse_csv_str;

    fn tables() -> Vec<Table> {
        vec![
            parse_csv_str("学号,*学生姓名,成绩\n1,张三,90\n", "a.csv").unwrap(),
            parse_csv_str("学生学号,姓名,分数\n1,张三,85\n2,李四,70\n", "b.csv").unwrap(),
            parse_csv_str("班级\n一班\n", "c.csv").unwrap(),
        ]
    }

    #[test]
    fn test_merge_run_reports_every_stage() {
        let config = MergeConfig {
            fields: vec!["学号".into(), "*学生姓名".into(), "成绩".into()],
            on_conflict: ConflictPolicy::PromptCaller,
            ..MergeConfig::default()
        };
        let merged = Loaded::from_tables(tables(), Matcher::default())
            .analyze()
            .select(&config.required_fields)
            .merge(&config)
            .unwrap();

        let report = &merged.report;
        assert_eq!(report.loaded, vec!["a.csv", "b.csv", "c.csv"]);
        assert_eq!(report.selection.as_ref().unwrap().excluded[0].source_id, "c.csv");
        let merge = report.merge.as_ref().unwrap();
        assert_eq!(merge.rows_emitted, 2);
        assert_eq!(merge.conflicts[0].resolution, Resolution::Deferred);

        let resolved = merged.resolve(0, 1).unwrap();
        assert_eq!(resolved.table.value(0, "成绩").unwrap().to_string(), "85");
    }

    #[test]
    fn test_resolve_unknown_conflict_is_error() {
        let config = MergeConfig::default();
        let merged = Loaded::from_tables(tables(), Matcher::default())
            .analyze()
            .select(&config.required_fields)
            .merge(&config)
            .unwrap();
        assert!(merged.resolve(5, 0).is_err());
    }

    #[test]
    fn test_sync_run_reports_excluded_sources() {
        let target = parse_csv_str("学号,成绩\n2,\n", "target.csv").unwrap();
        let config = SyncConfig {
            key_mapping: vec![FieldPair::new("学号", "学号")],
            field_mapping: vec![FieldPair::new("成绩", "成绩")],
            update_mode: UpdateMode::FillMissingOnly,
            ..SyncConfig::default()
        };

        let synced = Loaded::from_tables(tables(), Matcher::default())
            .analyze()
            .select(&["学号".to_string()])
            .sync(&target, &config)
            .unwrap();

        assert_eq!(synced.table.value(0, "成绩").unwrap().to_string(), "70");
        let sync = synced.report.sync.as_ref().unwrap();
        assert_eq!(sync.excluded_sources.len(), 1);
        assert_eq!(sync.excluded_sources[0].source_id, "c.csv");
    }

    #[test]
    fn test_summary_rows_include_counts() {
        let config = MergeConfig::default();
        let merged = Loaded::from_tables(tables(), Matcher::default())
            .analyze()
            .select(&config.required_fields)
            .merge(&config)
            .unwrap();

        let rows = merged.report.summary_rows();
        assert!(rows.contains(&("tables loaded".to_string(), "3".to_string())));
        assert!(rows.contains(&("tables excluded".to_string(), "1".to_string())));
        assert!(rows.iter().any(|(label, _)| label == "excluded: c.csv"));
    }
}
