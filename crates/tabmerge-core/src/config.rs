//! Pipeline configuration
//!
//! Every pipeline run receives its options explicitly; defaults live in the
//! `Default` impls below. Configs round-trip through JSON so a run can be
//! described in a file and replayed.

use crate::error::{Error, Result};
use crate::matcher::{Matcher, VariantTable, DEFAULT_FUZZY_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Column name for the provenance field added by merges
pub const DEFAULT_PROVENANCE_COLUMN: &str = "source_file";

/// How conflicting non-key values inside a duplicate group are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the first record of the group
    #[default]
    KeepFirst,
    /// Keep the first record provisionally and hand a conflict descriptor to the caller
    PromptCaller,
    /// Emit one record per distinct variant
    EmitAllVariants,
    /// Drop the whole group
    SkipConflicting,
    /// Per conflicting field, take the most frequent non-blank value
    MostFrequent,
}

/// Deduplication applied after rows are collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupPolicy {
    KeepAll,
    MergeByKey {
        key: Vec<String>,
        on_conflict: ConflictPolicy,
    },
}

/// How matched source values are written into the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateMode {
    /// Only fill target cells that are empty or hold a placeholder marker
    #[default]
    FillMissingOnly,
    /// Replace target cells whenever the source has a value
    OverwriteAlways,
}

/// Label matching options shared by merge and sync runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// External variant table; the built-in table is used when unset
    pub variants_file: Option<PathBuf>,
    pub fuzzy_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            variants_file: None,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

impl MatchingConfig {
    /// Build the matcher described by this config
    pub fn matcher(&self) -> Result<Matcher> {
        let variants = match &self.variants_file {
            Some(path) => VariantTable::load(path)?,
            None => VariantTable::builtin(),
        };
        Matcher::new(&variants, self.fuzzy_threshold)
    }
}

/// Options for a merge run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Fields a table must carry to take part in the merge
    pub required_fields: Vec<String>,
    /// Output fields in order; the required fields when empty
    pub fields: Vec<String>,
    pub deduplicate: bool,
    /// Key tuple for deduplication; the required fields when empty
    pub dedup_key: Vec<String>,
    pub on_conflict: ConflictPolicy,
    /// Text written where a table lacks an output field; empty cell when unset
    pub missing_fill: Option<String>,
    pub provenance_column: String,
    /// Extra provenance column holding the full source path
    pub source_path_column: Option<String>,
    pub matching: MatchingConfig,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            required_fields: vec!["学号".to_string(), "*学生姓名".to_string()],
            fields: Vec::new(),
            deduplicate: true,
            dedup_key: Vec::new(),
            on_conflict: ConflictPolicy::default(),
            missing_fill: None,
            provenance_column: DEFAULT_PROVENANCE_COLUMN.to_string(),
            source_path_column: None,
            matching: MatchingConfig::default(),
        }
    }
}

impl MergeConfig {
    /// Output fields in order
    pub fn output_fields(&self) -> &[String] {
        if self.fields.is_empty() {
            &self.required_fields
        } else {
            &self.fields
        }
    }

    /// The dedup policy implied by `deduplicate`, `dedup_key` and `on_conflict`
    pub fn dedup_policy(&self) -> DedupPolicy {
        if !self.deduplicate {
            return DedupPolicy::KeepAll;
        }
        let key = if self.dedup_key.is_empty() {
            self.required_fields.clone()
        } else {
            self.dedup_key.clone()
        };
        DedupPolicy::MergeByKey {
            key,
            on_conflict: self.on_conflict,
        }
    }

    /// Reject configs that cannot produce a meaningful merge
    pub fn validate(&self) -> Result<()> {
        if self.output_fields().is_empty() {
            return Err(Error::InvalidConfig(
                "merge needs at least one output field".to_string(),
            ));
        }
        if self.provenance_column.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "provenance column name must not be empty".to_string(),
            ));
        }
        if self.deduplicate && self.dedup_key.is_empty() && self.required_fields.is_empty() {
            return Err(Error::InvalidConfig(
                "deduplication needs a key: set dedup_key or required_fields".to_string(),
            ));
        }
        check_unique("output field", self.output_fields().iter())
    }

    /// Load a merge config from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path.as_ref())
    }

    /// Save the merge config to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path.as_ref())
    }
}

/// A (target field, source field) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPair {
    pub target: String,
    pub source: String,
}

impl FieldPair {
    pub fn new(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
        }
    }
}

/// Options for a sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Join key, target side first
    pub key_mapping: Vec<FieldPair>,
    /// Target fields filled or overwritten from the matched source row
    pub field_mapping: Vec<FieldPair>,
    pub update_mode: UpdateMode,
    /// Text values treated as empty in target cells (e.g. "<空值>")
    pub empty_markers: Vec<String>,
    pub matching: MatchingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            key_mapping: vec![FieldPair::new("学号", "学号")],
            field_mapping: Vec::new(),
            update_mode: UpdateMode::default(),
            empty_markers: vec!["<空值>".to_string()],
            matching: MatchingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Reject configs that cannot produce a meaningful sync
    pub fn validate(&self) -> Result<()> {
        if self.key_mapping.is_empty() {
            return Err(Error::InvalidConfig(
                "sync needs at least one key mapping pair".to_string(),
            ));
        }
        if self.field_mapping.is_empty() {
            return Err(Error::InvalidConfig(
                "sync needs at least one field mapping entry".to_string(),
            ));
        }
        check_unique("mapped target field", self.field_mapping.iter().map(|p| &p.target))
    }

    /// Load a sync config from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path.as_ref())
    }

    /// Save the sync config to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path.as_ref())
    }
}

fn check_unique<'a>(what: &str, names: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(Error::InvalidConfig(format!("duplicate {what} '{name}'")));
        }
    }
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(Error::Json)
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_defaults() {
        let config = MergeConfig::default();
        assert_eq!(config.output_fields(), &["学号".to_string(), "*学生姓名".to_string()]);
        assert_eq!(
            config.dedup_policy(),
            DedupPolicy::MergeByKey {
                key: vec!["学号".to_string(), "*学生姓名".to_string()],
                on_conflict: ConflictPolicy::KeepFirst,
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dedup_disabled_keeps_all() {
        let config = MergeConfig {
            deduplicate: false,
            ..MergeConfig::default()
        };
        assert_eq!(config.dedup_policy(), DedupPolicy::KeepAll);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"required_fields": ["id"], "on_conflict": "emit-all-variants"}"#;
        let config: MergeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.required_fields, vec!["id".to_string()]);
        assert_eq!(config.on_conflict, ConflictPolicy::EmitAllVariants);
        assert_eq!(config.provenance_column, DEFAULT_PROVENANCE_COLUMN);
        assert_eq!(config.matching.fuzzy_threshold, DEFAULT_FUZZY_THRESHOLD);
    }

    #[test]
    fn test_duplicate_output_fields_rejected() {
        let config = MergeConfig {
            fields: vec!["a".to_string(), "a".to_string()],
            ..MergeConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_sync_config_requires_mapping() {
        let config = SyncConfig::default();
        assert!(config.validate().is_err());

        let config = SyncConfig {
            field_mapping: vec![FieldPair::new("grade", "grade")],
            ..SyncConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_update_mode_serialization() {
        let json = serde_json::to_string(&UpdateMode::OverwriteAlways).unwrap();
        assert_eq!(json, "\"overwrite-always\"");
    }

    #[test]
    fn test_invalid_threshold_surfaces_as_config_error() {
        let matching = MatchingConfig {
            variants_file: None,
            fuzzy_threshold: 2.0,
        };
        assert!(matches!(matching.matcher(), Err(Error::InvalidConfig(_))));
    }
}
