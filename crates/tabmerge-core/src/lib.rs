//! tabmerge-core: Core library for reconciling, merging and synchronising spreadsheets
//!
//! This library provides functionality to:
//! - Load every CSV/XLSX/XLS/ODS file in a folder as a table
//! - Normalize and match column labels that mean the same thing
//! - Reconcile labels across tables into one unified schema
//! - Select tables carrying required fields and merge them with deduplication
//! - Sync a target table from keyed source tables
//! - Write results to CSV or XLSX without leaving partial files behind

pub mod config;
pub mod error;
pub mod matcher;
pub mod merger;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod scanner;
pub mod schema;
pub mod selector;
pub mod sync;
pub mod table;
pub mod writer;

pub use config::{
    ConflictPolicy, DedupPolicy, FieldPair, MatchingConfig, MergeConfig, SyncConfig, UpdateMode,
};
pub use error::{Error, Result};
pub use matcher::{Confidence, Matcher, SynonymGroup, VariantTable};
pub use merger::{
    apply_resolution, merge_tables, Conflict, MergeOutcome, MergePlan, MergeReport, OutputField,
};
pub use normalize::normalize;
pub use parser::{parse_csv, parse_file, parse_workbook};
pub use pipeline::{FieldsAnalyzed, FilesSelected, Loaded, Merged, RunReport, Synced, Written};
pub use scanner::{load_folder, LoadFailure, LoadOptions, LoadedFolder};
pub use schema::{Field, FieldReport, UnifiedSchema};
pub use selector::{select, Exclusion, Selection};
pub use sync::{sync_tables, SyncOutcome, SyncReport};
pub use table::{CellValue, Column, Row, Table};
pub use writer::{write_table, WriteOptions};
