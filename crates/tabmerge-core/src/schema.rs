//! Schema reconciliation across tables
//!
//! Tables are processed in input order. Every column is matched against the
//! representative label of each Field created so far and attached to the best
//! match (highest confidence, earliest Field on ties); unmatched columns start
//! a new Field. A Field never takes two columns from the same table, so every
//! raw column ends up in exactly one Field.

use crate::matcher::{Confidence, Matcher};
use crate::normalize::normalize;
use crate::table::Table;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One raw column satisfying a Field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMember {
    /// Index of the table in the reconciled input list
    pub table_index: usize,
    pub source_id: String,
    /// Raw column label
    pub column: String,
    pub column_index: usize,
    /// Match strength against the Field's representative label
    pub confidence: Confidence,
}

/// A canonical semantic column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Representative label (the first column that created the Field)
    pub name: String,
    /// Normalized representative label
    pub key: String,
    pub members: Vec<FieldMember>,
}

impl Field {
    fn new(member: FieldMember) -> Self {
        Self {
            name: member.column.clone(),
            key: normalize(&member.column),
            members: vec![member],
        }
    }

    /// The column satisfying this Field in the given table
    pub fn member_in(&self, table_index: usize) -> Option<&FieldMember> {
        self.members.iter().find(|m| m.table_index == table_index)
    }

    /// Number of tables that carry this Field
    pub fn table_count(&self) -> usize {
        self.members.len()
    }

    /// Whether any member was attached on a fuzzy match only
    pub fn low_confidence(&self) -> bool {
        self.members.iter().any(|m| m.confidence == Confidence::Fuzzy)
    }
}

/// A Field resolved from a caller-supplied name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    pub index: usize,
    pub confidence: Confidence,
}

/// Mapping from Fields to the raw columns that satisfy them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSchema {
    pub fields: Vec<Field>,
    /// Number of tables that were reconciled
    pub table_count: usize,
}

impl UnifiedSchema {
    /// Reconcile the column lists of `tables`
    pub fn reconcile(tables: &[Table], matcher: &Matcher) -> Self {
        let mut fields: Vec<Field> = Vec::new();

        for (table_index, table) in tables.iter().enumerate() {
            let mut claimed: HashSet<usize> = HashSet::new();

            for column in &table.columns {
                let key = normalize(&column.name);
                let mut best: Option<(usize, Confidence)> = None;

                for (field_index, field) in fields.iter().enumerate() {
                    if claimed.contains(&field_index) {
                        continue;
                    }
                    let confidence = matcher.compare_keys(&key, &field.key);
                    let better = match best {
                        Some((_, current)) => confidence > current,
                        None => confidence.is_match(),
                    };
                    if better {
                        best = Some((field_index, confidence));
                    }
                }

                let member = |confidence| FieldMember {
                    table_index,
                    source_id: table.source_id.clone(),
                    column: column.name.clone(),
                    column_index: column.index,
                    confidence,
                };

                match best {
                    Some((field_index, confidence)) => {
                        debug!(
                            "{}: column '{}' -> field '{}' ({:?})",
                            table.source_id, column.name, fields[field_index].name, confidence
                        );
                        fields[field_index].members.push(member(confidence));
                        claimed.insert(field_index);
                    }
                    None => {
                        claimed.insert(fields.len());
                        fields.push(Field::new(member(Confidence::Exact)));
                    }
                }
            }
        }

        Self {
            fields,
            table_count: tables.len(),
        }
    }

    /// Find the Field best matching a caller-supplied name
    pub fn resolve(&self, name: &str, matcher: &Matcher) -> Option<ResolvedField> {
        let key = normalize(name);
        let mut best: Option<ResolvedField> = None;
        for (index, field) in self.fields.iter().enumerate() {
            let confidence = matcher.compare_keys(&key, &field.key);
            let better = match best {
                Some(current) => confidence > current.confidence,
                None => confidence.is_match(),
            };
            if better {
                best = Some(ResolvedField { index, confidence });
            }
        }
        best
    }

    /// Every Field whose label matches a pattern, in creation order.
    ///
    /// `*` in the pattern stands for any run of characters and the pattern
    /// is anchored at the start unless it begins with `*`. A pattern without
    /// `*` matches every label that contains it.
    pub fn expand(&self, pattern: &str) -> Vec<usize> {
        let wildcard = pattern.contains('*');
        let needle = normalize(pattern);
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| {
                if wildcard {
                    wildcard_match(pattern, &f.key)
                } else {
                    !needle.is_empty() && f.key.contains(&needle)
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// The Field a raw column of a table belongs to
    pub fn field_of(&self, table_index: usize, column_index: usize) -> Option<usize> {
        self.fields.iter().position(|f| {
            f.members
                .iter()
                .any(|m| m.table_index == table_index && m.column_index == column_index)
        })
    }

    /// Column index satisfying `field` in the given table
    pub fn column_for(&self, field: usize, table_index: usize) -> Option<usize> {
        self.fields
            .get(field)
            .and_then(|f| f.member_in(table_index))
            .map(|m| m.column_index)
    }

    /// Field statistics report, in Field creation order
    pub fn report(&self) -> FieldReport {
        FieldReport {
            table_count: self.table_count,
            fields: self
                .fields
                .iter()
                .map(|f| FieldStat {
                    name: f.name.clone(),
                    table_count: f.table_count(),
                    low_confidence: f.low_confidence(),
                    members: f.members.clone(),
                })
                .collect(),
        }
    }
}

/// Match a normalized key against a `*` pattern, piece by piece
fn wildcard_match(pattern: &str, key: &str) -> bool {
    let anchored = !pattern.trim_start().starts_with('*');
    let pieces = pattern.split('*').map(normalize).filter(|p| !p.is_empty());
    let mut rest = key;

    for (i, piece) in pieces.enumerate() {
        let found = if i == 0 && anchored {
            rest.strip_prefix(piece.as_str())
        } else {
            rest.find(piece.as_str()).map(|pos| &rest[pos + piece.len()..])
        };
        match found {
            Some(remaining) => rest = remaining,
            None => return false,
        }
    }
    true
}

/// Which tables and columns satisfy one Field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStat {
    pub name: String,
    pub table_count: usize,
    pub low_confidence: bool,
    pub members: Vec<FieldMember>,
}

/// Field statistics report produced by reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldReport {
    pub table_count: usize,
    pub fields: Vec<FieldStat>,
}

impl FieldReport {
    /// Fields sorted by how many tables carry them, most common first
    pub fn by_frequency(&self) -> Vec<&FieldStat> {
        let mut stats: Vec<&FieldStat> = self.fields.iter().collect();
        stats.sort_by(|a, b| b.table_count.cmp(&a.table_count));
        stats
    }

    /// Fields present in every table
    pub fn common_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.table_count == self.table_count)
            .map(|f| f.name.as_str())
            .collect()
    }
}
