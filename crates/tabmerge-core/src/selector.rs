//! Table selection by required fields

use crate::matcher::Matcher;
use crate::schema::UnifiedSchema;
use crate::table::Table;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A caller-requested field name and the Field it resolved to, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedField {
    pub name: String,
    pub field: Option<usize>,
}

impl RequestedField {
    /// Resolve each name against the schema, keeping the caller's order
    pub fn resolve_all(names: &[String], schema: &UnifiedSchema, matcher: &Matcher) -> Vec<Self> {
        names
            .iter()
            .map(|name| Self {
                name: name.clone(),
                field: schema.resolve(name, matcher).map(|r| r.index),
            })
            .collect()
    }
}

/// A table left out of an operation, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub table_index: usize,
    pub source_id: String,
    /// Requested names the table has no column for
    pub missing: Vec<String>,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: missing field(s) {}",
            self.source_id,
            self.missing.join(", ")
        )
    }
}

/// Outcome of [`select`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub required: Vec<RequestedField>,
    /// Indices of tables carrying every required field, in input order
    pub included: Vec<usize>,
    pub excluded: Vec<Exclusion>,
}

impl Selection {
    /// The included tables paired with their indices
    pub fn included_tables<'a>(
        &'a self,
        tables: &'a [Table],
    ) -> impl Iterator<Item = (usize, &'a Table)> + 'a {
        self.included.iter().map(move |&i| (i, &tables[i]))
    }

    pub fn is_included(&self, table_index: usize) -> bool {
        self.included.contains(&table_index)
    }
}

/// Split `tables` into those that carry every required field and those that don't
pub fn select(
    tables: &[Table],
    schema: &UnifiedSchema,
    required: &[String],
    matcher: &Matcher,
) -> Selection {
    let required = RequestedField::resolve_all(required, schema, matcher);
    let mut included = Vec::new();
    let mut excluded = Vec::new();

    for (table_index, table) in tables.iter().enumerate() {
        let missing: Vec<String> = required
            .iter()
            .filter(|r| match r.field {
                Some(field) => schema.column_for(field, table_index).is_none(),
                None => true,
            })
            .map(|r| r.name.clone())
            .collect();

        if missing.is_empty() {
            included.push(table_index);
        } else {
            let exclusion = Exclusion {
                table_index,
                source_id: table.source_id.clone(),
                missing,
            };
            warn!("excluding {}", exclusion);
            excluded.push(exclusion);
        }
    }

    info!(
        "selected {} of {} table(s)",
        included.len(),
        tables.len()
    );

    Selection {
        required,
        included,
        excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_table_missing_required_field_is_excluded() {
        let tables = vec![
            Table::with_columns("a.xlsx", &["学号", "学生姓名"]),
            Table::with_columns("b.xlsx", &["学号", "班级"]),
        ];
        let matcher = Matcher::default();
        let schema = UnifiedSchema::reconcile(&tables, &matcher);

        let selection = select(&tables, &schema, &names(&["学号", "*学生姓名"]), &matcher);

        assert_eq!(selection.included, vec![0]);
        assert_eq!(selection.excluded.len(), 1);
        assert_eq!(selection.excluded[0].source_id, "b.xlsx");
        assert_eq!(selection.excluded[0].missing, names(&["*学生姓名"]));
        assert!(selection.excluded[0].to_string().contains("*学生姓名"));
    }

    #[test]
    fn test_unknown_required_field_excludes_everything() {
        let tables = vec![Table::with_columns("a.csv", &["学号"])];
        let matcher = Matcher::default();
        let schema = UnifiedSchema::reconcile(&tables, &matcher);

        let selection = select(&tables, &schema, &names(&["家庭住址"]), &matcher);

        assert!(selection.included.is_empty());
        assert_eq!(selection.required[0].field, None);
        assert_eq!(selection.excluded[0].missing, names(&["家庭住址"]));
    }

    #[test]
    fn test_no_required_fields_includes_all() {
        let tables = vec![
            Table::with_columns("a.csv", &["x"]),
            Table::with_columns("b.csv", &["y"]),
        ];
        let matcher = Matcher::default();
        let schema = UnifiedSchema::reconcile(&tables, &matcher);

        let selection = select(&tables, &schema, &[], &matcher);
        assert_eq!(selection.included, vec![0, 1]);
        assert_eq!(selection.included_tables(&tables).count(), 2);
    }
}
