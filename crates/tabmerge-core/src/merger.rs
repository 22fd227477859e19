//! Merge engine for combining selected tables with provenance tracking

use crate::config::{ConflictPolicy, DedupPolicy, MergeConfig};
use crate::error::{Error, Result};
use crate::matcher::{Confidence, Matcher};
use crate::normalize::normalize;
use crate::schema::UnifiedSchema;
use crate::selector::Selection;
use crate::table::{CellValue, Table};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Source id given to merged output tables
pub const MERGED_SOURCE_ID: &str = "merged";

/// Label fragments marking a column as a money amount
const MONEY_KEYWORDS: &[&str] = &[
    "金额", "价格", "price", "amount", "费用", "成本", "money", "元", "￥", "$", "¥",
];

/// Whether values under this label compare as money amounts
pub fn is_money_label(label: &str) -> bool {
    let label = label.to_lowercase();
    MONEY_KEYWORDS.iter().any(|k| label.contains(k))
}

/// One output column and the Field feeding it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    /// Output column label
    pub name: String,
    /// Name the caller asked for
    pub requested: String,
    pub field: Option<usize>,
    pub confidence: Confidence,
    /// One of the Fields a pattern or partial name expanded to
    pub expanded: bool,
}

impl OutputField {
    /// Whether the column was picked on a fuzzy match only
    pub fn low_confidence(&self) -> bool {
        self.field.is_some() && self.confidence == Confidence::Fuzzy
    }

    /// Resolve requested output names against the schema.
    ///
    /// An exact or synonym match yields one column. Otherwise the name is
    /// expanded: a name containing `*` is a wildcard over Field labels, any
    /// other name matches every Field whose label contains it. Fields already
    /// taken by an earlier name are not expanded to again.
    pub fn resolve_all(
        names: &[String],
        schema: &UnifiedSchema,
        matcher: &Matcher,
    ) -> Vec<Self> {
        let mut fields = Vec::new();
        let mut used: HashSet<usize> = HashSet::new();

        for name in names {
            let resolved = schema.resolve(name, matcher);
            if let Some(r) = resolved.filter(|r| r.confidence >= Confidence::Synonym) {
                used.insert(r.index);
                fields.push(Self {
                    name: name.clone(),
                    requested: name.clone(),
                    field: Some(r.index),
                    confidence: r.confidence,
                    expanded: false,
                });
                continue;
            }

            let matches: Vec<usize> = schema
                .expand(name)
                .into_iter()
                .filter(|i| !used.contains(i))
                .collect();
            let wildcard = name.contains('*');

            if matches.is_empty() {
                fields.push(Self {
                    name: name.clone(),
                    requested: name.clone(),
                    field: resolved.map(|r| r.index),
                    confidence: resolved.map_or(Confidence::None, |r| r.confidence),
                    expanded: false,
                });
            } else if matches.len() == 1 && !wildcard {
                used.insert(matches[0]);
                fields.push(Self {
                    name: name.clone(),
                    requested: name.clone(),
                    field: Some(matches[0]),
                    confidence: Confidence::Fuzzy,
                    expanded: false,
                });
            } else {
                for index in matches {
                    used.insert(index);
                    fields.push(Self {
                        name: schema.fields[index].name.clone(),
                        requested: name.clone(),
                        field: Some(index),
                        confidence: Confidence::Fuzzy,
                        expanded: true,
                    });
                }
            }
        }

        fields
    }
}

/// The schema restricted to the fields a merge keeps, plus dedup settings
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// Output fields in order; a field with no Field behind it is always filled
    pub fields: Vec<OutputField>,
    pub provenance_column: String,
    pub source_path_column: Option<String>,
    pub missing_fill: CellValue,
    pub dedup: DedupPlan,
}

/// Deduplication with key names resolved to output positions
#[derive(Debug, Clone, PartialEq)]
pub enum DedupPlan {
    KeepAll,
    ByKey {
        key: Vec<usize>,
        on_conflict: ConflictPolicy,
    },
}

impl MergePlan {
    /// Restrict `schema` to the fields named in `config`
    pub fn new(schema: &UnifiedSchema, config: &MergeConfig, matcher: &Matcher) -> Result<Self> {
        config.validate()?;
        let fields = OutputField::resolve_all(config.output_fields(), schema, matcher);

        let dedup = match config.dedup_policy() {
            DedupPolicy::KeepAll => DedupPlan::KeepAll,
            DedupPolicy::MergeByKey { key, on_conflict } => DedupPlan::ByKey {
                key: key
                    .iter()
                    .map(|name| key_position(name, &fields, matcher))
                    .collect::<Result<Vec<_>>>()?,
                on_conflict,
            },
        };

        Ok(Self {
            fields,
            provenance_column: config.provenance_column.clone(),
            source_path_column: config.source_path_column.clone(),
            missing_fill: config
                .missing_fill
                .clone()
                .map(CellValue::Text)
                .unwrap_or(CellValue::Empty),
            dedup,
        })
    }

    /// Output column labels: fields, then provenance columns
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.iter().map(|f| f.name.clone()).collect();
        names.push(self.provenance_column.clone());
        if let Some(path_column) = &self.source_path_column {
            names.push(path_column.clone());
        }
        names
    }

    fn blank_markers(&self) -> Vec<String> {
        match &self.missing_fill {
            CellValue::Text(marker) => vec![marker.clone()],
            _ => Vec::new(),
        }
    }
}

/// Position of the output field best matching a dedup key name
fn key_position(name: &str, fields: &[OutputField], matcher: &Matcher) -> Result<usize> {
    let key = normalize(name);
    fields
        .iter()
        .enumerate()
        .map(|(i, f)| (i, matcher.compare_keys(&key, &normalize(&f.name))))
        .filter(|(_, confidence)| confidence.is_match())
        .fold(None, |best: Option<(usize, _)>, (i, confidence)| match best {
            Some((_, current)) if current >= confidence => best,
            _ => Some((i, confidence)),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| {
            Error::InvalidConfig(format!("dedup key '{name}' is not one of the output fields"))
        })
}

/// What happened to a duplicate group with conflicting values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    KeptFirst,
    /// First variant emitted as a placeholder; the caller picks the final one
    Deferred,
    EmittedVariants,
    Skipped,
    MostFrequent,
}

/// One distinct version of a record inside a conflicting group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictVariant {
    /// Values for the output fields, in output order
    pub values: Vec<CellValue>,
    pub sources: Vec<String>,
}

/// A duplicate group whose non-key fields disagree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Key tuple shared by the group
    pub key: Vec<String>,
    /// Output fields with more than one distinct non-blank value
    pub fields: Vec<String>,
    pub variants: Vec<ConflictVariant>,
    pub resolution: Resolution,
    /// Output row holding the (first) emitted record, if any
    pub row_index: Option<usize>,
}

/// Counts and descriptors produced by a merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub rows_read: usize,
    pub rows_emitted: usize,
    pub duplicates_merged: usize,
    pub conflicts_flagged: usize,
    /// Rows dropped with their group under the skip-conflicting policy
    pub rows_skipped: usize,
    /// Source ids of the merged tables, in merge order
    pub tables: Vec<String>,
    /// How each output column was resolved
    pub fields: Vec<OutputField>,
    /// Output fields that matched no column in any table
    pub unresolved_fields: Vec<String>,
    pub conflicts: Vec<Conflict>,
}

/// Result of [`merge_tables`]
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: Table,
    pub report: MergeReport,
}

/// A collected row before provenance is rendered
#[derive(Debug, Clone)]
struct Pending {
    values: Vec<CellValue>,
    sources: Vec<String>,
    paths: Vec<String>,
}

impl Pending {
    fn absorb_provenance(&mut self, other: &Pending) {
        for s in &other.sources {
            if !self.sources.contains(s) {
                self.sources.push(s.clone());
            }
        }
        for p in &other.paths {
            if !self.paths.contains(p) {
                self.paths.push(p.clone());
            }
        }
    }

    /// Fill blank values from `other` and take over its provenance
    fn absorb(&mut self, other: &Pending, values: &ValueCompare) {
        for (slot, value) in self.values.iter_mut().zip(&other.values) {
            if values.is_blank(slot) && !values.is_blank(value) {
                *slot = value.clone();
            }
        }
        self.absorb_provenance(other);
    }
}

/// Value equality inside duplicate groups: blanks never disagree, money
/// columns compare by amount
struct ValueCompare {
    markers: Vec<String>,
    money: Vec<bool>,
}

impl ValueCompare {
    fn new(plan: &MergePlan) -> Self {
        Self {
            markers: plan.blank_markers(),
            money: plan.fields.iter().map(|f| is_money_label(&f.name)).collect(),
        }
    }

    fn is_blank(&self, value: &CellValue) -> bool {
        value.is_blank(&self.markers)
    }

    /// Comparison key of the value at output position `p`
    fn key(&self, p: usize, value: &CellValue) -> String {
        if self.money[p] {
            if let Some(amount) = value.money_amount() {
                return format!("{amount:.2}");
            }
        }
        value.compare_key()
    }

    /// Whether two rows agree on every position in `positions`
    fn agree(&self, a: &Pending, b: &Pending, positions: &[usize]) -> bool {
        positions.iter().all(|&p| {
            let (x, y) = (&a.values[p], &b.values[p]);
            self.is_blank(x) || self.is_blank(y) || self.key(p, x) == self.key(p, y)
        })
    }
}

enum Slot {
    Single(Pending),
    Group(usize),
}

/// Merge the selected tables under `plan`
pub fn merge_tables(
    tables: &[Table],
    schema: &UnifiedSchema,
    selection: &Selection,
    plan: &MergePlan,
) -> MergeOutcome {
    let mut report = MergeReport {
        fields: plan.fields.clone(),
        unresolved_fields: plan
            .fields
            .iter()
            .filter(|f| f.field.is_none())
            .map(|f| f.name.clone())
            .collect(),
        ..MergeReport::default()
    };
    for name in &report.unresolved_fields {
        warn!("output field '{}' matches no column, filling it for every row", name);
    }
    for field in report.fields.iter().filter(|f| f.low_confidence()) {
        if field.expanded {
            info!("output field '{}' expands to '{}'", field.requested, field.name);
        } else {
            warn!("output field '{}' resolved on a fuzzy match only", field.requested);
        }
    }

    let mut collected = Vec::new();
    for (table_index, table) in selection.included_tables(tables) {
        let columns: Vec<Option<usize>> = plan
            .fields
            .iter()
            .map(|f| f.field.and_then(|field| schema.column_for(field, table_index)))
            .collect();
        let path = table
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| table.source_id.clone());

        for row in &table.rows {
            let values = columns
                .iter()
                .map(|col| match col {
                    Some(idx) => row.get(*idx).cloned().unwrap_or(CellValue::Empty),
                    None => plan.missing_fill.clone(),
                })
                .collect();
            collected.push(Pending {
                values,
                sources: vec![table.source_id.clone()],
                paths: vec![path.clone()],
            });
        }

        debug!("collected {} row(s) from {}", table.row_count(), table.source_id);
        report.rows_read += table.row_count();
        report.tables.push(table.source_id.clone());
    }

    let rows = match &plan.dedup {
        DedupPlan::KeepAll => collected,
        DedupPlan::ByKey { key, on_conflict } => {
            dedup_rows(collected, key, *on_conflict, plan, &mut report)
        }
    };

    let mut table = Table::with_columns(MERGED_SOURCE_ID, &plan.column_names());
    for row in rows {
        let mut cells = row.values;
        cells.push(CellValue::Text(row.sources.join(", ")));
        if plan.source_path_column.is_some() {
            cells.push(CellValue::Text(row.paths.join(", ")));
        }
        table.push_row(cells);
    }
    report.rows_emitted = table.row_count();

    info!(
        "merged {} row(s) from {} table(s) into {} row(s): {} duplicate(s) merged, {} conflict(s)",
        report.rows_read,
        report.tables.len(),
        report.rows_emitted,
        report.duplicates_merged,
        report.conflicts_flagged
    );

    MergeOutcome { table, report }
}

fn dedup_rows(
    rows: Vec<Pending>,
    key: &[usize],
    on_conflict: ConflictPolicy,
    plan: &MergePlan,
    report: &mut MergeReport,
) -> Vec<Pending> {
    let values = ValueCompare::new(plan);
    let mut slots: Vec<Slot> = Vec::new();
    let mut groups: Vec<(Vec<String>, Vec<Pending>)> = Vec::new();
    let mut group_by_key: HashMap<Vec<String>, usize> = HashMap::new();

    for row in rows {
        // Rows with a blank key component never count as duplicates
        if key.iter().any(|&k| values.is_blank(&row.values[k])) {
            slots.push(Slot::Single(row));
            continue;
        }
        let tuple: Vec<String> = key.iter().map(|&k| values.key(k, &row.values[k])).collect();
        match group_by_key.get(&tuple) {
            Some(&g) => groups[g].1.push(row),
            None => {
                group_by_key.insert(tuple.clone(), groups.len());
                slots.push(Slot::Group(groups.len()));
                groups.push((tuple, vec![row]));
            }
        }
    }

    let non_key: Vec<usize> = (0..plan.fields.len()).filter(|i| !key.contains(i)).collect();
    let mut groups: Vec<Option<(Vec<String>, Vec<Pending>)>> =
        groups.into_iter().map(Some).collect();
    let mut out = Vec::new();

    for slot in slots {
        let (tuple, members) = match slot {
            Slot::Single(row) => {
                out.push(row);
                continue;
            }
            Slot::Group(g) => match groups[g].take() {
                Some(group) => group,
                None => continue,
            },
        };
        if members.len() == 1 {
            out.extend(members);
            continue;
        }

        let conflicting: Vec<usize> = non_key
            .iter()
            .copied()
            .filter(|&p| distinct_values(&members, p, &values).len() > 1)
            .collect();

        if conflicting.is_empty() {
            report.duplicates_merged += members.len() - 1;
            out.push(coalesce(&members, &values));
            continue;
        }

        report.conflicts_flagged += 1;
        let variants = distinct_variants(&members, &non_key, &values);
        let mut conflict = Conflict {
            key: tuple,
            fields: conflicting.iter().map(|&p| plan.fields[p].name.clone()).collect(),
            variants: variants
                .iter()
                .map(|v| ConflictVariant {
                    values: v.values.clone(),
                    sources: v.sources.clone(),
                })
                .collect(),
            resolution: Resolution::KeptFirst,
            row_index: Some(out.len()),
        };
        warn!(
            "duplicate key {:?} has conflicting values in {:?} ({:?})",
            conflict.key, conflict.fields, on_conflict
        );

        match on_conflict {
            ConflictPolicy::KeepFirst | ConflictPolicy::PromptCaller => {
                report.duplicates_merged += members.len() - 1;
                if on_conflict == ConflictPolicy::PromptCaller {
                    conflict.resolution = Resolution::Deferred;
                }
                out.push(coalesce(&members, &values));
            }
            ConflictPolicy::EmitAllVariants => {
                report.duplicates_merged += members.len() - variants.len();
                conflict.resolution = Resolution::EmittedVariants;
                out.extend(variants);
            }
            ConflictPolicy::SkipConflicting => {
                report.rows_skipped += members.len();
                conflict.resolution = Resolution::Skipped;
                conflict.row_index = None;
            }
            ConflictPolicy::MostFrequent => {
                report.duplicates_merged += members.len() - 1;
                conflict.resolution = Resolution::MostFrequent;
                let mut merged = coalesce(&members, &values);
                for &p in &conflicting {
                    if let Some(value) = most_frequent(&members, p, &values) {
                        merged.values[p] = value;
                    }
                }
                out.push(merged);
            }
        }
        report.conflicts.push(conflict);
    }

    out
}

/// Distinct non-blank values at position `p`, first-seen order
fn distinct_values(members: &[Pending], p: usize, values: &ValueCompare) -> Vec<String> {
    let mut seen = Vec::new();
    for m in members {
        let value = &m.values[p];
        if values.is_blank(value) {
            continue;
        }
        let key = values.key(p, value);
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen
}

/// The first member, with blanks filled from later members and all provenance
fn coalesce(members: &[Pending], values: &ValueCompare) -> Pending {
    let mut merged = members[0].clone();
    for other in &members[1..] {
        merged.absorb(other, values);
    }
    merged
}

/// Members folded into variants that disagree on at least one non-key value.
///
/// A member joins the first variant it agrees with (blanks agree with
/// anything) and fills that variant's blanks.
fn distinct_variants(
    members: &[Pending],
    non_key: &[usize],
    values: &ValueCompare,
) -> Vec<Pending> {
    let mut variants: Vec<Pending> = Vec::new();
    for m in members {
        match variants.iter_mut().find(|v| values.agree(v, m, non_key)) {
            Some(existing) => existing.absorb(m, values),
            None => variants.push(m.clone()),
        }
    }
    variants
}

fn most_frequent(members: &[Pending], p: usize, values: &ValueCompare) -> Option<CellValue> {
    let mut counts: Vec<(String, usize, &CellValue)> = Vec::new();
    for m in members {
        let value = &m.values[p];
        if values.is_blank(value) {
            continue;
        }
        let key = values.key(p, value);
        match counts.iter_mut().find(|(k, _, _)| *k == key) {
            Some(entry) => entry.1 += 1,
            None => counts.push((key, 1, value)),
        }
    }
    // max_by_key keeps the last maximum; iterate reversed so ties go to the first seen
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, n, _)| *n)
        .map(|(_, _, value)| value.clone())
}

/// Replace the placeholder row of a deferred conflict with the chosen variant
pub fn apply_resolution(table: &Table, conflict: &Conflict, choice: usize) -> Result<Table> {
    let invalid = || Error::InvalidResolution {
        key: conflict.key.clone(),
        choice,
        available: conflict.variants.len(),
    };
    let variant = conflict.variants.get(choice).ok_or_else(invalid)?;
    let row_index = conflict.row_index.ok_or_else(invalid)?;

    let mut resolved = table.clone();
    let row = resolved.rows.get_mut(row_index).ok_or_else(invalid)?;
    for (cell, value) in row.cells.iter_mut().zip(&variant.values) {
        *cell = value.clone();
    }
    Ok(resolved)
}
