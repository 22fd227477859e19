//! Similarity matching between column labels
//!
//! Two labels are compared on their normalized keys. Equal keys are an
//! [`Confidence::Exact`] match, labels grouped together in the
//! [`VariantTable`] are a [`Confidence::Synonym`] match, and otherwise a
//! containment / character-bigram Jaccard heuristic decides whether they are
//! a [`Confidence::Fuzzy`] match. Synonyms are looked up before fuzzy scoring
//! because short labels such as "学号" and "编号" share no characters.

use crate::error::{Error, Result};
use crate::normalize::normalize;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Default Jaccard threshold for fuzzy matches
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

const BUILTIN_VARIANTS: &str = include_str!("../data/variants.json");

/// How confidently two labels denote the same field, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    None,
    Fuzzy,
    Synonym,
    Exact,
}

impl Confidence {
    /// Any confidence other than [`Confidence::None`]
    pub fn is_match(self) -> bool {
        self > Confidence::None
    }
}

/// One set of labels that all name the same field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynonymGroup {
    /// Preferred label for the group
    pub canonical: String,
    /// All accepted spellings, the canonical one included or not
    pub variants: Vec<String>,
}

/// Versioned synonym/variant table injected into the [`Matcher`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantTable {
    pub version: u32,
    pub groups: Vec<SynonymGroup>,
}

impl VariantTable {
    /// The table shipped with the crate (`data/variants.json`)
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_VARIANTS).expect("embedded variant table is valid JSON")
    }

    /// A table without any synonym groups
    pub fn empty() -> Self {
        Self {
            version: 0,
            groups: Vec::new(),
        }
    }

    /// Load a variant table from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save the variant table to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl Default for VariantTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Label matcher built from a variant table and a fuzzy threshold
#[derive(Debug, Clone)]
pub struct Matcher {
    /// normalized label -> indices of the groups it belongs to
    groups_by_key: HashMap<String, Vec<usize>>,
    threshold: f64,
}

impl Matcher {
    /// Create a matcher; the threshold must lie in `(0, 1]`
    pub fn new(variants: &VariantTable, threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "fuzzy threshold must be in (0, 1], got {threshold}"
            )));
        }
        Ok(Self::build(variants, threshold))
    }

    /// Matcher over the given table with the default threshold
    pub fn with_table(variants: &VariantTable) -> Self {
        Self::build(variants, DEFAULT_FUZZY_THRESHOLD)
    }

    fn build(variants: &VariantTable, threshold: f64) -> Self {
        let mut groups_by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, group) in variants.groups.iter().enumerate() {
            let labels = std::iter::once(&group.canonical).chain(group.variants.iter());
            for label in labels {
                let ids = groups_by_key.entry(normalize(label)).or_default();
                if !ids.contains(&idx) {
                    ids.push(idx);
                }
            }
        }

        Self {
            groups_by_key,
            threshold,
        }
    }

    /// Fuzzy threshold in use
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare two raw labels
    pub fn compare(&self, a: &str, b: &str) -> Confidence {
        self.compare_keys(&normalize(a), &normalize(b))
    }

    /// Compare two already-normalized keys
    pub fn compare_keys(&self, a: &str, b: &str) -> Confidence {
        if a == b {
            return Confidence::Exact;
        }
        if a.is_empty() || b.is_empty() {
            return Confidence::None;
        }
        if self.are_synonyms(a, b) {
            return Confidence::Synonym;
        }
        if a.contains(b) || b.contains(a) || bigram_jaccard(a, b) >= self.threshold {
            return Confidence::Fuzzy;
        }
        Confidence::None
    }

    fn are_synonyms(&self, a: &str, b: &str) -> bool {
        match (self.groups_by_key.get(a), self.groups_by_key.get(b)) {
            (Some(ga), Some(gb)) => ga.iter().any(|g| gb.contains(g)),
            _ => false,
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::with_table(&VariantTable::builtin())
    }
}

/// Jaccard index over the character bigrams of two keys.
///
/// A single-character key counts as one gram made of that character.
pub fn bigram_jaccard(a: &str, b: &str) -> f64 {
    let ga = bigrams(a);
    let gb = bigrams(b);
    if ga.is_empty() && gb.is_empty() {
        return 1.0;
    }
    let shared = ga.intersection(&gb).count();
    let total = ga.union(&gb).count();
    shared as f64 / total as f64
}

fn bigrams(key: &str) -> HashSet<(char, Option<char>)> {
    let chars: Vec<char> = key.chars().collect();
    match chars.len() {
        0 => HashSet::new(),
        1 => HashSet::from([(chars[0], None)]),
        _ => chars.windows(2).map(|w| (w[0], Some(w[1]))).collect(),
    }
}
