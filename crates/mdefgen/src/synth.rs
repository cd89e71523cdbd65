//! Query synthesis policies.
//!
//! Every policy walks the document's flattened table order, so the same
//! document, sampled values and seed always yield the same query list.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mdefgen_error::{MdefError, Result};

use crate::metadata::MetadataDocument;
use crate::values::TableColumnValues;

/// Named query batches understood by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueryPolicy {
    #[serde(rename = "SQL_SELECT_ALL")]
    SelectAll,
    #[serde(rename = "SQL_SELECT_TOP")]
    SelectTop,
    #[serde(rename = "SQL_AND_OR")]
    AndOr,
    #[serde(rename = "SQL_ORDER_BY")]
    OrderBy,
}

impl QueryPolicy {
    pub const ALL: [Self; 4] = [Self::SelectAll, Self::SelectTop, Self::AndOr, Self::OrderBy];

    /// Policies that run after result extraction.
    pub const DATA_DEPENDENT: [Self; 3] = [Self::SelectTop, Self::AndOr, Self::OrderBy];

    /// Test set name, also used in result document file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SelectAll => "SQL_SELECT_ALL",
            Self::SelectTop => "SQL_SELECT_TOP",
            Self::AndOr => "SQL_AND_OR",
            Self::OrderBy => "SQL_ORDER_BY",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    /// Whether the policy consumes sampled column values.
    #[must_use]
    pub const fn needs_samples(self) -> bool {
        matches!(self, Self::SelectTop | Self::AndOr)
    }
}

impl fmt::Display for QueryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caps that keep generated queries within a harness-friendly range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisLimits {
    /// `TOP` counts are taken modulo this value.
    pub top_modulus: usize,
    /// ORDER_BY draws a random column only when the column count is a
    /// multiple of this value.
    pub order_by_modulus: usize,
}

impl Default for SynthesisLimits {
    fn default() -> Self {
        Self {
            top_modulus: 25,
            order_by_modulus: 10,
        }
    }
}

/// Builds query lists from a (diff) document, driven by an injected RNG.
#[derive(Debug)]
pub struct QuerySynthesizer<R = StdRng> {
    rng: R,
    limits: SynthesisLimits,
}

impl QuerySynthesizer<StdRng> {
    /// Create a synthesizer from a fixed seed.
    #[must_use]
    pub fn new(seed: u64, limits: SynthesisLimits) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), limits)
    }
}

impl<R: Rng> QuerySynthesizer<R> {
    /// Zero caps are raised to one.
    pub fn with_rng(rng: R, limits: SynthesisLimits) -> Self {
        let limits = SynthesisLimits {
            top_modulus: limits.top_modulus.max(1),
            order_by_modulus: limits.order_by_modulus.max(1),
        };
        Self { rng, limits }
    }

    #[must_use]
    pub const fn limits(&self) -> SynthesisLimits {
        self.limits
    }

    /// Run one policy. `values` is required for the policies that sample.
    pub fn synthesize(
        &mut self,
        policy: QueryPolicy,
        doc: &MetadataDocument,
        values: Option<&TableColumnValues>,
    ) -> Result<Vec<String>> {
        let queries = match policy {
            QueryPolicy::SelectAll => Self::select_all(doc),
            QueryPolicy::OrderBy => self.order_by(doc),
            QueryPolicy::SelectTop | QueryPolicy::AndOr => {
                let values =
                    values.ok_or_else(|| MdefError::empty("sampled column values"))?;
                if policy == QueryPolicy::SelectTop {
                    self.select_top(doc, values)?
                } else {
                    Self::and_or(doc, values)
                }
            }
        };
        debug!(policy = %policy, queries = queries.len(), "synthesized queries");
        Ok(queries)
    }

    /// `SELECT * FROM <table>` for every table.
    #[must_use]
    pub fn select_all(doc: &MetadataDocument) -> Vec<String> {
        doc.tables()
            .iter()
            .map(|t| format!("SELECT * FROM {}", t.name))
            .collect()
    }

    /// One `TOP` query per sampled table, ordered by its first sampled
    /// column. Fails the whole batch if any sampled table has no rows.
    pub fn select_top(
        &mut self,
        doc: &MetadataDocument,
        values: &TableColumnValues,
    ) -> Result<Vec<String>> {
        let mut queries = Vec::new();
        for table in doc.tables() {
            let Some(samples) = values.get(&table.name).filter(|s| !s.is_empty()) else {
                continue;
            };
            let row_count = samples.row_count();
            if row_count == 0 {
                warn!(table = %table.name, "harness returned no usable rows");
                return Err(MdefError::NoSampledRows {
                    table: table.name.clone(),
                });
            }
            let Some((column, _)) = samples.iter().next() else {
                continue;
            };
            let top = row_count % self.limits.top_modulus;
            let query = if self.rng.gen_bool(0.5) {
                format!("SELECT TOP {top} * FROM {} ORDER BY {column}", table.name)
            } else {
                format!(
                    "SELECT TOP {top} {column} FROM {} ORDER BY {column}",
                    table.name
                )
            };
            queries.push(query);
        }
        Ok(queries)
    }

    /// A single-condition `WHERE` on the first column with at least two
    /// sampled values.
    #[must_use]
    pub fn and_or(doc: &MetadataDocument, values: &TableColumnValues) -> Vec<String> {
        doc.tables()
            .iter()
            .filter_map(|table| {
                let samples = values.get(&table.name)?;
                let (column, literals) = samples.iter().find(|(_, v)| v.len() >= 2)?;
                Some(format!(
                    "SELECT * FROM {} WHERE {column}={}",
                    table.name, literals[0]
                ))
            })
            .collect()
    }

    /// `ORDER BY` over one column per table, either projecting everything
    /// or just that column.
    pub fn order_by(&mut self, doc: &MetadataDocument) -> Vec<String> {
        let mut queries = Vec::new();
        for table in doc.tables() {
            let count = table.columns.len();
            if count == 0 {
                continue;
            }
            let modulus = self.limits.order_by_modulus;
            let index = if count % modulus == 0 {
                self.rng.gen_range(0..count.min(modulus))
            } else {
                0
            };
            let Some(column) = table.columns.nth(index) else {
                continue;
            };
            let query = if self.rng.gen_bool(0.5) {
                format!("SELECT * FROM {} ORDER BY {}", table.name, column.name)
            } else {
                format!(
                    "SELECT {col} FROM {} ORDER BY {col}",
                    table.name,
                    col = column.name
                )
            };
            queries.push(query);
        }
        queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ParseOptions;
    use crate::values::ColumnSamples;

    fn doc() -> MetadataDocument {
        let json = r#"{"Tables": [
            {"TableName": "T1", "APIAccess": {},
             "Columns": [
                {"Name": "A", "Metadata": {"SQLType": "SQL_INTEGER"}},
                {"Name": "B", "Metadata": {"SQLType": "SQL_VARCHAR"}}
             ],
             "VirtualTables": [{"TableName": "T1_V", "Columns": [{"ParentColumnIndex": 1}]}]},
            {"TableName": "T2", "APIAccess": {}, "Columns": []}
        ]}"#;
        MetadataDocument::from_content("t", json, ParseOptions::FULL).unwrap()
    }

    fn values() -> TableColumnValues {
        let mut values = TableColumnValues::new();
        values.insert(
            "T1",
            [
                ("A", vec!["1".to_owned(), "2".to_owned()]),
                ("B", vec!["'x'".to_owned()]),
            ]
            .into_iter()
            .collect::<ColumnSamples>(),
        );
        values
    }

    #[test]
    fn policy_names_roundtrip() {
        for policy in QueryPolicy::ALL {
            assert_eq!(QueryPolicy::parse(policy.as_str()), Some(policy));
        }
        assert_eq!(QueryPolicy::parse("SQL_GROUP_BY"), None);
    }

    #[test]
    fn select_all_follows_flattened_order() {
        assert_eq!(
            QuerySynthesizer::<StdRng>::select_all(&doc()),
            [
                "SELECT * FROM T1",
                "SELECT * FROM T1_V",
                "SELECT * FROM T2"
            ]
        );
    }

    #[test]
    fn select_top_uses_first_column_and_row_count() {
        let mut synth = QuerySynthesizer::new(7, SynthesisLimits::default());
        let queries = synth.select_top(&doc(), &values()).unwrap();
        assert_eq!(queries.len(), 1);
        let q = &queries[0];
        assert!(
            q == "SELECT TOP 2 * FROM T1 ORDER BY A" || q == "SELECT TOP 2 A FROM T1 ORDER BY A",
            "unexpected query: {q}"
        );
    }

    #[test]
    fn select_top_fails_batch_on_empty_table() {
        let mut values = values();
        values.insert(
            "T2",
            [("C", Vec::new())].into_iter().collect::<ColumnSamples>(),
        );
        let mut synth = QuerySynthesizer::new(7, SynthesisLimits::default());
        let err = synth.select_top(&doc(), &values).unwrap_err();
        assert!(matches!(err, MdefError::NoSampledRows { ref table } if table == "T2"));
    }

    #[test]
    fn select_top_wraps_at_modulus() {
        let mut values = TableColumnValues::new();
        let many: Vec<String> = (0..27).map(|i| i.to_string()).collect();
        values.insert("T1", [("A", many)].into_iter().collect::<ColumnSamples>());
        let mut synth = QuerySynthesizer::new(1, SynthesisLimits::default());
        let queries = synth.select_top(&doc(), &values).unwrap();
        assert!(queries[0].starts_with("SELECT TOP 2 "), "{}", queries[0]);
    }

    #[test]
    fn and_or_emits_single_clause() {
        let queries = QuerySynthesizer::<StdRng>::and_or(&doc(), &values());
        assert_eq!(queries, ["SELECT * FROM T1 WHERE A=1"]);
        assert!(!queries[0].contains(" AND ") && !queries[0].contains(" OR "));
    }

    #[test]
    fn and_or_skips_tables_without_two_values() {
        let mut values = TableColumnValues::new();
        values.insert(
            "T1",
            [("A", vec!["1".to_owned()])].into_iter().collect::<ColumnSamples>(),
        );
        assert!(QuerySynthesizer::<StdRng>::and_or(&doc(), &values).is_empty());
    }

    #[test]
    fn order_by_uses_first_column_unless_count_is_multiple() {
        let mut synth = QuerySynthesizer::new(3, SynthesisLimits::default());
        let queries = synth.order_by(&doc());
        // T2 has no columns and is skipped.
        assert_eq!(queries.len(), 2);
        assert!(queries[0].ends_with("FROM T1 ORDER BY A"), "{}", queries[0]);
        assert!(queries[1].ends_with("FROM T1_V ORDER BY B"), "{}", queries[1]);
    }

    #[test]
    fn order_by_random_index_stays_in_range() {
        let limits = SynthesisLimits {
            top_modulus: 25,
            order_by_modulus: 2,
        };
        for seed in 0..32 {
            let mut synth = QuerySynthesizer::new(seed, limits);
            let queries = synth.order_by(&doc());
            assert!(
                queries[0].ends_with("ORDER BY A") || queries[0].ends_with("ORDER BY B"),
                "{}",
                queries[0]
            );
        }
    }

    #[test]
    fn zero_caps_do_not_divide_by_zero() {
        let limits = SynthesisLimits {
            top_modulus: 0,
            order_by_modulus: 0,
        };
        let mut synth = QuerySynthesizer::new(5, limits);
        assert_eq!(synth.limits().top_modulus, 1);
        assert_eq!(synth.limits().order_by_modulus, 1);

        let top = synth.select_top(&doc(), &values()).unwrap();
        assert!(top[0].starts_with("SELECT TOP 0 "), "{}", top[0]);
        let order_by = synth.order_by(&doc());
        assert!(order_by[0].ends_with("FROM T1 ORDER BY A"), "{}", order_by[0]);
    }

    #[test]
    fn same_seed_same_queries() {
        let a = QuerySynthesizer::new(42, SynthesisLimits::default()).order_by(&doc());
        let b = QuerySynthesizer::new(42, SynthesisLimits::default()).order_by(&doc());
        assert_eq!(a, b);
    }

    #[test]
    fn sampling_policies_need_values() {
        let mut synth = QuerySynthesizer::new(0, SynthesisLimits::default());
        let err = synth
            .synthesize(QueryPolicy::SelectTop, &doc(), None)
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(
            synth
                .synthesize(QueryPolicy::SelectAll, &doc(), None)
                .unwrap()
                .len(),
            3
        );
    }
}
