//! Sampled column values handed from result extraction to synthesis.

use std::collections::BTreeMap;

use serde::Serialize;

/// Sampled literals for one table, in result-column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnSamples {
    columns: Vec<(String, Vec<String>)>,
}

impl ColumnSamples {
    /// Append a literal to `column`, creating the column on first use.
    pub fn push(&mut self, column: &str, literal: String) {
        self.slot(column).push(literal);
    }

    /// Register a column that may end up with no values.
    pub fn ensure_column(&mut self, column: &str) {
        self.slot(column);
    }

    fn slot(&mut self, column: &str) -> &mut Vec<String> {
        let pos = match self.columns.iter().position(|(name, _)| name == column) {
            Some(pos) => pos,
            None => {
                self.columns.push((column.to_owned(), Vec::new()));
                self.columns.len() - 1
            }
        };
        &mut self.columns[pos].1
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Longest value list across all columns.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<String>)> for ColumnSamples {
    fn from_iter<I: IntoIterator<Item = (S, Vec<String>)>>(iter: I) -> Self {
        let mut samples = Self::default();
        for (column, values) in iter {
            let column = column.into();
            samples.slot(&column).extend(values);
        }
        samples
    }
}

/// Table name → sampled column literals. Built once by the extractor and
/// only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableColumnValues {
    tables: BTreeMap<String, ColumnSamples>,
}

impl TableColumnValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, samples: ColumnSamples) {
        self.tables.insert(table.into(), samples);
    }

    #[must_use]
    pub fn get(&self, table: &str) -> Option<&ColumnSamples> {
        self.tables.get(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnSamples)> {
        self.tables.iter().map(|(name, s)| (name.as_str(), s))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_keep_column_order() {
        let mut samples = ColumnSamples::default();
        samples.push("B", "'x'".to_owned());
        samples.push("A", "1".to_owned());
        samples.push("B", "'y'".to_owned());
        samples.ensure_column("C");
        let order: Vec<&str> = samples.iter().map(|(c, _)| c).collect();
        assert_eq!(order, ["B", "A", "C"]);
        assert_eq!(samples.get("B").unwrap(), ["'x'", "'y'"]);
        assert_eq!(samples.row_count(), 2);
        assert!(samples.get("C").unwrap().is_empty());
    }

    #[test]
    fn empty_samples_have_no_rows() {
        assert_eq!(ColumnSamples::default().row_count(), 0);
        let samples: ColumnSamples = [("A", Vec::new())].into_iter().collect();
        assert_eq!(samples.row_count(), 0);
    }
}
