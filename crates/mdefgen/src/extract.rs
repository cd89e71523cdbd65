//! Harness result documents → sampled, typed column values.
//!
//! The harness writes one document per test case id. Each carries a single
//! `RowDescriptions` block describing the physical result columns, followed
//! by the data rows:
//!
//! ```xml
//! <TestCaseResult ID="3">
//!   <RowDescriptions RowCount="2">
//!     <Column Name="A" SQLType="SQL_INTEGER"/>
//!     <Column Name="B" SQLType="SQL_WVARCHAR"/>
//!   </RowDescriptions>
//!   <Row><Value>1</Value><Value>x</Value></Row>
//!   <Row><Value>2</Value><Value Null="true"/></Row>
//! </TestCaseResult>
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info, warn};

use mdefgen_error::{MdefError, Result};

use crate::metadata::{MetadataDocument, Table};
use crate::sql_type::{SqlType, coerce};
use crate::synth::QueryPolicy;
use crate::values::{ColumnSamples, TableColumnValues};

/// Cell text the harness writes in place of a missing value.
const PLACEHOLDERS: &[&str] = &["none", "null"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    pub name: String,
    pub sql_type: SqlType,
}

/// One parsed harness result document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDocument {
    /// Row count reported by the harness.
    pub row_count: usize,
    pub columns: Vec<ResultColumn>,
    /// Cells in physical column order; `None` is an explicit null.
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultDocument {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MdefError::ResultMissing {
                path: path.to_path_buf(),
            });
        }
        let xml = std::fs::read_to_string(path)?;
        Self::parse(path, &xml)
    }

    /// Parse result XML. `path` is only used in error reports.
    pub fn parse(path: &Path, xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut descriptions = 0usize;
        let mut row_count: Option<usize> = None;
        let mut in_descriptions = false;
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut row: Option<Vec<Option<String>>> = None;
        let mut value: Option<Option<String>> = None;

        loop {
            match reader.read_event().map_err(|e| MdefError::xml(path, e))? {
                Event::Start(e) => match e.name().as_ref() {
                    b"RowDescriptions" => {
                        descriptions += 1;
                        row_count = Some(parse_row_count(path, &e)?);
                        in_descriptions = true;
                    }
                    b"Column" if in_descriptions => columns.push(parse_column(path, &e)?),
                    b"Row" => row = Some(Vec::new()),
                    b"Value" if row.is_some() => {
                        value = Some(if is_null(path, &e)? {
                            None
                        } else {
                            Some(String::new())
                        });
                    }
                    _ => {}
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"RowDescriptions" => {
                        descriptions += 1;
                        row_count = Some(parse_row_count(path, &e)?);
                    }
                    b"Column" if in_descriptions => columns.push(parse_column(path, &e)?),
                    b"Row" => rows.push(Vec::new()),
                    b"Value" => {
                        if let Some(cells) = row.as_mut() {
                            cells.push(None);
                        }
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(Some(buf)) = value.as_mut() {
                        buf.push_str(&t.unescape().map_err(|e| MdefError::xml(path, e))?);
                    }
                }
                Event::CData(c) => {
                    if let Some(Some(buf)) = value.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"RowDescriptions" => in_descriptions = false,
                    b"Value" => {
                        if let (Some(cells), Some(cell)) = (row.as_mut(), value.take()) {
                            cells.push(cell.filter(|text| !text.is_empty()));
                        }
                    }
                    b"Row" => {
                        if let Some(cells) = row.take() {
                            rows.push(cells);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if descriptions != 1 {
            return Err(MdefError::RowDescriptionCount {
                path: path.to_path_buf(),
                found: descriptions,
            });
        }
        Ok(Self {
            row_count: row_count.unwrap_or(0),
            columns,
            rows,
        })
    }
}

fn attribute(path: &Path, element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| MdefError::xml(path, e))?;
        if attr.key.as_ref() == key {
            let value = attr.unescape_value().map_err(|e| MdefError::xml(path, e))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_row_count(path: &Path, element: &BytesStart<'_>) -> Result<usize> {
    let raw = attribute(path, element, b"RowCount")?.ok_or_else(|| MdefError::MalformedResult {
        path: path.to_path_buf(),
        detail: "RowDescriptions has no RowCount".to_owned(),
    })?;
    raw.trim()
        .parse::<usize>()
        .map_err(|_| MdefError::MalformedResult {
            path: path.to_path_buf(),
            detail: format!("invalid RowCount `{raw}`"),
        })
}

fn parse_column(path: &Path, element: &BytesStart<'_>) -> Result<ResultColumn> {
    let malformed = |key: &str| MdefError::MalformedResult {
        path: path.to_path_buf(),
        detail: format!("Column has no {key}"),
    };
    let name = attribute(path, element, b"Name")?.ok_or_else(|| malformed("Name"))?;
    let sql_type = attribute(path, element, b"SQLType")?.ok_or_else(|| malformed("SQLType"))?;
    Ok(ResultColumn {
        name,
        sql_type: SqlType::parse(&sql_type),
    })
}

fn is_null(path: &Path, element: &BytesStart<'_>) -> Result<bool> {
    Ok(attribute(path, element, b"Null")?.is_some_and(|v| v.eq_ignore_ascii_case("true")))
}

fn is_placeholder(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Reads SELECT_ALL results back and samples typed column values.
#[derive(Debug, Clone)]
pub struct ResultExtractor {
    results_dir: PathBuf,
    sample_row_modulus: usize,
}

impl ResultExtractor {
    #[must_use]
    pub fn new(results_dir: impl Into<PathBuf>, sample_row_modulus: usize) -> Self {
        Self {
            results_dir: results_dir.into(),
            sample_row_modulus: sample_row_modulus.max(1),
        }
    }

    /// Result document for test case `id` of `policy`.
    #[must_use]
    pub fn result_path(&self, policy: QueryPolicy, id: u64) -> PathBuf {
        self.results_dir.join(format!("{}_{id}.xml", policy.as_str()))
    }

    /// Sample every table of `diff`, reading the results of the
    /// `SELECT_ALL` test set numbered from `starting_id`.
    ///
    /// Any missing document or schema mismatch aborts the whole extraction.
    pub fn extract(&self, diff: &MetadataDocument, starting_id: u64) -> Result<TableColumnValues> {
        let mut values = TableColumnValues::new();
        for (id, table) in (starting_id..).zip(diff.tables()) {
            let path = self.result_path(QueryPolicy::SelectAll, id);
            let document = ResultDocument::from_path(&path).inspect_err(|e| {
                warn!(table = %table.name, id, error = %e, "cannot read harness result");
            })?;
            let samples = self.sample_table(table, &document)?;
            debug!(
                table = %table.name,
                id,
                rows = samples.row_count(),
                "sampled result set"
            );
            values.insert(table.name.clone(), samples);
        }
        info!(
            document = diff.label(),
            tables = values.len(),
            "extracted table column values"
        );
        Ok(values)
    }

    /// Validate `document` against `table` and collect typed literals.
    pub fn sample_table(&self, table: &Table, document: &ResultDocument) -> Result<ColumnSamples> {
        if document.columns.len() != table.columns.len() {
            return Err(MdefError::ColumnCountMismatch {
                table: table.name.clone(),
                expected: table.columns.len(),
                actual: document.columns.len(),
            });
        }
        let sampled_rows = (document.row_count % self.sample_row_modulus).min(document.rows.len());

        let mut samples = ColumnSamples::default();
        let mut seen = HashSet::with_capacity(document.columns.len());
        for (ordinal, column) in document.columns.iter().enumerate() {
            // Equal counts plus unique known names cover every schema column.
            if !table.columns.contains(&column.name) || !seen.insert(column.name.as_str()) {
                return Err(MdefError::ColumnNameMismatch {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
            samples.ensure_column(&column.name);
            for row in document.rows.iter().take(sampled_rows) {
                let Some(Some(text)) = row.get(ordinal) else {
                    continue;
                };
                if is_placeholder(text) {
                    continue;
                }
                samples.push(&column.name, coerce(text, &column.sql_type).to_sql());
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ParseOptions;

    const RESULT: &str = r#"<?xml version="1.0"?>
<TestCaseResult ID="1">
  <RowDescriptions RowCount="3">
    <Column Name="A" SQLType="SQL_INTEGER"/>
    <Column Name="B" SQLType="SQL_WVARCHAR"/>
  </RowDescriptions>
  <Row><Value>1</Value><Value>x</Value></Row>
  <Row><Value>2</Value><Value Null="true"/></Row>
  <Row><Value/><Value>None</Value></Row>
</TestCaseResult>"#;

    fn table() -> Table {
        let json = r#"{"Tables": [{"TableName": "T1", "APIAccess": {}, "Columns": [
            {"Name": "A", "Metadata": {"SQLType": "SQL_INTEGER"}},
            {"Name": "B", "Metadata": {"SQLType": "SQL_VARCHAR"}}
        ]}]}"#;
        MetadataDocument::from_content("t", json, ParseOptions::FULL)
            .unwrap()
            .tables()[0]
            .clone()
    }

    #[test]
    fn parses_descriptions_and_rows() {
        let doc = ResultDocument::parse(Path::new("r.xml"), RESULT).unwrap();
        assert_eq!(doc.row_count, 3);
        assert_eq!(doc.columns.len(), 2);
        assert_eq!(doc.columns[1].sql_type, SqlType::WVarchar);
        assert_eq!(doc.rows.len(), 3);
        assert_eq!(doc.rows[1], [Some("2".to_owned()), None]);
        assert_eq!(doc.rows[2], [None, Some("None".to_owned())]);
    }

    #[test]
    fn samples_skip_nulls_and_placeholders() {
        let doc = ResultDocument::parse(Path::new("r.xml"), RESULT).unwrap();
        let extractor = ResultExtractor::new("unused", 30);
        let samples = extractor.sample_table(&table(), &doc).unwrap();
        assert_eq!(samples.get("A").unwrap(), ["1", "2"]);
        assert_eq!(samples.get("B").unwrap(), ["'x'"]);
    }

    #[test]
    fn row_count_is_capped_by_modulus() {
        let doc = ResultDocument::parse(Path::new("r.xml"), RESULT).unwrap();
        // 3 % 2 == 1: only the first row is sampled.
        let samples = ResultExtractor::new("unused", 2)
            .sample_table(&table(), &doc)
            .unwrap();
        assert_eq!(samples.get("A").unwrap(), ["1"]);
    }

    #[test]
    fn zero_or_many_descriptions_fail() {
        let err = ResultDocument::parse(Path::new("r.xml"), "<R></R>").unwrap_err();
        assert!(matches!(err, MdefError::RowDescriptionCount { found: 0, .. }));

        let twice = r#"<R><RowDescriptions RowCount="0"/><RowDescriptions RowCount="0"/></R>"#;
        let err = ResultDocument::parse(Path::new("r.xml"), twice).unwrap_err();
        assert!(matches!(err, MdefError::RowDescriptionCount { found: 2, .. }));
    }

    #[test]
    fn schema_mismatches_abort() {
        let extractor = ResultExtractor::new("unused", 30);
        let one_column = r#"<R><RowDescriptions RowCount="0">
            <Column Name="A" SQLType="SQL_INTEGER"/></RowDescriptions></R>"#;
        let doc = ResultDocument::parse(Path::new("r.xml"), one_column).unwrap();
        assert!(matches!(
            extractor.sample_table(&table(), &doc),
            Err(MdefError::ColumnCountMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));

        let renamed = r#"<R><RowDescriptions RowCount="0">
            <Column Name="A" SQLType="SQL_INTEGER"/>
            <Column Name="Z" SQLType="SQL_INTEGER"/></RowDescriptions></R>"#;
        let doc = ResultDocument::parse(Path::new("r.xml"), renamed).unwrap();
        assert!(matches!(
            extractor.sample_table(&table(), &doc),
            Err(MdefError::ColumnNameMismatch { ref column, .. }) if column == "Z"
        ));
    }

    #[test]
    fn repeated_result_column_is_rejected() {
        let repeated = r#"<R><RowDescriptions RowCount="1">
            <Column Name="A" SQLType="SQL_INTEGER"/>
            <Column Name="A" SQLType="SQL_INTEGER"/></RowDescriptions>
            <Row><Value>1</Value><Value>2</Value></Row></R>"#;
        let doc = ResultDocument::parse(Path::new("r.xml"), repeated).unwrap();
        let err = ResultExtractor::new("unused", 30)
            .sample_table(&table(), &doc)
            .unwrap_err();
        assert!(
            matches!(err, MdefError::ColumnNameMismatch { ref column, .. } if column == "A"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn missing_row_count_is_malformed() {
        let err = ResultDocument::parse(Path::new("r.xml"), "<R><RowDescriptions/></R>")
            .unwrap_err();
        assert!(matches!(err, MdefError::MalformedResult { .. }));
    }

    #[test]
    fn missing_document_aborts_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"Tables": [{"TableName": "T1", "APIAccess": {}, "Columns": []}]}"#;
        let doc = MetadataDocument::from_content("t", json, ParseOptions::FULL).unwrap();
        let err = ResultExtractor::new(dir.path(), 30).extract(&doc, 1).unwrap_err();
        assert!(matches!(err, MdefError::ResultMissing { ref path } if path.ends_with("SQL_SELECT_ALL_1.xml")));
    }
}
