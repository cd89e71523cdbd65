//! MDEF snapshot model.
//!
//! A snapshot is decoded twice over: first into raw `serde` entries that
//! mirror the JSON exactly (and re-serialize faithfully, which the differ
//! relies on), then lowered into a [`MetadataDocument`] whose tables are
//! flattened into one pre-order arena. Each arena slot remembers its
//! parent's index, so positional column references on virtual tables
//! resolve against the immediate parent without any recursion.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use mdefgen_error::{MdefError, Result};

use crate::sql_type::SqlType;

// ── Raw snapshot entries ─────────────────────────────────────────────

/// Top-level MDEF document as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    #[serde(rename = "Tables", default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<RawTable>>,
    #[serde(
        rename = "StoredProcedures",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stored_procedures: Option<Vec<RawProcedure>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One table definition, possibly carrying nested virtual tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    #[serde(rename = "TableName", default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(rename = "Columns", default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<RawColumn>>,
    #[serde(rename = "APIAccess", default, skip_serializing_if = "Option::is_none")]
    pub api_access: Option<BTreeMap<String, Value>>,
    #[serde(
        rename = "VirtualTables",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub virtual_tables: Option<Vec<RawTable>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A column definition, or a positional reference into the parent table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawColumn {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RawColumnMetadata>,
    #[serde(
        rename = "Passdownable",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub passdownable: Option<bool>,
    #[serde(
        rename = "ParentColumnIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_column_index: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawColumnMetadata {
    #[serde(rename = "SQLType", default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A stored procedure and, when known, the shape of its result table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProcedure {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        rename = "ResultTable",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub result_table: Option<RawResultTable>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResultTable {
    #[serde(rename = "Columns", default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<RawColumn>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ── Lowered model ────────────────────────────────────────────────────

/// A column with its resolved SQL type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    /// Eligible for filter predicates during data-dependent synthesis.
    pub passdownable: bool,
}

/// Ordered column list. Order is the column ordinal order and decides
/// how result-set columns line up with the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Columns(Vec<Column>);

impl Columns {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.0.iter()
    }

    /// Column at ordinal `index`.
    #[must_use]
    pub fn nth(&self, index: usize) -> Option<&Column> {
        self.0.get(index)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.0.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.name.as_str())
    }
}

impl FromIterator<Column> for Columns {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Operations a table exposes through the data source API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ApiOperation {
    Read,
    Create,
    Update,
    Delete,
}

impl ApiOperation {
    /// Map an `APIAccess` key such as `ReadAPI`.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ReadAPI" => Some(Self::Read),
            "CreateAPI" => Some(Self::Create),
            "UpdateAPI" => Some(Self::Update),
            "DeleteAPI" => Some(Self::Delete),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_key(self) -> &'static str {
        match self {
            Self::Read => "ReadAPI",
            Self::Create => "CreateAPI",
            Self::Update => "UpdateAPI",
            Self::Delete => "DeleteAPI",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiAccess {
    pub operation: ApiOperation,
    pub required_columns: Vec<String>,
}

/// One entry of the flattened table arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Columns,
    pub api_access: Vec<ApiAccess>,
    pub is_virtual: bool,
    /// Arena index of the table this one is nested in.
    pub parent: Option<usize>,
}

impl Table {
    #[must_use]
    pub fn passdownable_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.passdownable)
            .map(|c| c.name.clone())
            .collect()
    }

    #[must_use]
    pub fn supports(&self, operation: ApiOperation) -> bool {
        self.api_access.iter().any(|a| a.operation == operation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredProcedure {
    pub name: String,
    /// `None` when the snapshot carries no result-table metadata, or when
    /// the document was parsed without columns.
    pub result_columns: Option<Columns>,
}

/// Controls how much of a snapshot gets materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// When false only names are read; column lists stay empty. Enough
    /// for the side of a diff that is only consulted for membership.
    pub with_columns: bool,
}

impl ParseOptions {
    pub const NAMES_ONLY: Self = Self {
        with_columns: false,
    };
    pub const FULL: Self = Self { with_columns: true };
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::FULL
    }
}

/// Where a snapshot comes from: a file, or a payload already in memory.
#[derive(Debug, Clone, Copy)]
pub enum SnapshotSource<'a> {
    Path(&'a Path),
    Content { label: &'a str, json: &'a str },
}

/// A parsed, immutable MDEF snapshot.
#[derive(Debug, Clone)]
pub struct MetadataDocument {
    label: String,
    fingerprint: String,
    tables: Vec<Table>,
    stored_procedures: Vec<StoredProcedure>,
    table_index: BTreeMap<String, Option<Vec<String>>>,
    virtual_table_names: BTreeSet<String>,
    raw: RawSnapshot,
}

impl MetadataDocument {
    /// Parse a snapshot from a file or an in-memory payload.
    pub fn parse(source: SnapshotSource<'_>, options: ParseOptions) -> Result<Self> {
        match source {
            SnapshotSource::Path(path) => Self::from_path(path, options),
            SnapshotSource::Content { label, json } => Self::from_content(label, json, options),
        }
    }

    pub fn from_path(path: &Path, options: ParseOptions) -> Result<Self> {
        if !path.is_file() {
            return Err(MdefError::SnapshotNotFound {
                path: path.to_path_buf(),
            });
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_content(&path.display().to_string(), &json, options)
    }

    pub fn from_content(label: &str, json: &str, options: ParseOptions) -> Result<Self> {
        let raw: RawSnapshot =
            serde_json::from_str(json).map_err(|e| MdefError::MalformedSnapshot {
                document: label.to_owned(),
                detail: e.to_string(),
            })?;
        Self::lower(label, fingerprint(json.as_bytes()), raw, options)
    }

    /// Build a document from raw entries (a diff payload, for instance).
    pub fn from_raw(label: &str, raw: RawSnapshot, options: ParseOptions) -> Result<Self> {
        let bytes = serde_json::to_vec(&raw)?;
        Self::lower(label, fingerprint(&bytes), raw, options)
    }

    fn lower(
        label: &str,
        fingerprint: String,
        raw: RawSnapshot,
        options: ParseOptions,
    ) -> Result<Self> {
        let stored_procedures = lower_procedures(
            label,
            raw.stored_procedures.as_deref().unwrap_or_default(),
            options,
        )?;
        let flat = flatten_tables(label, raw.tables.as_deref().unwrap_or_default(), options)?;
        debug!(
            document = label,
            tables = flat.tables.len(),
            virtual_tables = flat.virtual_table_names.len(),
            stored_procedures = stored_procedures.len(),
            with_columns = options.with_columns,
            "parsed MDEF snapshot"
        );
        Ok(Self {
            label: label.to_owned(),
            fingerprint,
            tables: flat.tables,
            stored_procedures,
            table_index: flat.table_index,
            virtual_table_names: flat.virtual_table_names,
            raw,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// SHA-256 of the source bytes (lowercase hex).
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Flattened tables in pre-order.
    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn parent_of(&self, table: &Table) -> Option<&Table> {
        table.parent.and_then(|p| self.tables.get(p))
    }

    #[must_use]
    pub fn stored_procedures(&self) -> &[StoredProcedure] {
        &self.stored_procedures
    }

    pub fn procedure_names(&self) -> impl Iterator<Item = &str> {
        self.stored_procedures.iter().map(|p| p.name.as_str())
    }

    /// Top-level table name → passdownable columns (`None` if it has none).
    /// Virtual tables are not indexed here.
    #[must_use]
    pub fn table_index(&self) -> &BTreeMap<String, Option<Vec<String>>> {
        &self.table_index
    }

    #[must_use]
    pub fn virtual_table_names(&self) -> &BTreeSet<String> {
        &self.virtual_table_names
    }

    #[must_use]
    pub fn is_virtual(&self, name: &str) -> bool {
        self.virtual_table_names.contains(name)
    }

    #[must_use]
    pub fn raw(&self) -> &RawSnapshot {
        &self.raw
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.stored_procedures.is_empty()
    }
}

/// SHA-256 hex digest of `bytes`.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

// ── Lowering ─────────────────────────────────────────────────────────

struct Flattened {
    tables: Vec<Table>,
    table_index: BTreeMap<String, Option<Vec<String>>>,
    virtual_table_names: BTreeSet<String>,
}

fn flatten_tables(label: &str, roots: &[RawTable], options: ParseOptions) -> Result<Flattened> {
    let mut tables: Vec<Table> = Vec::new();
    let mut table_index = BTreeMap::new();
    let mut virtual_table_names = BTreeSet::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Pre-order worklist: children are pushed reversed so the first child
    // pops next, right after its parent.
    let mut stack: Vec<(&RawTable, Option<usize>)> = roots.iter().rev().map(|t| (t, None)).collect();

    while let Some((raw, parent)) = stack.pop() {
        let name = raw
            .table_name
            .as_deref()
            .ok_or_else(|| MdefError::missing_key(label, "table entry", "TableName"))?;
        if !seen.insert(name.to_owned()) {
            return Err(MdefError::DuplicateTable {
                document: label.to_owned(),
                name: name.to_owned(),
            });
        }
        let is_virtual = parent.is_some();

        let columns = if options.with_columns {
            let parent_columns = parent.map(|p| &tables[p].columns);
            lower_table_columns(label, name, raw, parent_columns)?
        } else {
            Columns::default()
        };
        let api_access = lower_api_access(label, name, raw, is_virtual)?;

        let index = tables.len();
        let table = Table {
            name: name.to_owned(),
            columns,
            api_access,
            is_virtual,
            parent,
        };
        if is_virtual {
            virtual_table_names.insert(table.name.clone());
        } else {
            let passdownable = if options.with_columns {
                table.passdownable_columns()
            } else {
                raw_passdownable(raw)
            };
            table_index.insert(
                table.name.clone(),
                (!passdownable.is_empty()).then_some(passdownable),
            );
        }
        tables.push(table);

        if let Some(children) = raw.virtual_tables.as_deref() {
            stack.extend(children.iter().rev().map(|c| (c, Some(index))));
        }
    }

    Ok(Flattened {
        tables,
        table_index,
        virtual_table_names,
    })
}

fn lower_table_columns(
    label: &str,
    table: &str,
    raw: &RawTable,
    parent_columns: Option<&Columns>,
) -> Result<Columns> {
    let context = format!("table {table}");
    let raw_columns = raw
        .columns
        .as_deref()
        .ok_or_else(|| MdefError::missing_key(label, &context, "Columns"))?;

    let mut columns = Vec::with_capacity(raw_columns.len());
    for (ordinal, raw_column) in raw_columns.iter().enumerate() {
        let column = if let Some(index) = raw_column.parent_column_index {
            let Some(parent) = parent_columns else {
                return Err(MdefError::MalformedSnapshot {
                    document: label.to_owned(),
                    detail: format!(
                        "column {ordinal} of top-level table {table} uses ParentColumnIndex"
                    ),
                });
            };
            parent
                .nth(index)
                .cloned()
                .ok_or_else(|| MdefError::ColumnReferenceOutOfRange {
                    document: label.to_owned(),
                    table: table.to_owned(),
                    index,
                    parent_columns: parent.len(),
                })?
        } else {
            lower_column(label, &format!("column {ordinal} of {context}"), raw_column)?
        };
        if columns.iter().any(|c: &Column| c.name == column.name) {
            return Err(MdefError::MalformedSnapshot {
                document: label.to_owned(),
                detail: format!("{context} declares column {} twice", column.name),
            });
        }
        columns.push(column);
    }
    Ok(Columns(columns))
}

fn lower_column(label: &str, context: &str, raw: &RawColumn) -> Result<Column> {
    let name = raw
        .name
        .as_deref()
        .ok_or_else(|| MdefError::missing_key(label, context, "Name"))?;
    let metadata = raw
        .metadata
        .as_ref()
        .ok_or_else(|| MdefError::missing_key(label, context, "Metadata"))?;
    let sql_type = metadata
        .sql_type
        .as_deref()
        .ok_or_else(|| MdefError::missing_key(label, context, "Metadata.SQLType"))?;
    Ok(Column {
        name: name.to_owned(),
        sql_type: SqlType::parse(sql_type),
        passdownable: raw.passdownable.unwrap_or(false),
    })
}

fn raw_passdownable(raw: &RawTable) -> Vec<String> {
    raw.columns
        .iter()
        .flatten()
        .filter(|c| c.passdownable == Some(true))
        .filter_map(|c| c.name.clone())
        .collect()
}

fn lower_api_access(
    label: &str,
    table: &str,
    raw: &RawTable,
    is_virtual: bool,
) -> Result<Vec<ApiAccess>> {
    let Some(entries) = raw.api_access.as_ref() else {
        if is_virtual {
            return Ok(Vec::new());
        }
        return Err(MdefError::missing_key(
            label,
            format!("table {table}"),
            "APIAccess",
        ));
    };

    let mut access: Vec<ApiAccess> = entries
        .iter()
        .filter_map(|(key, value)| {
            ApiOperation::from_key(key).map(|operation| ApiAccess {
                operation,
                required_columns: column_requirements(value),
            })
        })
        .collect();
    access.sort_by_key(|a| a.operation);
    Ok(access)
}

/// `ColumnRequirements` is either a list of names or a list of objects
/// carrying a `Name`; anything else means no requirements.
fn column_requirements(entry: &Value) -> Vec<String> {
    let Some(list) = entry.get("ColumnRequirements").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("Name").and_then(Value::as_str).map(str::to_owned),
            _ => None,
        })
        .collect()
}

fn lower_procedures(
    label: &str,
    raw: &[RawProcedure],
    options: ParseOptions,
) -> Result<Vec<StoredProcedure>> {
    raw.iter()
        .enumerate()
        .map(|(ordinal, procedure)| {
            let name = procedure.name.as_deref().ok_or_else(|| {
                MdefError::missing_key(label, format!("stored procedure {ordinal}"), "Name")
            })?;
            let result_columns = match (&procedure.result_table, options.with_columns) {
                (Some(result_table), true) => {
                    let context = format!("result table of stored procedure {name}");
                    let raw_columns = result_table
                        .columns
                        .as_deref()
                        .ok_or_else(|| MdefError::missing_key(label, &context, "Columns"))?;
                    let columns = raw_columns
                        .iter()
                        .enumerate()
                        .map(|(i, c)| lower_column(label, &format!("column {i} of {context}"), c))
                        .collect::<Result<Columns>>()?;
                    Some(columns)
                }
                _ => None,
            };
            Ok(StoredProcedure {
                name: name.to_owned(),
                result_columns,
            })
        })
        .collect()
}
