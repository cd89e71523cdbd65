//! Schema differ: which tables and stored procedures are new.
//!
//! The differ works on raw snapshot entries so its output can be written
//! out as an MDEF payload and re-parsed later. Tables are matched against
//! the other document's top-level table index, so a table nested inside an
//! existing top-level table is never reported on its own.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use mdefgen_error::Result;

use crate::metadata::{MetadataDocument, ParseOptions, RawSnapshot};

/// When a filtered result counts as a difference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffPolicy {
    /// New tables *and* new stored procedures are both required; either
    /// list being empty collapses the diff to `None`.
    #[default]
    RequireBoth,
    /// Any new table or stored procedure is a difference.
    AnyNew,
}

/// Entities of one snapshot missing (by name) from another.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDiff {
    payload: RawSnapshot,
    label: String,
}

impl SnapshotDiff {
    /// Raw entries of the new tables and stored procedures.
    #[must_use]
    pub fn payload(&self) -> &RawSnapshot {
        &self.payload
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        self.payload
            .tables
            .iter()
            .flatten()
            .filter_map(|t| t.table_name.as_deref())
            .collect()
    }

    #[must_use]
    pub fn procedure_names(&self) -> Vec<&str> {
        self.payload
            .stored_procedures
            .iter()
            .flatten()
            .filter_map(|p| p.name.as_deref())
            .collect()
    }

    /// Re-parse the payload with columns into a flattened document.
    pub fn to_document(&self) -> Result<MetadataDocument> {
        MetadataDocument::from_raw(&self.label, self.payload.clone(), ParseOptions::FULL)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.payload)?)
    }

    /// Persist the payload so a later run can reload it.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Computes [`SnapshotDiff`]s under a fixed [`DiffPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDiffer {
    policy: DiffPolicy,
}

impl SchemaDiffer {
    #[must_use]
    pub const fn new(policy: DiffPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> DiffPolicy {
        self.policy
    }

    /// Entities of `this` whose names do not appear in `other`.
    ///
    /// Returns `None` when there is no difference under the policy.
    #[must_use]
    pub fn diff(&self, this: &MetadataDocument, other: &MetadataDocument) -> Option<SnapshotDiff> {
        let known_procedures: HashSet<&str> = other.procedure_names().collect();
        let procedures: Vec<_> = this
            .raw()
            .stored_procedures
            .iter()
            .flatten()
            .filter(|p| {
                p.name
                    .as_deref()
                    .is_some_and(|name| !known_procedures.contains(name))
            })
            .cloned()
            .collect();

        let tables: Vec<_> = this
            .raw()
            .tables
            .iter()
            .flatten()
            .filter(|t| {
                t.table_name
                    .as_deref()
                    .is_some_and(|name| !other.table_index().contains_key(name))
            })
            .cloned()
            .collect();

        info!(
            document = this.label(),
            against = other.label(),
            new_tables = tables.len(),
            new_procedures = procedures.len(),
            policy = ?self.policy,
            "computed schema diff"
        );

        let differs = match self.policy {
            DiffPolicy::RequireBoth => !tables.is_empty() && !procedures.is_empty(),
            DiffPolicy::AnyNew => !tables.is_empty() || !procedures.is_empty(),
        };
        if !differs {
            return None;
        }

        Some(SnapshotDiff {
            payload: RawSnapshot {
                tables: Some(tables),
                stored_procedures: Some(procedures),
                extra: Default::default(),
            },
            label: format!("diff({} vs {})", this.label(), other.label()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(label: &str, json: &str) -> MetadataDocument {
        MetadataDocument::from_content(label, json, ParseOptions::FULL).unwrap()
    }

    const OLD: &str = r#"{
        "Tables": [
            {"TableName": "T1", "APIAccess": {"ReadAPI": {}},
             "Columns": [{"Name": "A", "Metadata": {"SQLType": "SQL_INTEGER"}}]}
        ],
        "StoredProcedures": [{"Name": "P1"}]
    }"#;

    const NEW: &str = r#"{
        "Tables": [
            {"TableName": "T1", "APIAccess": {"ReadAPI": {}},
             "Columns": [{"Name": "A", "Metadata": {"SQLType": "SQL_INTEGER"}}]},
            {"TableName": "T2", "APIAccess": {"ReadAPI": {}},
             "Columns": [{"Name": "B", "Metadata": {"SQLType": "SQL_VARCHAR"}}],
             "VirtualTables": [{"TableName": "T2_V", "Columns": [{"ParentColumnIndex": 0}]}]}
        ],
        "StoredProcedures": [{"Name": "P1"}, {"Name": "P2"}]
    }"#;

    #[test]
    fn diff_with_self_is_none() {
        let a = doc("new", NEW);
        assert!(SchemaDiffer::new(DiffPolicy::RequireBoth)
            .diff(&a, &a)
            .is_none());
        assert!(SchemaDiffer::new(DiffPolicy::AnyNew).diff(&a, &a).is_none());
    }

    #[test]
    fn diff_selects_new_entities_with_their_subtrees() {
        let new = doc("new", NEW);
        let old = doc("old", OLD);
        let diff = SchemaDiffer::default().diff(&new, &old).unwrap();
        assert_eq!(diff.table_names(), ["T2"]);
        assert_eq!(diff.procedure_names(), ["P2"]);

        let flattened = diff.to_document().unwrap();
        let names: Vec<&str> = flattened.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["T2", "T2_V"]);
        assert_eq!(flattened.table("T2_V").unwrap().columns.nth(0).unwrap().name, "B");
    }

    #[test]
    fn require_both_collapses_table_only_diff() {
        let new = doc(
            "new",
            r#"{"Tables": [{"TableName": "T1", "APIAccess": {}, "Columns": []}]}"#,
        );
        let empty = doc("empty", "{}");
        assert!(SchemaDiffer::new(DiffPolicy::RequireBoth)
            .diff(&new, &empty)
            .is_none());
        let diff = SchemaDiffer::new(DiffPolicy::AnyNew)
            .diff(&new, &empty)
            .unwrap();
        assert_eq!(diff.table_names(), ["T1"]);
        assert!(diff.procedure_names().is_empty());
    }

    #[test]
    fn nested_table_is_not_matched_against_other_index() {
        // V is nested in `this` and top-level in `other`: the subtree of A
        // is new, so V rides along with it.
        let this = doc(
            "this",
            r#"{"Tables": [{"TableName": "A", "APIAccess": {}, "Columns": [],
                "VirtualTables": [{"TableName": "V", "Columns": []}]}],
                "StoredProcedures": [{"Name": "P"}]}"#,
        );
        let other = doc(
            "other",
            r#"{"Tables": [{"TableName": "V", "APIAccess": {}, "Columns": []}]}"#,
        );
        let diff = SchemaDiffer::default().diff(&this, &other).unwrap();
        let flattened = diff.to_document().unwrap();
        assert_eq!(flattened.tables().len(), 2);

        // A virtual table added under an existing top-level table is not seen.
        let grown = doc(
            "grown",
            r#"{"Tables": [{"TableName": "V", "APIAccess": {}, "Columns": [],
                "VirtualTables": [{"TableName": "W", "Columns": []}]}],
                "StoredProcedures": [{"Name": "P"}]}"#,
        );
        assert!(SchemaDiffer::new(DiffPolicy::AnyNew)
            .diff(&grown, &other)
            .unwrap()
            .table_names()
            .is_empty());
    }

    #[test]
    fn names_only_other_side_is_enough() {
        let new = doc("new", NEW);
        let old = MetadataDocument::from_content("old", OLD, ParseOptions::NAMES_ONLY).unwrap();
        let diff = SchemaDiffer::default().diff(&new, &old).unwrap();
        assert_eq!(diff.table_names(), ["T2"]);
    }

    #[test]
    fn payload_reloads_from_json() {
        let diff = SchemaDiffer::default()
            .diff(&doc("new", NEW), &doc("old", OLD))
            .unwrap();
        let json = diff.to_json().unwrap();
        let reloaded = MetadataDocument::from_content("reloaded", &json, ParseOptions::FULL).unwrap();
        let direct = diff.to_document().unwrap();
        assert_eq!(reloaded.tables(), direct.tables());
    }
}
