use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for MDEF test generation.
///
/// Variants fall into the classes reported by [`MdefError::class`]: a
/// structural problem means the snapshot itself is malformed and the run
/// cannot continue, while data-availability and precondition failures only
/// end the step that hit them.
#[derive(Error, Debug)]
pub enum MdefError {
    // === Snapshot Structure ===
    /// Two tables in one flattened document share a name.
    #[error("{document} contains more than one table with name {name}")]
    DuplicateTable { document: String, name: String },

    /// A virtual table column points past the end of its parent's columns.
    #[error(
        "{document}: virtual table {table} references parent column {index}, but the parent has {parent_columns} columns"
    )]
    ColumnReferenceOutOfRange {
        document: String,
        table: String,
        index: usize,
        parent_columns: usize,
    },

    /// A required key is absent on a present table, column, or procedure.
    #[error("{document}: missing required key `{key}` in {context}")]
    MissingKey {
        document: String,
        context: String,
        key: String,
    },

    /// The snapshot is valid JSON but not shaped like an MDEF document.
    #[error("{document}: malformed snapshot: {detail}")]
    MalformedSnapshot { document: String, detail: String },

    /// Snapshot file does not exist.
    #[error("snapshot not found: '{path}'")]
    SnapshotNotFound { path: PathBuf },

    // === Harness Results ===
    /// The harness produced no result document for a test case.
    #[error("result document not found: '{path}'")]
    ResultMissing { path: PathBuf },

    /// A result document must describe exactly one result set.
    #[error("expected exactly one RowDescriptions node in '{path}', found {found}")]
    RowDescriptionCount { path: PathBuf, found: usize },

    /// The result set and the schema disagree on the number of columns.
    #[error("column count mismatch for {table}: schema has {expected}, result has {actual}")]
    ColumnCountMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// The result set returned a column the schema does not declare.
    #[error("result column {column} is not declared on table {table}")]
    ColumnNameMismatch { table: String, column: String },

    /// No rows were sampled for a table that needs data.
    #[error("no sampled rows for table {table}")]
    NoSampledRows { table: String },

    /// The result document is not shaped the way the harness writes it.
    #[error("malformed result document '{path}': {detail}")]
    MalformedResult { path: PathBuf, detail: String },

    // === Preconditions ===
    /// A required argument was empty.
    #[error("{what} must not be empty")]
    EmptyArgument { what: String },

    /// Target directory for generated documents does not exist.
    #[error("directory not found: '{path}'")]
    MissingDirectory { path: PathBuf },

    /// Run input is inconsistent or requests an unsupported mode.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // === Encoding / I/O ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decode or encode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML decode or encode error.
    #[error("XML error in '{path}': {detail}")]
    Xml { path: PathBuf, detail: String },
}

/// Coarse classification used to decide whether a run can continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The snapshot is malformed; the whole run aborts.
    Structural,
    /// An input document is missing.
    NotFound,
    /// Harness output is missing or does not match the schema.
    DataAvailability,
    /// An argument or target location is unusable.
    Precondition,
    /// Filesystem or encoding failure.
    Io,
}

impl ErrorClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::NotFound => "not_found",
            Self::DataAvailability => "data_availability",
            Self::Precondition => "precondition",
            Self::Io => "io",
        }
    }
}

impl MdefError {
    /// Classify this error.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateTable { .. }
            | Self::ColumnReferenceOutOfRange { .. }
            | Self::MissingKey { .. }
            | Self::MalformedSnapshot { .. } => ErrorClass::Structural,
            Self::SnapshotNotFound { .. } => ErrorClass::NotFound,
            Self::ResultMissing { .. }
            | Self::RowDescriptionCount { .. }
            | Self::ColumnCountMismatch { .. }
            | Self::ColumnNameMismatch { .. }
            | Self::NoSampledRows { .. }
            | Self::MalformedResult { .. } => ErrorClass::DataAvailability,
            Self::EmptyArgument { .. } | Self::MissingDirectory { .. } | Self::InvalidInput(_) => {
                ErrorClass::Precondition
            }
            Self::Io(_) | Self::Json(_) | Self::Xml { .. } => ErrorClass::Io,
        }
    }

    /// Whether the failing step can be abandoned while the run carries on.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::DataAvailability | ErrorClass::Precondition
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::DuplicateTable { .. } => Some("Rename one of the tables in the MDEF snapshot"),
            Self::ColumnReferenceOutOfRange { .. } => {
                Some("Check ParentColumnIndex against the parent table's column list")
            }
            Self::SnapshotNotFound { .. } => Some("Check the MDEF location in the run input"),
            Self::ResultMissing { .. } => {
                Some("Run the SELECT_ALL test set through the harness before generating result sets")
            }
            Self::NoSampledRows { .. } => {
                Some("The harness returned no rows; populate the data source and rerun")
            }
            Self::MissingDirectory { .. } => Some("Create the test definitions directory first"),
            _ => None,
        }
    }

    /// Process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> u8 {
        match self.class() {
            ErrorClass::Structural => 3,
            ErrorClass::NotFound => 4,
            ErrorClass::DataAvailability => 5,
            ErrorClass::Precondition => 6,
            ErrorClass::Io => 7,
        }
    }

    /// Create a missing-key error.
    pub fn missing_key(
        document: impl Into<String>,
        context: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::MissingKey {
            document: document.into(),
            context: context.into(),
            key: key.into(),
        }
    }

    /// Create an empty-argument error.
    pub fn empty(what: impl Into<String>) -> Self {
        Self::EmptyArgument { what: what.into() }
    }

    /// Create an XML error from any displayable cause.
    pub fn xml(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::Xml {
            path: path.into(),
            detail: cause.to_string(),
        }
    }
}

/// Result type alias using `MdefError`.
pub type Result<T> = std::result::Result<T, MdefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_duplicate_table() {
        let err = MdefError::DuplicateTable {
            document: "new.mdef".to_owned(),
            name: "Accounts".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "new.mdef contains more than one table with name Accounts"
        );
    }

    #[test]
    fn error_display_missing_key() {
        let err = MdefError::missing_key("old.mdef", "table Accounts", "Columns");
        assert_eq!(
            err.to_string(),
            "old.mdef: missing required key `Columns` in table Accounts"
        );
    }

    #[test]
    fn error_class_mapping() {
        assert_eq!(
            MdefError::DuplicateTable {
                document: String::new(),
                name: String::new(),
            }
            .class(),
            ErrorClass::Structural
        );
        assert_eq!(
            MdefError::NoSampledRows {
                table: "T".to_owned()
            }
            .class(),
            ErrorClass::DataAvailability
        );
        assert_eq!(MdefError::empty("suite").class(), ErrorClass::Precondition);
        assert_eq!(
            MdefError::SnapshotNotFound {
                path: PathBuf::from("x")
            }
            .class(),
            ErrorClass::NotFound
        );
    }

    #[test]
    fn structural_errors_are_fatal() {
        let err = MdefError::ColumnReferenceOutOfRange {
            document: "d".to_owned(),
            table: "v".to_owned(),
            index: 4,
            parent_columns: 2,
        };
        assert!(!err.is_recoverable());
        assert!(err.suggestion().is_some());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn data_availability_errors_are_recoverable() {
        let err = MdefError::ResultMissing {
            path: PathBuf::from("SQL_SELECT_ALL_1.xml"),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.class().as_str(), "data_availability");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MdefError = io.into();
        assert!(matches!(err, MdefError::Io(_)));
        assert_eq!(err.class(), ErrorClass::Io);
    }
}
