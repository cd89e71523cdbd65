//! SQL conformance test generation from MDEF schema snapshots.
//!
//! Two snapshots of a connector's metadata definition are parsed into a
//! flattened table model, diffed by name, and the new tables are turned
//! into harness test sets. A second run samples the harness results of the
//! first and synthesizes data-dependent queries from them.

pub mod config;
pub mod diff;
pub mod extract;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod sql_type;
pub mod synth;
pub mod test_definitions;
pub mod values;

pub use config::{GeneratorConfig, RunInput};
pub use diff::{DiffPolicy, SchemaDiffer, SnapshotDiff};
pub use extract::{ResultDocument, ResultExtractor};
pub use mdefgen_error::{ErrorClass, MdefError, Result};
pub use metadata::{MetadataDocument, ParseOptions, SnapshotSource, Table};
pub use pipeline::{
    BatchReport, Pipeline, RunSummary, SuiteFailure, run_result_sets, run_test_sets,
};
pub use sql_type::{Literal, SqlType, coerce};
pub use synth::{QueryPolicy, QuerySynthesizer, SynthesisLimits};
pub use test_definitions::{PreparedTestSet, TestDefinitionWriter};
pub use values::{ColumnSamples, TableColumnValues};
