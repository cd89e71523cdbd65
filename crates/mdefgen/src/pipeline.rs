//! The two generator runs.
//!
//! A test-set run diffs two snapshots, persists the diff payload and
//! writes the `SQL_SELECT_ALL` test set. The harness then executes it and
//! writes result documents. A result-set run reloads the diff payload,
//! samples those results and writes one test set per data-dependent
//! policy, numbering test cases after the `SQL_SELECT_ALL` ids.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use mdefgen_error::{MdefError, Result};

use crate::config::GeneratorConfig;
use crate::diff::SchemaDiffer;
use crate::extract::ResultExtractor;
use crate::logging::log_timed_operation;
use crate::metadata::{MetadataDocument, ParseOptions, SnapshotSource};
use crate::synth::{QueryPolicy, QuerySynthesizer};
use crate::test_definitions::{PreparedTestSet, TestDefinitionWriter, require_parent_dir};
use crate::values::TableColumnValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    TestSets,
    ResultSets,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFingerprint {
    pub document: String,
    pub sha256: String,
}

/// A step that hit a recoverable error and was not carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStep {
    pub step: String,
    pub class: &'static str,
    pub reason: String,
}

/// What a run read and wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub suite: String,
    pub mode: RunMode,
    pub fingerprints: Vec<DocumentFingerprint>,
    pub new_tables: Vec<String>,
    pub new_procedures: Vec<String>,
    pub diff_payload: Option<PathBuf>,
    pub test_sets: Vec<PreparedTestSet>,
    pub skipped: Vec<SkippedStep>,
}

impl RunSummary {
    fn new(suite: &str, mode: RunMode) -> Self {
        Self {
            suite: suite.to_owned(),
            mode,
            fingerprints: Vec::new(),
            new_tables: Vec::new(),
            new_procedures: Vec::new(),
            diff_payload: None,
            test_sets: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn record(&mut self, doc: &MetadataDocument) {
        self.fingerprints.push(DocumentFingerprint {
            document: doc.label().to_owned(),
            sha256: doc.fingerprint().to_owned(),
        });
    }

    fn skip(&mut self, step: &str, error: &MdefError) {
        warn!(
            step,
            class = error.class().as_str(),
            error = %error,
            suggestion = error.suggestion(),
            "step skipped"
        );
        self.skipped.push(SkippedStep {
            step: step.to_owned(),
            class: error.class().as_str(),
            reason: error.to_string(),
        });
    }

    /// Whether the snapshots differed at all.
    #[must_use]
    pub fn has_difference(&self) -> bool {
        self.diff_payload.is_some()
    }

    /// Total test cases written.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.test_sets.iter().map(|s| s.queries).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: GeneratorConfig,
    writer: TestDefinitionWriter,
}

impl Pipeline {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let writer = TestDefinitionWriter::new(&config.test_definitions_dir);
        Ok(Self { config, writer })
    }

    #[must_use]
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Diff `new` against `old` and write the `SQL_SELECT_ALL` test set
    /// for every new table.
    ///
    /// `SQL_SELECT_ALL` is written even when the suite only requires
    /// data-dependent sets, since those are sampled from its results.
    pub fn generate_test_sets(
        &self,
        old: SnapshotSource<'_>,
        new: SnapshotSource<'_>,
    ) -> Result<RunSummary> {
        let suite = self.config.suite_name.as_str();
        let mut summary = RunSummary::new(suite, RunMode::TestSets);

        let old = log_timed_operation("parse", &source_label(old), || {
            MetadataDocument::parse(old, ParseOptions::NAMES_ONLY)
        })?;
        let new = log_timed_operation("parse", &source_label(new), || {
            MetadataDocument::parse(new, ParseOptions::FULL)
        })?;
        summary.record(&old);
        summary.record(&new);

        let payload_path = self.config.diff_payload_path();
        let Some(diff) = SchemaDiffer::new(self.config.diff_policy).diff(&new, &old) else {
            info!(suite, old = old.label(), new = new.label(), "snapshots do not differ");
            if payload_path.is_file() {
                std::fs::remove_file(&payload_path)?;
            }
            return Ok(summary);
        };

        summary.new_tables = diff.table_names().into_iter().map(str::to_owned).collect();
        summary.new_procedures = diff
            .procedure_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        require_parent_dir(&payload_path)?;
        diff.write_json(&payload_path)?;
        summary.diff_payload = Some(payload_path);

        let diff_doc = log_timed_operation("lower_diff", new.label(), || {
            diff.to_document()
        })?;
        summary.record(&diff_doc);

        let queries = <QuerySynthesizer>::select_all(&diff_doc);
        let prepared = self.writer.prepare_test_set(
            suite,
            QueryPolicy::SelectAll,
            queries,
            self.config.first_id,
        )?;
        summary.test_sets.push(prepared);

        let mut listed = vec![QueryPolicy::SelectAll];
        listed.extend(
            self.config
                .policies
                .iter()
                .copied()
                .filter(|p| *p != QueryPolicy::SelectAll),
        );
        self.writer.write_suite(suite, &listed)?;

        info!(
            suite,
            new_tables = summary.new_tables.len(),
            new_procedures = summary.new_procedures.len(),
            queries = summary.query_count(),
            "test-set run complete"
        );
        Ok(summary)
    }

    /// Sample the `SQL_SELECT_ALL` results of the persisted diff and write
    /// the data-dependent test sets.
    ///
    /// A missing diff payload means the last test-set run found no
    /// difference, so nothing is written.
    pub fn generate_result_sets(&self) -> Result<RunSummary> {
        let suite = self.config.suite_name.as_str();
        let mut summary = RunSummary::new(suite, RunMode::ResultSets);

        let payload_path = self.config.diff_payload_path();
        if !payload_path.is_file() {
            info!(suite, path = %payload_path.display(), "no diff payload, nothing to do");
            return Ok(summary);
        }
        let diff_doc = MetadataDocument::parse(SnapshotSource::Path(&payload_path), ParseOptions::FULL)?;
        summary.record(&diff_doc);
        summary.new_tables = diff_doc
            .tables()
            .iter()
            .filter(|t| !t.is_virtual)
            .map(|t| t.name.clone())
            .collect();
        summary.new_procedures = diff_doc.procedure_names().map(str::to_owned).collect();
        summary.diff_payload = Some(payload_path);

        let policies: Vec<QueryPolicy> = self
            .config
            .policies
            .iter()
            .copied()
            .filter(|p| *p != QueryPolicy::SelectAll)
            .collect();
        if policies.is_empty() {
            info!(suite, "no data-dependent test sets required");
            return Ok(summary);
        }

        // Every data-dependent policy waits on a complete extraction.
        let extractor =
            ResultExtractor::new(&self.config.results_dir, self.config.sample_row_modulus);
        let values = match log_timed_operation("extract", diff_doc.label(), || {
            extractor.extract(&diff_doc, self.config.first_id)
        }) {
            Ok(values) => values,
            Err(e) if e.is_recoverable() => {
                summary.skip("extract", &e);
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };

        let mut next_id = self.config.first_id + diff_doc.tables().len() as u64;
        let mut synthesizer = QuerySynthesizer::new(self.config.seed, self.config.limits);
        for policy in policies {
            match self.run_policy(&mut synthesizer, policy, &diff_doc, &values, next_id) {
                Ok(prepared) => {
                    next_id = prepared.next_id;
                    summary.test_sets.push(prepared);
                }
                Err(e) if e.is_recoverable() => summary.skip(policy.as_str(), &e),
                Err(e) => return Err(e),
            }
        }

        info!(
            suite,
            test_sets = summary.test_sets.len(),
            skipped = summary.skipped.len(),
            queries = summary.query_count(),
            "result-set run complete"
        );
        Ok(summary)
    }

    fn run_policy(
        &self,
        synthesizer: &mut QuerySynthesizer,
        policy: QueryPolicy,
        doc: &MetadataDocument,
        values: &TableColumnValues,
        starting_id: u64,
    ) -> Result<PreparedTestSet> {
        let queries = synthesizer.synthesize(policy, doc, Some(values))?;
        self.writer
            .prepare_test_set(&self.config.suite_name, policy, queries, starting_id)
    }
}

/// A suite whose run stopped on a recoverable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteFailure {
    pub suite: String,
    pub class: &'static str,
    pub exit_code: u8,
    pub reason: String,
}

/// Outcome of one mode run across every configured suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub mode: RunMode,
    pub summaries: Vec<RunSummary>,
    pub failures: Vec<SuiteFailure>,
    /// Environment document, written once after a test-set run.
    pub environment: Option<PathBuf>,
}

impl BatchReport {
    fn new(mode: RunMode) -> Self {
        Self {
            mode,
            summaries: Vec::new(),
            failures: Vec::new(),
            environment: None,
        }
    }

    /// Record `result` for `suite`. Recoverable errors end only that suite.
    fn absorb(&mut self, suite: &str, result: Result<RunSummary>) -> Result<()> {
        match result {
            Ok(summary) => self.summaries.push(summary),
            Err(e) if e.is_recoverable() => {
                warn!(
                    suite,
                    class = e.class().as_str(),
                    error = %e,
                    suggestion = e.suggestion(),
                    "suite stopped"
                );
                self.failures.push(SuiteFailure {
                    suite: suite.to_owned(),
                    class: e.class().as_str(),
                    exit_code: e.exit_code(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Exit status for the process: the first failed suite's, else zero.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.failures.first().map_or(0, |f| f.exit_code)
    }
}

/// Run the test-set mode for every suite, then write one environment
/// document listing each suite that received test sets.
pub fn run_test_sets(
    configs: &[GeneratorConfig],
    old: SnapshotSource<'_>,
    new: SnapshotSource<'_>,
    connection_string: &str,
) -> Result<BatchReport> {
    let mut report = BatchReport::new(RunMode::TestSets);
    for config in configs {
        let result = Pipeline::new(config.clone()).and_then(|p| p.generate_test_sets(old, new));
        report.absorb(&config.suite_name, result)?;
    }

    let suites: Vec<&str> = report
        .summaries
        .iter()
        .filter(|s| !s.test_sets.is_empty())
        .map(|s| s.suite.as_str())
        .collect();
    if let Some(first) = configs.first().filter(|_| !suites.is_empty()) {
        let writer = TestDefinitionWriter::new(&first.test_definitions_dir);
        report.environment = Some(writer.write_environment(connection_string, &suites)?);
    }
    Ok(report)
}

/// Run the result-set mode for every suite.
pub fn run_result_sets(configs: &[GeneratorConfig]) -> Result<BatchReport> {
    let mut report = BatchReport::new(RunMode::ResultSets);
    for config in configs {
        let result = Pipeline::new(config.clone()).and_then(|p| p.generate_result_sets());
        report.absorb(&config.suite_name, result)?;
    }
    Ok(report)
}

fn source_label(source: SnapshotSource<'_>) -> String {
    match source {
        SnapshotSource::Path(path) => path.display().to_string(),
        SnapshotSource::Content { label, .. } => label.to_owned(),
    }
}
