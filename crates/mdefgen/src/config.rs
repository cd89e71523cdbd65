//! Run configuration.
//!
//! [`GeneratorConfig`] is the explicit value every component is built
//! from. [`RunInput`] is the orchestration input document (`input.json`)
//! naming the snapshots, output locations and the required test sets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use mdefgen_error::{MdefError, Result};

use crate::diff::DiffPolicy;
use crate::synth::{QueryPolicy, SynthesisLimits};

/// Default seed, so unseeded runs are still reproducible.
pub const DEFAULT_SEED: u64 = 0x4D44_4546;

/// Default first test case id.
pub const DEFAULT_FIRST_ID: u64 = 1;

/// Default cap applied to sampled harness rows.
pub const DEFAULT_SAMPLE_ROW_MODULUS: usize = 30;

/// File name of the persisted diff payload inside a suite directory.
pub const DIFF_PAYLOAD_FILE: &str = "mdef_diff.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub suite_name: String,
    /// Root of the test-definition tree.
    pub test_definitions_dir: PathBuf,
    /// Directory the harness writes result documents to.
    pub results_dir: PathBuf,
    pub first_id: u64,
    pub seed: u64,
    pub limits: SynthesisLimits,
    pub sample_row_modulus: usize,
    pub diff_policy: DiffPolicy,
    /// Required test sets. Data-dependent ones run after extraction, in
    /// this order.
    pub policies: Vec<QueryPolicy>,
}

impl GeneratorConfig {
    /// Config with default caps for one suite.
    #[must_use]
    pub fn new(
        suite_name: impl Into<String>,
        test_definitions_dir: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            suite_name: suite_name.into(),
            test_definitions_dir: test_definitions_dir.into(),
            results_dir: results_dir.into(),
            first_id: DEFAULT_FIRST_ID,
            seed: DEFAULT_SEED,
            limits: SynthesisLimits::default(),
            sample_row_modulus: DEFAULT_SAMPLE_ROW_MODULUS,
            diff_policy: DiffPolicy::default(),
            policies: QueryPolicy::ALL.to_vec(),
        }
    }

    /// Check the values a run cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.suite_name.trim().is_empty() {
            return Err(MdefError::empty("suite name"));
        }
        if self.test_definitions_dir.as_os_str().is_empty() {
            return Err(MdefError::empty("test definitions location"));
        }
        if self.policies.is_empty() {
            return Err(MdefError::empty("required test sets"));
        }
        if self.limits.top_modulus == 0
            || self.limits.order_by_modulus == 0
            || self.sample_row_modulus == 0
        {
            return Err(MdefError::InvalidInput(
                "modulus caps must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn diff_payload_path(&self) -> PathBuf {
        self.test_definitions_dir
            .join(&self.suite_name)
            .join(DIFF_PAYLOAD_FILE)
    }
}

/// How the snapshot pair to compare is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DifferenceFindMode {
    /// The latest two revisions from version control.
    CompareLastTwoRevisions,
    /// A locally modified snapshot against the tracked one.
    ModifiedMdefLocation(PathBuf),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDifferenceFindMode {
    #[serde(rename = "CompareLastTwoRevisions", default)]
    compare_last_two_revisions: Option<bool>,
    #[serde(rename = "ModifiedMDEFLocation", default)]
    modified_mdef_location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawLocations {
    #[serde(rename = "MDEFLocation", default)]
    mdef_location: Option<String>,
    #[serde(rename = "TestDefinitionsLocation", default)]
    test_definitions_location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRunInput {
    #[serde(rename = "ConnectionString")]
    connection_string: Option<String>,
    #[serde(rename = "DifferenceFindMode")]
    difference_find_mode: Option<RawDifferenceFindMode>,
    #[serde(rename = "PerforceLocation", default)]
    locations: Option<RawLocations>,
    #[serde(rename = "TestSuite", default)]
    test_suites: Option<BTreeMap<String, BTreeMap<String, Value>>>,
}

/// The orchestration input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInput {
    pub connection_string: String,
    pub difference_find_mode: DifferenceFindMode,
    pub mdef_location: Option<PathBuf>,
    pub test_definitions_location: Option<PathBuf>,
    /// Suite name → required test set names.
    pub required_test_suites: Vec<(String, Vec<String>)>,
}

impl RunInput {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MdefError::InvalidInput(format!(
                "{} not found",
                path.display()
            )));
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawRunInput = serde_json::from_str(json)?;
        let invalid = |what: &str| MdefError::InvalidInput(format!("invalid expression: {what}"));

        let connection_string = raw
            .connection_string
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("ConnectionString"))?;

        let mode = raw
            .difference_find_mode
            .ok_or_else(|| invalid("DifferenceFindMode"))?;
        let difference_find_mode = if mode.compare_last_two_revisions == Some(true) {
            DifferenceFindMode::CompareLastTwoRevisions
        } else {
            match mode.modified_mdef_location.filter(|s| !s.is_empty()) {
                Some(location) => DifferenceFindMode::ModifiedMdefLocation(location.into()),
                None => return Err(invalid("DifferenceFindMode.ModifiedMDEFLocation")),
            }
        };

        let locations = raw.locations.unwrap_or_default();
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty()).map(PathBuf::from);

        let required_test_suites = raw
            .test_suites
            .unwrap_or_default()
            .into_iter()
            .map(|(suite, sets)| {
                let required = sets
                    .into_iter()
                    .filter(|(_, flag)| flag.as_bool() == Some(true))
                    .map(|(set, _)| set)
                    .collect();
                (suite, required)
            })
            .collect();

        Ok(Self {
            connection_string,
            difference_find_mode,
            mdef_location: non_empty(locations.mdef_location),
            test_definitions_location: non_empty(locations.test_definitions_location),
            required_test_suites,
        })
    }

    /// The modified snapshot location, when that mode is selected.
    #[must_use]
    pub fn modified_mdef_location(&self) -> Option<&Path> {
        match &self.difference_find_mode {
            DifferenceFindMode::ModifiedMdefLocation(path) => Some(path),
            DifferenceFindMode::CompareLastTwoRevisions => None,
        }
    }

    /// Required `(suite, policy)` pairs. Unknown test set names are
    /// reported and skipped.
    #[must_use]
    pub fn required_test_sets(&self) -> Vec<(String, QueryPolicy)> {
        let mut out = Vec::new();
        for (suite, sets) in &self.required_test_suites {
            for set in sets {
                match QueryPolicy::parse(set) {
                    Some(policy) => out.push((suite.clone(), policy)),
                    None => warn!(suite = %suite, test_set = %set, "unsupported test set skipped"),
                }
            }
        }
        out
    }

    /// Build one [`GeneratorConfig`] per suite that requires at least one
    /// supported test set. Other suites are reported and left out.
    pub fn generator_configs(&self, results_dir: &Path, seed: u64) -> Result<Vec<GeneratorConfig>> {
        let root = self
            .test_definitions_location
            .clone()
            .ok_or_else(|| MdefError::empty("TestDefinitionsLocation"))?;
        let required = self.required_test_sets();

        let mut configs = Vec::new();
        for (suite, _) in &self.required_test_suites {
            let mut policies: Vec<QueryPolicy> = required
                .iter()
                .filter(|(s, _)| s == suite)
                .map(|(_, p)| *p)
                .collect();
            if policies.is_empty() {
                warn!(suite = %suite, "no supported test sets required, suite skipped");
                continue;
            }
            policies.sort_unstable();
            policies.dedup();

            let mut config = GeneratorConfig::new(suite, &root, results_dir);
            config.seed = seed;
            config.policies = policies;
            config.validate()?;
            configs.push(config);
        }
        Ok(configs)
    }
}
