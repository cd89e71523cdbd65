//! Harness test-definition documents: test sets, the suite listing, and
//! the test environment.
//!
//! Layout under the test-definitions root:
//!
//! ```text
//! <root>/TestEnvironment.xml
//! <root>/<suite>/<suite>.xml
//! <root>/<suite>/TestSets/<POLICY>.xml
//! ```
//!
//! Directories are expected to exist already; a missing one is reported
//! as [`MdefError::MissingDirectory`].

use std::path::{Path, PathBuf};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;
use tracing::info;

use mdefgen_error::{MdefError, Result};

use crate::synth::QueryPolicy;

/// Directory holding a suite's test set documents.
pub const TEST_SETS_DIR: &str = "TestSets";

/// File name of the environment document.
pub const TEST_ENVIRONMENT_FILE: &str = "TestEnvironment.xml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    pub id: u64,
    pub sql: String,
}

/// One named batch of queries, numbered from a starting id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSet {
    pub suite: String,
    pub policy: QueryPolicy,
    pub cases: Vec<TestCase>,
}

impl TestSet {
    /// Number `queries` consecutively from `starting_id`.
    pub fn from_queries(
        suite: &str,
        policy: QueryPolicy,
        queries: Vec<String>,
        starting_id: u64,
    ) -> Result<Self> {
        if suite.trim().is_empty() {
            return Err(MdefError::empty("test suite name"));
        }
        let cases = (starting_id..)
            .zip(queries)
            .map(|(id, sql)| TestCase { id, sql })
            .collect();
        Ok(Self {
            suite: suite.to_owned(),
            policy,
            cases,
        })
    }

    /// Id the next test set should start from.
    #[must_use]
    pub fn next_id(&self, starting_id: u64) -> u64 {
        starting_id + self.cases.len() as u64
    }

    /// Render the test set document.
    pub fn to_xml(&self, path: &Path) -> Result<String> {
        let mut writer = XmlDocument::new(path)?;

        let mut root = BytesStart::new("TestSet");
        root.push_attribute(("Name", self.policy.as_str()));
        root.push_attribute(("Suite", self.suite.as_str()));
        writer.event(Event::Start(root))?;

        for case in &self.cases {
            let id = case.id.to_string();
            let mut element = BytesStart::new("TestCase");
            element.push_attribute(("ID", id.as_str()));
            element.push_attribute(("ValidateColumns", "true"));
            element.push_attribute(("ValidateNumericExactly", "true"));
            writer.event(Event::Start(element))?;
            writer.text("SQL", &case.sql)?;
            writer.event(Event::End(BytesEnd::new("TestCase")))?;
        }

        writer.event(Event::End(BytesEnd::new("TestSet")))?;
        writer.finish()
    }
}

/// Outcome of writing one test set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedTestSet {
    pub policy: QueryPolicy,
    pub path: PathBuf,
    pub first_id: u64,
    pub next_id: u64,
    pub queries: usize,
}

/// Writes test-definition documents below a fixed root directory.
#[derive(Debug, Clone)]
pub struct TestDefinitionWriter {
    root: PathBuf,
}

impl TestDefinitionWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn suite_dir(&self, suite: &str) -> PathBuf {
        self.root.join(suite)
    }

    #[must_use]
    pub fn test_set_path(&self, suite: &str, policy: QueryPolicy) -> PathBuf {
        self.suite_dir(suite)
            .join(TEST_SETS_DIR)
            .join(format!("{}.xml", policy.as_str()))
    }

    /// Turn `queries` into a numbered test set and write it.
    pub fn prepare_test_set(
        &self,
        suite: &str,
        policy: QueryPolicy,
        queries: Vec<String>,
        starting_id: u64,
    ) -> Result<PreparedTestSet> {
        let set = TestSet::from_queries(suite, policy, queries, starting_id)?;
        let path = self.test_set_path(suite, policy);
        require_parent_dir(&path)?;
        std::fs::write(&path, set.to_xml(&path)?)?;

        let prepared = PreparedTestSet {
            policy,
            path,
            first_id: starting_id,
            next_id: set.next_id(starting_id),
            queries: set.cases.len(),
        };
        info!(
            suite,
            policy = %policy,
            queries = prepared.queries,
            starting_id,
            path = %prepared.path.display(),
            "wrote test set"
        );
        Ok(prepared)
    }

    /// Write the suite document listing its test sets.
    pub fn write_suite(&self, suite: &str, policies: &[QueryPolicy]) -> Result<PathBuf> {
        if suite.trim().is_empty() {
            return Err(MdefError::empty("test suite name"));
        }
        let path = self.suite_dir(suite).join(format!("{suite}.xml"));
        require_parent_dir(&path)?;

        let mut writer = XmlDocument::new(&path)?;
        let mut root = BytesStart::new("TestSuite");
        root.push_attribute(("Name", suite));
        writer.event(Event::Start(root))?;
        for policy in policies {
            let file = format!("{TEST_SETS_DIR}/{}.xml", policy.as_str());
            let mut element = BytesStart::new("TestSet");
            element.push_attribute(("Name", policy.as_str()));
            element.push_attribute(("File", file.as_str()));
            writer.event(Event::Empty(element))?;
        }
        writer.event(Event::End(BytesEnd::new("TestSuite")))?;

        std::fs::write(&path, writer.finish()?)?;
        Ok(path)
    }

    /// Write the environment document naming the connection and suites.
    pub fn write_environment(&self, connection_string: &str, suites: &[&str]) -> Result<PathBuf> {
        if connection_string.trim().is_empty() {
            return Err(MdefError::empty("connection string"));
        }
        let path = self.root.join(TEST_ENVIRONMENT_FILE);
        require_parent_dir(&path)?;

        let mut writer = XmlDocument::new(&path)?;
        writer.event(Event::Start(BytesStart::new("TestEnvironment")))?;
        writer.text("ConnectionString", connection_string)?;
        for suite in suites {
            let file = format!("{suite}/{suite}.xml");
            let mut element = BytesStart::new("TestSuite");
            element.push_attribute(("Name", *suite));
            element.push_attribute(("File", file.as_str()));
            writer.event(Event::Empty(element))?;
        }
        writer.event(Event::End(BytesEnd::new("TestEnvironment")))?;

        std::fs::write(&path, writer.finish()?)?;
        Ok(path)
    }
}

pub(crate) fn require_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if dir.is_dir() => Ok(()),
        Some(dir) => Err(MdefError::MissingDirectory {
            path: dir.to_path_buf(),
        }),
        None => Err(MdefError::MissingDirectory {
            path: path.to_path_buf(),
        }),
    }
}

/// Indented XML writer that tags every failure with the target path.
struct XmlDocument<'a> {
    writer: Writer<Vec<u8>>,
    path: &'a Path,
}

impl<'a> XmlDocument<'a> {
    fn new(path: &'a Path) -> Result<Self> {
        let mut doc = Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
            path,
        };
        doc.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        Ok(doc)
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| MdefError::xml(self.path, e))
    }

    fn text(&mut self, element: &str, text: &str) -> Result<()> {
        self.event(Event::Start(BytesStart::new(element)))?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.event(Event::End(BytesEnd::new(element)))
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| MdefError::xml(self.path, e))
    }
}
