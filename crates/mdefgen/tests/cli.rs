//! Runs the `mdefgen` binary over a temporary test-definition tree.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{Value, json};

const EMPTY: &str = r#"{"Tables": [], "StoredProcedures": []}"#;

const ONE_TABLE: &str = r#"{"Tables": [
    {"TableName": "T1", "APIAccess": {"ReadAPI": {}},
     "Columns": [{"Name": "A", "Metadata": {"SQLType": "SQL_INTEGER"}}]}
]}"#;

struct Tree {
    dir: tempfile::TempDir,
}

impl Tree {
    /// `suites` maps suite name to its required test sets; only the suites
    /// in `with_dirs` get a `TestSets` directory.
    fn new(suites: &Value, with_dirs: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("old.json"), EMPTY).unwrap();
        std::fs::write(root.join("new.json"), ONE_TABLE).unwrap();
        for suite in with_dirs {
            std::fs::create_dir_all(root.join("defs").join(suite).join("TestSets")).unwrap();
        }
        let input = json!({
            "ConnectionString": "DSN=Integration",
            "DifferenceFindMode": {"ModifiedMDEFLocation": root.join("new.json")},
            "PerforceLocation": {
                "MDEFLocation": root.join("old.json"),
                "TestDefinitionsLocation": root.join("defs"),
            },
            "TestSuite": suites,
        });
        std::fs::write(root.join("input.json"), input.to_string()).unwrap();
        Self { dir }
    }

    fn defs(&self) -> PathBuf {
        self.dir.path().join("defs")
    }

    fn input(&self) -> PathBuf {
        self.dir.path().join("input.json")
    }
}

fn mdefgen(args: &[&str], input: Option<&Path>) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mdefgen"));
    command.args(args).env_remove("RUST_LOG").env("NO_COLOR", "1");
    if let Some(input) = input {
        command.arg("--input").arg(input);
    }
    command.output().unwrap()
}

fn report(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn one_environment_lists_every_suite_with_test_sets() {
    let tree = Tree::new(
        &json!({
            "Integration": {"SQL_SELECT_ALL": true, "SQL_ORDER_BY": true},
            "Other": {"SQL_AND_OR": true},
            "SP": {"SQL_SP": true},
        }),
        &["Integration", "Other", "SP"],
    );

    let output = mdefgen(&["test-sets", "--any-new"], Some(&tree.input()));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");
    // No --log-dir: stage events still reach the terminal.
    assert!(stderr.contains("test-set run complete"), "{stderr}");

    let env = std::fs::read_to_string(tree.defs().join("TestEnvironment.xml")).unwrap();
    assert!(env.contains(r#"Name="Integration""#), "{env}");
    assert!(env.contains(r#"Name="Other""#), "{env}");
    assert!(!env.contains("SP"), "{env}");
    assert!(tree.defs().join("Other/TestSets/SQL_SELECT_ALL.xml").is_file());
    assert!(!tree.defs().join("SP/TestSets/SQL_SELECT_ALL.xml").exists());

    let report = report(&output);
    assert_eq!(report["mode"], "test_sets");
    assert_eq!(report["summaries"].as_array().unwrap().len(), 2);
    assert!(report["failures"].as_array().unwrap().is_empty());
}

#[test]
fn missing_suite_directory_sets_precondition_exit_code() {
    let tree = Tree::new(
        &json!({
            "Integration": {"SQL_SELECT_ALL": true},
            "Missing": {"SQL_SELECT_ALL": true},
        }),
        &["Integration"],
    );

    let output = mdefgen(&["test-sets", "--any-new"], Some(&tree.input()));
    assert_eq!(output.status.code(), Some(6));

    let report = report(&output);
    assert_eq!(report["failures"][0]["suite"], "Missing");
    assert_eq!(report["failures"][0]["class"], "precondition");
    let env = std::fs::read_to_string(tree.defs().join("TestEnvironment.xml")).unwrap();
    assert!(env.contains(r#"Name="Integration""#), "{env}");
    assert!(!env.contains("Missing"), "{env}");
}

#[test]
fn missing_input_exits_with_its_class() {
    let dir = tempfile::tempdir().unwrap();
    let output = mdefgen(&["result-sets"], Some(&dir.path().join("absent.json")));
    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[precondition]"));
}

#[test]
fn unknown_option_is_a_usage_error() {
    let output = mdefgen(&["test-sets", "--frobnicate"], None);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}
