use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use mdefgen::config::{DEFAULT_SEED, RunInput};
use mdefgen::logging::init_logging;
use mdefgen::{
    BatchReport, DiffPolicy, MdefError, SnapshotSource, run_result_sets, run_test_sets,
};

#[derive(Debug)]
struct CliConfig {
    mode: Mode,
    input: PathBuf,
    old: Option<PathBuf>,
    new: Option<PathBuf>,
    results: Option<PathBuf>,
    seed: u64,
    log_dir: Option<PathBuf>,
    verbose: bool,
    any_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    TestSets,
    ResultSets,
}

fn print_help() {
    let help = "\
mdefgen: generate SQL conformance test sets from MDEF snapshot differences

USAGE:
    mdefgen <test-sets|result-sets> --input <PATH> [OPTIONS]

COMMANDS:
    test-sets              Diff two snapshots and write the SQL_SELECT_ALL test set
    result-sets            Sample SELECT_ALL results and write data-dependent test sets

OPTIONS:
    --input <PATH>         Run input document (input.json)
    --old <PATH>           Baseline snapshot (default: MDEFLocation)
    --new <PATH>           Modified snapshot (default: ModifiedMDEFLocation)
    --results <DIR>        Harness result directory (default: <defs>/Results)
    --seed <u64>           Random seed for query synthesis
    --log-dir <DIR>        Also write JSON-lines logs to this directory
    --verbose              Trace-level logging
    --any-new              Treat any new table or procedure as a difference
    -h, --help             Show this help

EXIT CODES:
    0 success, 2 usage, 3 structural, 4 not found, 5 data availability,
    6 precondition, 7 I/O
";
    println!("{help}");
}

fn parse_u64(value: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| format!("invalid u64 value: {value}"))
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args(args: &[String]) -> Result<CliConfig, CliError> {
    let mode = match args.first().map(String::as_str) {
        Some("test-sets") => Mode::TestSets,
        Some("result-sets") => Mode::ResultSets,
        Some("-h" | "--help") | None => {
            print_help();
            return Err(CliError::Help);
        }
        Some(unknown) => return Err(CliError::Usage(format!("unknown command: {unknown}"))),
    };

    let mut input = None;
    let mut config = CliConfig {
        mode,
        input: PathBuf::new(),
        old: None,
        new: None,
        results: None,
        seed: DEFAULT_SEED,
        log_dir: None,
        verbose: false,
        any_new: false,
    };

    let mut index = 1usize;
    while index < args.len() {
        match args[index].as_str() {
            "--input" => input = Some(PathBuf::from(take_value(args, &mut index, "--input")?)),
            "--old" => config.old = Some(PathBuf::from(take_value(args, &mut index, "--old")?)),
            "--new" => config.new = Some(PathBuf::from(take_value(args, &mut index, "--new")?)),
            "--results" => {
                config.results = Some(PathBuf::from(take_value(args, &mut index, "--results")?));
            }
            "--seed" => config.seed = parse_u64(take_value(args, &mut index, "--seed")?)?,
            "--log-dir" => {
                config.log_dir = Some(PathBuf::from(take_value(args, &mut index, "--log-dir")?));
            }
            "--verbose" => config.verbose = true,
            "--any-new" => config.any_new = true,
            "-h" | "--help" => {
                print_help();
                return Err(CliError::Help);
            }
            unknown => return Err(CliError::Usage(format!("unknown option: {unknown}"))),
        }
        index += 1;
    }

    config.input = input.ok_or_else(|| CliError::Usage("--input is required".to_owned()))?;
    Ok(config)
}

#[derive(Debug)]
enum CliError {
    Help,
    Usage(String),
    Generator(MdefError),
}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        Self::Usage(message)
    }
}

impl From<MdefError> for CliError {
    fn from(error: MdefError) -> Self {
        Self::Generator(error)
    }
}

fn describe(error: &MdefError) -> String {
    match error.suggestion() {
        Some(hint) => format!("[{}] {error} ({hint})", error.class().as_str()),
        None => format!("[{}] {error}", error.class().as_str()),
    }
}

fn snapshot_paths(cli: &CliConfig, input: &RunInput) -> Result<(PathBuf, PathBuf), MdefError> {
    let old = cli
        .old
        .clone()
        .or_else(|| input.mdef_location.clone())
        .ok_or_else(|| {
            MdefError::InvalidInput("no baseline snapshot: pass --old or set MDEFLocation".to_owned())
        })?;
    let new = match (&cli.new, input.modified_mdef_location()) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => path.to_path_buf(),
        (None, None) => {
            return Err(MdefError::InvalidInput(
                "CompareLastTwoRevisions needs version control access; pass --old and --new"
                    .to_owned(),
            ));
        }
    };
    Ok((old, new))
}

fn run(args: &[String]) -> Result<BatchReport, CliError> {
    let cli = parse_args(args)?;

    let _log_guard = init_logging(cli.log_dir.as_deref(), cli.verbose)
        .map_err(|error| format!("logging_init_failed: {error}"))?;

    let input = RunInput::from_path(&cli.input)?;
    let defs = input.test_definitions_location.clone().ok_or_else(|| {
        MdefError::InvalidInput("TestDefinitionsLocation is not set".to_owned())
    })?;
    let results = cli.results.clone().unwrap_or_else(|| defs.join("Results"));
    let mut configs = input.generator_configs(&results, cli.seed)?;
    if cli.any_new {
        for config in &mut configs {
            config.diff_policy = DiffPolicy::AnyNew;
        }
    }

    let report = match cli.mode {
        Mode::TestSets => {
            let (old, new) = snapshot_paths(&cli, &input)?;
            run_test_sets(
                &configs,
                SnapshotSource::Path(&old),
                SnapshotSource::Path(&new),
                &input.connection_string,
            )?
        }
        Mode::ResultSets => run_result_sets(&configs)?,
    };

    let payload = serde_json::to_string_pretty(&report)
        .map_err(|error| format!("summary_json_serialize_failed: {error}"))?;
    println!("{payload}");
    Ok(report)
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(report) => ExitCode::from(report.exit_code()),
        Err(CliError::Help) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("ERROR mdefgen failed: {message}");
            ExitCode::from(2)
        }
        Err(CliError::Generator(error)) => {
            eprintln!("ERROR mdefgen failed: {}", describe(&error));
            ExitCode::from(error.exit_code())
        }
    }
}
