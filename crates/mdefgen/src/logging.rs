//! Structured logging for generator runs.
//!
//! Human-readable compact output always goes to stderr. With a run
//! directory, JSON lines also go to `<run_dir>/mdefgen.log.jsonl`, so a run
//! can be inspected with `jq` afterwards. Events carry `document`, `table`,
//! `policy` and `starting_id` fields where they apply.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// File name of the JSON-lines log inside the run directory.
pub const LOG_FILE_NAME: &str = "mdefgen.log.jsonl";

/// Returned by [`init_logging`]. Keep it alive for the whole run.
#[derive(Debug)]
pub struct LogGuard {
    /// JSON-lines log, when a run directory was given.
    pub log_path: Option<PathBuf>,
}

/// `MakeWriter` over a shared file; one lock per event.
#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        // A panic mid-write leaves at worst a torn line.
        SharedFileGuard {
            guard: self.file.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct SharedFileGuard<'a> {
    guard: MutexGuard<'a, File>,
}

impl Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.guard.flush()
    }
}

type JsonFileLayer<S> =
    tracing_subscriber::fmt::Layer<S, JsonFields, Format<Json>, SharedFileWriter>;

fn json_file_layer<S>(file: File) -> JsonFileLayer<S> {
    tracing_subscriber::fmt::layer()
        .json()
        .with_writer(SharedFileWriter {
            file: Arc::new(Mutex::new(file)),
        })
        .with_target(true)
        .with_thread_ids(true)
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "trace" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// `verbose` lowers the default filter from `info` to `trace`; `RUST_LOG`
/// overrides both. Fails if the run directory or log file cannot be
/// created, or if a global subscriber is already installed.
pub fn init_logging(run_dir: Option<&Path>, verbose: bool) -> std::io::Result<LogGuard> {
    let (json_layer, log_path) = match run_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(LOG_FILE_NAME);
            (Some(json_file_layer(File::create(&path)?)), Some(path))
        }
        None => (None, None),
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(terminal_layer)
        .with(json_layer)
        .try_init()
        .map_err(std::io::Error::other)?;

    Ok(LogGuard { log_path })
}

/// Test-writer logging; safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(default_filter(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

/// Run one pipeline stage and log how long it took and whether it
/// succeeded.
pub fn log_timed_operation<T, E: std::fmt::Display>(
    operation: &str,
    document: &str,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let start = Instant::now();
    let result = f();
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match &result {
        Ok(_) => tracing::info!(
            operation,
            document,
            elapsed_ms,
            success = true,
            "stage complete"
        ),
        Err(e) => tracing::warn!(
            operation,
            document,
            elapsed_ms,
            success = false,
            error = %e,
            "stage failed"
        ),
    }
    result
}
