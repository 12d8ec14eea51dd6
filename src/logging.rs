use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const LOG_ENV: &str = "OFFSYNC_LOG";
const DEFAULT_DIRECTIVE: &str = "offsync=info";
const LOG_FILE_PREFIX: &str = "offsync.log";

/// Keeps the background log writer alive; flushes on drop.
pub struct LogGuard {
  _file: Option<WorkerGuard>,
}

/// Directory for daily log files under the user's data directory.
pub fn default_log_dir() -> Option<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|p| p.join("offsync").join("logs"))
}

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global subscriber.
///
/// Records go to a daily rolling file in `dir` when it can be created. With
/// `verbose`, or when no file is available, they also go to stderr so that
/// stdout stays reserved for command output.
pub fn init(dir: Option<&Path>, verbose: bool) -> LogGuard {
  let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
  let mut guard = None;
  let mut setup_error = None;

  if let Some(dir) = dir {
    match fs::create_dir_all(dir) {
      Ok(()) => {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
          fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(env_filter())
            .boxed(),
        );
        guard = Some(file_guard);
      }
      Err(err) => {
        setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
      }
    }
  }

  if verbose || guard.is_none() {
    layers.push(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter())
        .boxed(),
    );
  }

  // Ignore a second install (tests, embedding hosts)
  let _ = Registry::default().with(layers).try_init();

  if let Some(error) = setup_error {
    tracing::warn!("{error}");
  }

  LogGuard { _file: guard }
}
