use std::{fs, path::Path};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "rank-board.log";

/// Install the global subscriber: daily-rolling file under `logs_dir`,
/// `RUST_LOG` filtering with `info` as the fallback. Keep the returned guard
/// alive for as long as logs should be flushed.
pub fn init_logging(logs_dir: &Path) -> Result<WorkerGuard, String> {
  fs::create_dir_all(logs_dir).map_err(|e| format!("create log dir {}: {e}", logs_dir.display()))?;
  let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(non_blocking)
    .with_ansi(false)
    .try_init()
    .map_err(|e| format!("install log subscriber: {e}"))?;
  tracing::info!("logging to {}", logs_dir.display());
  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_init_reports_instead_of_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let first = init_logging(dir.path());
    let second = init_logging(dir.path());
    // another test may have installed a subscriber first; either way at most one wins
    assert!(first.is_err() || second.is_err());
    assert!(dir.path().is_dir());
  }
}
