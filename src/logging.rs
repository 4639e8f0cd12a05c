use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::APP_NAME;

/// Directory for the log file. The terminal belongs to the display, so logs go to disk.
pub fn log_dir() -> PathBuf {
  ProjectDirs::from("", "", APP_NAME)
    .map(|dirs| dirs.data_local_dir().to_path_buf())
    .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

/// `RUST_LOG` wins, then the configured level, then `info`.
pub fn filter(configured: Option<&str>) -> EnvFilter {
  EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(configured.unwrap_or("info")))
    .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Keep the guard alive for the whole run or buffered
/// lines are lost.
pub fn init(configured: Option<&str>) -> Result<WorkerGuard> {
  let dir = log_dir();
  std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;
  let appender = tracing_appender::rolling::never(&dir, format!("{APP_NAME}.log"));
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter(configured))
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))?;
  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn configured_level_or_info() {
    // RUST_LOG takes precedence over everything checked here.
    if std::env::var_os("RUST_LOG").is_some() {
      return;
    }
    assert_eq!(filter(Some("debug")).to_string(), "debug");
    assert_eq!(filter(None).to_string(), "info");
    assert_eq!(filter(Some("ytplay=loud")).to_string(), "info");
  }

  #[test]
  fn log_dir_is_app_specific() {
    assert!(log_dir().to_string_lossy().contains(APP_NAME));
  }
}
