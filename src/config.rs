use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::constants;
use crate::progress::ProgressFormat;

pub const APP_NAME: &str = "ytplay";

/// User preferences from `prefs.toml`. Every field is optional; unset fields fall back to
/// the compiled-in constants.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Config {
  /// Path to the `yt-dlp` binary.
  pub resolver_path: Option<PathBuf>,
  /// Path to the `mpv` binary.
  pub player_path: Option<PathBuf>,
  /// Status line grammar: "clock" (default) or "seconds".
  pub progress_format: Option<String>,
  pub max_results: Option<usize>,
  /// Full player argument list; `{url}` and `{ipc}` are substituted at spawn time.
  pub player_args: Option<Vec<String>>,
  pub log_level: Option<String>,
}

impl Config {
  pub fn load() -> Self {
    if let Some(path) = Self::path()
      && let Ok(content) = std::fs::read_to_string(path)
      && let Ok(config) = Self::from_toml_str(&content)
    {
      return config;
    }
    Self::default()
  }

  pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  pub fn save(&self) {
    if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
      let config_dir = proj_dirs.config_dir();
      if std::fs::create_dir_all(config_dir).is_ok() {
        let config_file = config_dir.join("prefs.toml");
        if let Ok(content) = toml::to_string(self) {
          let _ = std::fs::write(config_file, content);
        }
      }
    }
  }

  pub fn path() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("prefs.toml"))
  }

  pub fn resolver_program(&self) -> PathBuf {
    self.resolver_path.clone().unwrap_or_else(|| PathBuf::from(&constants().resolver_program))
  }

  pub fn player_program(&self) -> PathBuf {
    self.player_path.clone().unwrap_or_else(|| PathBuf::from(&constants().player_program))
  }

  pub fn progress_format(&self) -> ProgressFormat {
    self.progress_format.as_deref().map(ProgressFormat::from_config).unwrap_or_default()
  }

  /// Configured result count, clamped to at least one.
  pub fn max_results(&self) -> usize {
    self.max_results.unwrap_or(constants().default_max_results).max(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_is_all_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.resolver_program(), PathBuf::from("yt-dlp"));
    assert_eq!(config.player_program(), PathBuf::from("mpv"));
    assert_eq!(config.progress_format(), ProgressFormat::Clock);
    assert_eq!(config.max_results(), constants().default_max_results);
  }

  #[test]
  fn overrides_are_read() {
    let config = Config::from_toml_str(
      r#"
        player_path = "/opt/mpv/bin/mpv"
        progress_format = "seconds"
        max_results = 3
        player_args = ["--no-video", "{url}"]
      "#,
    )
    .unwrap();
    assert_eq!(config.player_program(), PathBuf::from("/opt/mpv/bin/mpv"));
    assert_eq!(config.progress_format(), ProgressFormat::Seconds);
    assert_eq!(config.max_results(), 3);
    assert_eq!(config.player_args.as_deref(), Some(&["--no-video".to_string(), "{url}".to_string()][..]));
  }

  #[test]
  fn zero_max_results_is_clamped() {
    let config = Config { max_results: Some(0), ..Config::default() };
    assert_eq!(config.max_results(), 1);
  }

  #[test]
  fn invalid_toml_is_an_error() {
    assert!(Config::from_toml_str("max_results = \"many\"").is_err());
  }
}
