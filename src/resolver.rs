use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::constants;
use crate::error::PlaybackError;

/// A search hit. Immutable once returned; the caller owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaCandidate {
  pub id: String,
  pub title: String,
  pub duration_seconds: f64,
  pub uploader: String,
}

impl MediaCandidate {
  /// `m:ss` or `h:mm:ss`, for list rendering.
  pub fn duration_label(&self) -> String {
    let total = self.duration_seconds.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 { format!("{h}:{m:02}:{s:02}") } else { format!("{m}:{s:02}") }
  }
}

/// One `--dump-json` record. yt-dlp emits many more fields; only these are read.
#[derive(Debug, Deserialize)]
struct SearchRecord {
  id: Option<String>,
  title: Option<String>,
  duration: Option<f64>,
  uploader: Option<String>,
}

impl SearchRecord {
  fn into_candidate(self) -> Option<MediaCandidate> {
    let id = self.id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
    let title = self.title.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
    Some(MediaCandidate {
      id,
      title,
      duration_seconds: self.duration.unwrap_or(0.0),
      uploader: self.uploader.unwrap_or_default(),
    })
  }
}

/// Parse a single `--dump-json` line. Banners, blank lines and malformed JSON yield `None`.
fn parse_search_line(line: &str) -> Option<MediaCandidate> {
  let line = line.trim();
  if !line.starts_with('{') {
    return None;
  }
  match serde_json::from_str::<SearchRecord>(line) {
    Ok(record) => record.into_candidate(),
    Err(e) => {
      debug!(err = %e, "resolver: skipping malformed search line");
      None
    }
  }
}

/// Parse yt-dlp stdout into at most `max_results` candidates.
fn parse_search_output(stdout: &str, max_results: usize) -> Vec<MediaCandidate> {
  stdout.lines().filter_map(parse_search_line).take(max_results).collect()
}

/// The stream address is the only non-blank line of `-g` output.
fn parse_stream_address(stdout: &str) -> Result<String, PlaybackError> {
  let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
  let Some(address) = lines.next() else {
    return Err(PlaybackError::Resolution("empty stream URL".to_string()));
  };
  if lines.next().is_some() {
    return Err(PlaybackError::Resolution("expected exactly one stream URL, got several".to_string()));
  }
  Ok(address.to_string())
}

/// Resolution of a candidate id into a playable address. The supervisor goes through this
/// seam so the embedding program can supply its own resolution.
pub trait StreamResolver: Send + Sync + 'static {
  fn resolve(&self, media_id: &str) -> impl Future<Output = Result<String, PlaybackError>> + Send;
}

/// Runs `yt-dlp` for searches and stream resolution.
#[derive(Debug, Clone)]
pub struct Resolver {
  program: PathBuf,
  watch_url_template: String,
  audio_format: String,
}

impl Default for Resolver {
  fn default() -> Self {
    Self::new(PathBuf::from(&constants().resolver_program))
  }
}

impl Resolver {
  pub fn new(program: PathBuf) -> Self {
    Self {
      program,
      watch_url_template: constants().watch_url_template.clone(),
      audio_format: constants().audio_format.clone(),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.resolver_program())
  }

  fn program_name(&self) -> String {
    self.program.display().to_string()
  }

  /// Ids that are already URLs are passed through untouched.
  pub fn watch_url(&self, media_id: &str) -> String {
    if media_id.starts_with("http://") || media_id.starts_with("https://") {
      media_id.to_string()
    } else {
      self.watch_url_template.replace("{id}", media_id)
    }
  }

  async fn run(&self, args: &[&str]) -> Result<String, PlaybackError> {
    let output = Command::new(&self.program)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| PlaybackError::Resolution(PlaybackError::from_launch(&self.program_name(), &e)))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(PlaybackError::Resolution(format!(
        "{} exited with {}: {}",
        self.program_name(),
        output.status,
        stderr.trim()
      )));
    }

    String::from_utf8(output.stdout)
      .map_err(|e| PlaybackError::Resolution(format!("{} output is not UTF-8: {e}", self.program_name())))
  }

  /// List up to `max_results` hits for `query` without downloading anything.
  ///
  /// "No results" is an error, never an empty list.
  pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<MediaCandidate>, PlaybackError> {
    if max_results == 0 {
      return Err(PlaybackError::Resolution("max_results must be at least 1".to_string()));
    }
    let query = query.trim();
    if query.is_empty() {
      return Err(PlaybackError::Resolution("empty search query".to_string()));
    }

    info!(query = %query, max_results, "resolver: searching");
    let search = format!("ytsearch{max_results}:{query}");
    let stdout =
      self.run(&["--flat-playlist", "--dump-json", "--no-warnings", "--ignore-errors", "--", &search]).await?;

    let candidates = parse_search_output(&stdout, max_results);
    if candidates.is_empty() {
      warn!(query = %query, "resolver: no parseable results");
      return Err(PlaybackError::Resolution(format!("no results for '{query}'")));
    }
    info!(query = %query, count = candidates.len(), "resolver: search complete");
    Ok(candidates)
  }

  /// Resolve an id into a short-lived, directly playable stream URL, preferring audio-only.
  pub async fn resolve(&self, media_id: &str) -> Result<String, PlaybackError> {
    let url = self.watch_url(media_id);
    info!(url = %url, "resolver: resolving stream address");
    let stdout = self.run(&["-f", &self.audio_format, "-g", "--no-warnings", "--", &url]).await?;
    let address = parse_stream_address(&stdout)?;
    debug!(address = %address, "resolver: stream address resolved");
    Ok(address)
  }
}

impl StreamResolver for Resolver {
  fn resolve(&self, media_id: &str) -> impl Future<Output = Result<String, PlaybackError>> + Send {
    Resolver::resolve(self, media_id)
  }
}
