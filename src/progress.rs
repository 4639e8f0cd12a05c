//! Status-line parsing for the player process.
//!
//! mpv is launched with a `--term-status-msg` that matches one of the grammars below, so
//! the parser and the status message always travel together as a [`ProgressFormat`].
//!
//! - [`ProgressFormat::Clock`] (default): `A: HH:MM:SS / HH:MM:SS (NN%)`, where either clock
//!   may carry a `.mmm` fraction (mpv's `/full` rendering)
//! - [`ProgressFormat::Seconds`]: `A: 65.3 / 220.0 (NN%)`
//!
//! Whitespace between tokens may be any non-empty run, the percent has one to three
//! digits, and text before or after the match (a `(Paused)` prefix, cache info) is ignored.

use regex::Regex;
use std::sync::LazyLock;

static CLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  // Safety: literal pattern, covered by tests.
  Regex::new(r"A:\s+(\d{2,}:\d{2}:\d{2}(?:\.\d+)?)\s+/\s+(\d{2,}:\d{2}:\d{2}(?:\.\d+)?)\s+\((\d{1,3})%\)").expect("valid clock pattern")
});

static SECONDS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  // Safety: literal pattern, covered by tests.
  Regex::new(r"A:\s+(\d+(?:\.\d+)?)\s+/\s+(\d+(?:\.\d+)?)\s+\((\d{1,3})%\)").expect("valid seconds pattern")
});

/// One recognized status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackProgress {
  pub elapsed: String,
  pub total: String,
  pub percent: u8,
}

impl PlaybackProgress {
  /// The completion value reported on clean exit: elapsed is the last known total.
  pub fn finished(last: &PlaybackProgress) -> Self {
    Self { elapsed: last.total.clone(), total: last.total.clone(), percent: 100 }
  }
}

/// A status-line grammar. Implementations are pure: the same line always gives the same answer.
pub trait ProgressParser: Send + Sync {
  fn parse(&self, line: &str) -> Option<PlaybackProgress>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressFormat {
  #[default]
  Clock,
  Seconds,
}

impl ProgressFormat {
  pub fn from_config(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "seconds" => ProgressFormat::Seconds,
      _ => ProgressFormat::Clock,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      ProgressFormat::Clock => "clock",
      ProgressFormat::Seconds => "seconds",
    }
  }

  /// The mpv `--term-status-msg` value that produces lines this format parses.
  pub fn status_msg(self) -> &'static str {
    match self {
      ProgressFormat::Clock => "A: ${time-pos} / ${duration} (${percent-pos}%)",
      ProgressFormat::Seconds => "A: ${=time-pos} / ${=duration} (${percent-pos}%)",
    }
  }

  fn pattern(self) -> &'static Regex {
    match self {
      ProgressFormat::Clock => &CLOCK_PATTERN,
      ProgressFormat::Seconds => &SECONDS_PATTERN,
    }
  }
}

impl ProgressParser for ProgressFormat {
  fn parse(&self, line: &str) -> Option<PlaybackProgress> {
    let caps = self.pattern().captures(line)?;
    let percent: u16 = caps[3].parse().ok()?;
    Some(PlaybackProgress {
      elapsed: caps[1].to_string(),
      total: caps[2].to_string(),
      percent: percent.min(100) as u8,
    })
  }
}

/// Duplicate suppression and the "never 100 from a line" rule.
#[derive(Debug, Default)]
pub struct ProgressTracker {
  last_percent: Option<u8>,
}

impl ProgressTracker {
  /// Returns the progress to emit, or `None` when it repeats the last percent or claims completion.
  pub fn accept(&mut self, progress: PlaybackProgress) -> Option<PlaybackProgress> {
    if progress.percent >= 100 || self.last_percent == Some(progress.percent) {
      return None;
    }
    self.last_percent = Some(progress.percent);
    Some(progress)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn clock(line: &str) -> Option<PlaybackProgress> {
    ProgressFormat::Clock.parse(line)
  }

  #[test]
  fn clock_line_parses() {
    let p = clock("A: 00:01:05 / 00:03:40 (30%)").unwrap();
    assert_eq!(p.elapsed, "00:01:05");
    assert_eq!(p.total, "00:03:40");
    assert_eq!(p.percent, 30);
  }

  #[test]
  fn clock_line_with_surrounding_text() {
    let p = clock("(Paused) A: 01:10:00 / 02:00:00 (58%) Cache: 9.8s/2MB").unwrap();
    assert_eq!((p.elapsed.as_str(), p.total.as_str(), p.percent), ("01:10:00", "02:00:00", 58));
  }

  #[test]
  fn clock_line_with_wide_spacing() {
    let p = clock("A:  00:00:03  /  00:03:40  (1%)").unwrap();
    assert_eq!(p.percent, 1);
  }

  #[test]
  fn non_matching_line_is_idempotent() {
    let line = "[ffmpeg] https: Will reconnect at 1024 in 0 second(s)";
    assert_eq!(clock(line), None);
    assert_eq!(clock(line), None);
  }

  #[test]
  fn missing_percent_suffix_does_not_match() {
    assert_eq!(clock("A: 00:01:05 / 00:03:40 (30)"), None);
    assert_eq!(clock("A: 00:01:05 / 00:03:40"), None);
  }

  #[test]
  fn clock_line_with_milliseconds() {
    let p = clock("A: 00:01:05.123 / 00:03:40.000 (30%)").unwrap();
    assert_eq!((p.elapsed.as_str(), p.total.as_str(), p.percent), ("00:01:05.123", "00:03:40.000", 30));
  }

  /// Fill a status message template the way mpv expands its properties.
  fn render(template: &str, pos: &str, duration: &str, percent: &str) -> String {
    template
      .replace("${time-pos}", pos)
      .replace("${duration}", duration)
      .replace("${=time-pos}", pos)
      .replace("${=duration}", duration)
      .replace("${percent-pos}", percent)
  }

  #[test]
  fn clock_status_msg_output_parses() {
    let template = ProgressFormat::Clock.status_msg();
    assert!(!template.contains("/full"));
    let p = clock(&render(template, "00:01:05", "00:03:40", "30")).unwrap();
    assert_eq!((p.elapsed.as_str(), p.total.as_str(), p.percent), ("00:01:05", "00:03:40", 30));
  }

  #[test]
  fn seconds_status_msg_output_parses() {
    let line = render(ProgressFormat::Seconds.status_msg(), "65.300000", "220.000000", "30");
    assert_eq!(ProgressFormat::Seconds.parse(&line).map(|p| p.percent), Some(30));
  }

  #[test]
  fn clock_format_rejects_fractional_seconds() {
    assert_eq!(clock("A: 65.3 / 220.0 (30%)"), None);
  }

  #[test]
  fn seconds_line_parses() {
    let p = ProgressFormat::Seconds.parse("A: 65.300000 / 220.000000 (30%)").unwrap();
    assert_eq!(p.elapsed, "65.300000");
    assert_eq!(p.total, "220.000000");
    assert_eq!(p.percent, 30);
  }

  #[test]
  fn seconds_line_whole_numbers() {
    let p = ProgressFormat::Seconds.parse("A: 5 / 10 (50%)").unwrap();
    assert_eq!(p.percent, 50);
  }

  #[test]
  fn oversized_percent_is_clamped() {
    assert_eq!(clock("A: 00:03:41 / 00:03:40 (101%)").unwrap().percent, 100);
  }

  #[test]
  fn format_from_config() {
    assert_eq!(ProgressFormat::from_config("seconds"), ProgressFormat::Seconds);
    assert_eq!(ProgressFormat::from_config("SECONDS"), ProgressFormat::Seconds);
    assert_eq!(ProgressFormat::from_config("clock"), ProgressFormat::Clock);
    assert_eq!(ProgressFormat::from_config("whatever"), ProgressFormat::Clock);
  }

  #[test]
  fn tracker_suppresses_repeats() {
    let mut tracker = ProgressTracker::default();
    let line = "A: 00:01:05 / 00:03:40 (30%)";
    assert!(tracker.accept(clock(line).unwrap()).is_some());
    assert!(tracker.accept(clock(line).unwrap()).is_none());
    assert!(tracker.accept(clock("A: 00:01:06 / 00:03:40 (30%)").unwrap()).is_none());
    assert!(tracker.accept(clock("A: 00:01:12 / 00:03:40 (31%)").unwrap()).is_some());
  }

  #[test]
  fn tracker_tolerates_going_backwards() {
    let mut tracker = ProgressTracker::default();
    assert!(tracker.accept(clock("A: 00:01:12 / 00:03:40 (31%)").unwrap()).is_some());
    assert_eq!(tracker.accept(clock("A: 00:00:10 / 00:03:40 (4%)").unwrap()).map(|p| p.percent), Some(4));
  }

  #[test]
  fn tracker_never_reports_completion() {
    let mut tracker = ProgressTracker::default();
    assert!(tracker.accept(clock("A: 00:03:40 / 00:03:40 (100%)").unwrap()).is_none());
  }

  #[test]
  fn finished_uses_last_total() {
    let last = clock("A: 00:03:38 / 00:03:40 (99%)").unwrap();
    let done = PlaybackProgress::finished(&last);
    assert_eq!(done, PlaybackProgress { elapsed: "00:03:40".into(), total: "00:03:40".into(), percent: 100 });
  }
}
