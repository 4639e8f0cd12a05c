//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // External tools
  pub resolver_program: String,
  pub player_program: String,

  // yt-dlp
  pub watch_url_template: String,
  pub audio_format: String,
  pub default_max_results: usize,

  // Supervisor
  pub event_queue_capacity: usize,
  pub kill_grace_ms: u64,
  pub control_timeout_ms: u64,
  pub ipc_socket_prefix: String,
}

impl Constants {
  pub fn kill_grace(&self) -> Duration {
    Duration::from_millis(self.kill_grace_ms)
  }

  pub fn control_timeout(&self) -> Duration {
    Duration::from_millis(self.control_timeout_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this fails on first access in any test.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embedded_constants_parse() {
    let c = constants();
    assert_eq!(c.resolver_program, "yt-dlp");
    assert_eq!(c.player_program, "mpv");
    assert!(c.watch_url_template.contains("{id}"));
    assert!(c.event_queue_capacity > 0);
    assert!(c.default_max_results >= 1);
  }
}
