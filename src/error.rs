use thiserror::Error;

/// Everything that can go wrong between a search query and a finished track.
///
/// Payloads are rendered messages rather than sources so the error can be cloned
/// into a [`crate::events::PlaybackEvent::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
  /// Search or stream resolution failed (tool missing, non-zero exit, empty or unparseable output).
  #[error("resolution failed: {0}")]
  Resolution(String),
  /// The player process could not be started.
  #[error("failed to start player: {0}")]
  Spawn(String),
  /// The player exited abnormally while a session was live.
  #[error("player exited abnormally: {0}")]
  Runtime(String),
  /// IPC send/receive failure. Never fatal to the session.
  #[error("player control failed: {0}")]
  Control(String),
}

impl PlaybackError {
  /// Map a failed `Command::spawn`/`output` into a message that tells the user what to install.
  pub(crate) fn from_launch(program: &str, err: &std::io::Error) -> String {
    if err.kind() == std::io::ErrorKind::NotFound {
      format!("{program} not found. Install it with your package manager (e.g. brew install {program})")
    } else {
      format!("failed to execute {program}: {err}")
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn launch_message_for_missing_binary() {
    let err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
    let msg = PlaybackError::from_launch("yt-dlp", &err);
    assert!(msg.starts_with("yt-dlp not found"));
  }

  #[test]
  fn launch_message_for_other_io_errors() {
    let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let msg = PlaybackError::from_launch("mpv", &err);
    assert_eq!(msg, "failed to execute mpv: denied");
  }

  #[test]
  fn display_includes_category() {
    assert_eq!(PlaybackError::Spawn("boom".into()).to_string(), "failed to start player: boom");
    assert_eq!(PlaybackError::Control("x".into()).to_string(), "player control failed: x");
  }
}
