//! Single-line commands over the player's IPC socket.
//!
//! Each call opens a fresh connection, writes one line and reads one line back. mpv may
//! interleave event lines with replies, so lines carrying an `"event"` key are skipped.

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::PlaybackError;

/// mpv JSON IPC command that toggles pause.
pub const TOGGLE_PAUSE: &str = r#"{"command":["cycle","pause"]}"#;

/// How many interleaved event lines to skip before giving up on an acknowledgment.
const MAX_SKIPPED_LINES: usize = 20;

#[cfg(unix)]
pub async fn send_command(path: &Path, command: &str, timeout: Duration) -> Result<String, PlaybackError> {
  tokio::time::timeout(timeout, exchange(path, command))
    .await
    .map_err(|_| PlaybackError::Control(format!("timed out after {timeout:?} waiting for player reply")))?
}

#[cfg(not(unix))]
pub async fn send_command(_path: &Path, _command: &str, _timeout: Duration) -> Result<String, PlaybackError> {
  Err(PlaybackError::Control("IPC control is only supported on unix".to_string()))
}

#[cfg(unix)]
async fn exchange(path: &Path, command: &str) -> Result<String, PlaybackError> {
  let mut stream = tokio::net::UnixStream::connect(path)
    .await
    .map_err(|e| PlaybackError::Control(format!("failed to connect to {}: {e}", path.display())))?;

  let line = format!("{}\n", command.trim_end());
  stream.write_all(line.as_bytes()).await.map_err(|e| PlaybackError::Control(format!("failed to send command: {e}")))?;
  debug!(command = %command.trim_end(), "control: command sent");

  let mut lines = BufReader::new(stream).lines();
  for _ in 0..MAX_SKIPPED_LINES {
    let reply = lines
      .next_line()
      .await
      .map_err(|e| PlaybackError::Control(format!("failed to read reply: {e}")))?
      .ok_or_else(|| PlaybackError::Control("connection closed before reply".to_string()))?;
    if is_event_line(&reply) {
      continue;
    }
    return Ok(reply);
  }
  Err(PlaybackError::Control("no reply among player events".to_string()))
}

fn is_event_line(line: &str) -> bool {
  serde_json::from_str::<serde_json::Value>(line).is_ok_and(|v| v.get("event").is_some())
}

/// mpv replies `{"error":"success",...}`; anything else is a rejected command.
pub fn check_reply(reply: &str) -> Result<(), PlaybackError> {
  let value: serde_json::Value =
    serde_json::from_str(reply).map_err(|e| PlaybackError::Control(format!("unreadable reply '{reply}': {e}")))?;
  match value.get("error").and_then(|v| v.as_str()) {
    Some("success") => Ok(()),
    Some(other) => Err(PlaybackError::Control(format!("player rejected command: {other}"))),
    None => Err(PlaybackError::Control(format!("reply without status: {reply}"))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_lines_are_recognized() {
    assert!(is_event_line(r#"{"event":"property-change","name":"pause"}"#));
    assert!(!is_event_line(r#"{"data":null,"error":"success","request_id":0}"#));
    assert!(!is_event_line("not json"));
  }

  #[test]
  fn reply_status() {
    assert!(check_reply(r#"{"data":null,"error":"success"}"#).is_ok());
    assert!(matches!(check_reply(r#"{"error":"property not found"}"#), Err(PlaybackError::Control(_))));
    assert!(matches!(check_reply("garbage"), Err(PlaybackError::Control(_))));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn missing_socket_is_a_control_error() {
    let path = std::env::temp_dir().join(format!("ytplay-test-missing-{}.sock", std::process::id()));
    let err = send_command(&path, TOGGLE_PAUSE, Duration::from_millis(500)).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Control(ref msg) if msg.contains("failed to connect")));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn round_trip_skips_events() {
    use tokio::net::UnixListener;

    let path = std::env::temp_dir().join(format!("ytplay-test-ack-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let (read, mut write) = stream.into_split();
      let mut lines = BufReader::new(read).lines();
      let received = lines.next_line().await.unwrap().unwrap();
      write.write_all(b"{\"event\":\"pause\"}\n").await.unwrap();
      write.write_all(b"{\"data\":null,\"error\":\"success\"}\n").await.unwrap();
      received
    });

    let reply = send_command(&path, TOGGLE_PAUSE, Duration::from_secs(2)).await.unwrap();
    assert!(check_reply(&reply).is_ok());
    assert_eq!(server.await.unwrap(), TOGGLE_PAUSE);
    let _ = std::fs::remove_file(&path);
  }
}
