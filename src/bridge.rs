//! The two workers attached to every spawned player: an output reader that turns status
//! lines into events, and an exit waiter that owns the child and reports how it ended.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::player::Core;

/// How the player process ended.
#[derive(Debug)]
pub(crate) enum ExitOutcome {
  Exited(ExitStatus),
  WaitFailed(io::Error),
  /// The session was cancelled and the process terminated on our side.
  Cancelled,
}

/// Spawn both workers for session `generation`. The returned receiver fires once the process
/// has been reaped and the output reader has finished.
pub(crate) fn attach(
  core: Arc<Core>,
  generation: u64,
  cancel: CancellationToken,
  mut child: Child,
  stdout: Option<ChildStdout>,
  stderr: Option<ChildStderr>,
) -> oneshot::Receiver<()> {
  let (reaped_tx, reaped_rx) = oneshot::channel();
  let mut reader = tokio::spawn(scan_output(Arc::clone(&core), generation, cancel.clone(), stdout, stderr));

  tokio::spawn(async move {
    let grace = core.kill_grace();
    let outcome = wait_for_exit(&mut child, &cancel, grace).await;
    debug!(generation, ?outcome, "bridge: player exited");

    // Let the reader drain what the process wrote before exiting. A grandchild holding the
    // pipe open must not keep the session alive.
    if tokio::time::timeout(grace, &mut reader).await.is_err() {
      debug!(generation, "bridge: output still open after exit, cancelling reader");
      cancel.cancel();
      let _ = reader.await;
    }
    let _ = reaped_tx.send(());

    if !matches!(outcome, ExitOutcome::Cancelled) {
      core.finish(generation, outcome).await;
    }
  });

  reaped_rx
}

async fn wait_for_exit(child: &mut Child, cancel: &CancellationToken, grace: Duration) -> ExitOutcome {
  tokio::select! {
    status = child.wait() => match status {
      Ok(status) => ExitOutcome::Exited(status),
      Err(e) => ExitOutcome::WaitFailed(e),
    },
    _ = cancel.cancelled() => {
      terminate(child, grace).await;
      ExitOutcome::Cancelled
    }
  }
}

/// SIGTERM first, then kill if the process is still around after `grace`.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) {
  if let Some(pid) = child.id() {
    // Safety: the child has not been reaped yet (we own it and haven't waited on it to
    // completion), so the pid still refers to our process.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
      debug!(pid, err = %io::Error::last_os_error(), "bridge: SIGTERM failed");
    }
    match tokio::time::timeout(grace, child.wait()).await {
      Ok(Ok(status)) => {
        info!(pid, %status, "bridge: player terminated");
        return;
      }
      Ok(Err(e)) => warn!(pid, err = %e, "bridge: wait after SIGTERM failed"),
      Err(_) => warn!(pid, ?grace, "bridge: player ignored SIGTERM, killing"),
    }
  }
  kill(child).await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) {
  kill(child).await;
}

async fn kill(child: &mut Child) {
  if let Err(e) = child.kill().await {
    warn!(err = %e, "bridge: failed to kill player");
  }
}

/// Read stdout and stderr together until both close or the session is cancelled.
async fn scan_output(
  core: Arc<Core>,
  generation: u64,
  cancel: CancellationToken,
  stdout: Option<ChildStdout>,
  stderr: Option<ChildStderr>,
) {
  let mut stdout = stdout.map(BufReader::new);
  let mut stderr = stderr.map(BufReader::new);
  let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());

  while stdout.is_some() || stderr.is_some() {
    tokio::select! {
      _ = cancel.cancelled() => break,
      read = next_segment(stdout.as_mut(), &mut out_buf), if stdout.is_some() => match read {
        Ok(Some(line)) => core.observe_line(generation, &line),
        Ok(None) => stdout = None,
        Err(e) => {
          warn!(generation, err = %e, "bridge: stdout read failed");
          stdout = None;
        }
      },
      read = next_segment(stderr.as_mut(), &mut err_buf), if stderr.is_some() => match read {
        Ok(Some(line)) => core.observe_line(generation, &line),
        Ok(None) => stderr = None,
        Err(e) => {
          warn!(generation, err = %e, "bridge: stderr read failed");
          stderr = None;
        }
      },
    }
  }
  debug!(generation, "bridge: output reader done");
}

/// Next `\n`- or `\r`-terminated segment, or the unterminated tail at EOF.
///
/// Partial input is kept in `buf`, so a cancelled call loses nothing.
async fn next_segment<R>(reader: Option<&mut R>, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
  R: AsyncBufRead + Unpin,
{
  let Some(reader) = reader else {
    return std::future::pending().await;
  };
  loop {
    let available = reader.fill_buf().await?;
    if available.is_empty() {
      if buf.is_empty() {
        return Ok(None);
      }
      let line = String::from_utf8_lossy(buf).into_owned();
      buf.clear();
      return Ok(Some(line));
    }
    if let Some(pos) = available.iter().position(|b| *b == b'\n' || *b == b'\r') {
      buf.extend_from_slice(&available[..pos]);
      reader.consume(pos + 1);
      let line = String::from_utf8_lossy(buf).into_owned();
      buf.clear();
      return Ok(Some(line));
    }
    let len = available.len();
    buf.extend_from_slice(available);
    reader.consume(len);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn segments(input: &[u8]) -> Vec<String> {
    let mut reader = BufReader::with_capacity(4, input);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    while let Some(line) = next_segment(Some(&mut reader), &mut buf).await.unwrap() {
      out.push(line);
    }
    out
  }

  #[tokio::test]
  async fn splits_on_newline_and_carriage_return() {
    let got = segments(b"A: 00:00:01 / 00:00:10 (10%)\rA: 00:00:02 / 00:00:10 (20%)\ndone\n").await;
    assert_eq!(got, vec!["A: 00:00:01 / 00:00:10 (10%)", "A: 00:00:02 / 00:00:10 (20%)", "done"]);
  }

  #[tokio::test]
  async fn crlf_yields_an_empty_segment() {
    assert_eq!(segments(b"one\r\ntwo").await, vec!["one", "", "two"]);
  }

  #[tokio::test]
  async fn unterminated_tail_is_returned_at_eof() {
    assert_eq!(segments(b"partial status").await, vec!["partial status"]);
    assert!(segments(b"").await.is_empty());
  }

  #[tokio::test]
  async fn invalid_utf8_is_replaced() {
    assert_eq!(segments(b"caf\xe9\n").await, vec!["caf\u{fffd}"]);
  }

  #[tokio::test]
  async fn absent_reader_never_resolves() {
    let mut buf = Vec::new();
    let pending = next_segment::<BufReader<&[u8]>>(None, &mut buf);
    assert!(tokio::time::timeout(Duration::from_millis(20), pending).await.is_err());
  }
}
