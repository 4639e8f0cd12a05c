//! Playback supervisor: owns the one player process, its cancellation token and the
//! event queue the display layer drains.
//!
//! Every mutation of the current session goes through `Core::session` (an async mutex), so a
//! user `stop`, a superseding `play` and the exit waiter's cleanup after a natural exit are
//! serialized. Observable status lives behind a separate sync mutex so `is_playing` and
//! `current_info` never wait on a running `play`.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{self, ExitOutcome};
use crate::config::Config;
use crate::constants::constants;
use crate::control;
use crate::error::PlaybackError;
use crate::events::{self, EventSink, Events, PlaybackEvent, PlaybackState};
use crate::progress::{PlaybackProgress, ProgressFormat, ProgressParser, ProgressTracker};
use crate::resolver::{MediaCandidate, Resolver, StreamResolver};

/// Session numbers are process-wide so IPC socket paths never collide between supervisors.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// How to launch the player and how to read its status lines.
#[derive(Clone)]
pub struct PlayerBackend {
  program: PathBuf,
  args: Vec<String>,
  parser: Arc<dyn ProgressParser>,
}

impl PlayerBackend {
  /// `args` may contain `{url}` and `{ipc}` placeholders. Without a `{url}` argument the
  /// stream address is appended last.
  pub fn new(program: PathBuf, args: Vec<String>, parser: Arc<dyn ProgressParser>) -> Self {
    Self { program, args, parser }
  }

  pub fn mpv(program: PathBuf, format: ProgressFormat) -> Self {
    Self::new(program, Self::mpv_args(format), Arc::new(format))
  }

  pub fn from_config(config: &Config) -> Self {
    let format = config.progress_format();
    let args = config.player_args.clone().unwrap_or_else(|| Self::mpv_args(format));
    Self::new(config.player_program(), args, Arc::new(format))
  }

  /// Audio only, best audio format, IPC server, no terminal input, and a status line
  /// `format` can parse.
  pub fn mpv_args(format: ProgressFormat) -> Vec<String> {
    vec![
      "--no-video".to_string(),
      "--ytdl-format=bestaudio".to_string(),
      "--input-ipc-server={ipc}".to_string(),
      "--input-terminal=no".to_string(),
      "--msg-level=all=warn".to_string(),
      format!("--term-status-msg={}", format.status_msg()),
      "{url}".to_string(),
    ]
  }

  pub fn parser(&self) -> &dyn ProgressParser {
    self.parser.as_ref()
  }

  fn program_name(&self) -> String {
    self.program.display().to_string()
  }

  fn expand_args(&self, url: &str, ipc: &Path) -> Vec<String> {
    let ipc = ipc.display().to_string();
    let mut args: Vec<String> = self.args.iter().map(|a| a.replace("{url}", url).replace("{ipc}", &ipc)).collect();
    if !self.args.iter().any(|a| a.contains("{url}")) {
      args.push(url.to_string());
    }
    args
  }

  fn command(&self, url: &str, ipc: &Path) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd.args(self.expand_args(url, ipc));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd
  }
}

/// The player's IPC socket path. The file is unlinked when the endpoint is dropped,
/// whatever ended the session.
struct IpcEndpoint {
  path: PathBuf,
}

impl IpcEndpoint {
  fn for_session(generation: u64) -> Self {
    let name = format!("{}-{}-{}.sock", constants().ipc_socket_prefix, std::process::id(), generation);
    let path = std::env::temp_dir().join(name);
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(&path);
    Self { path }
  }

  fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for IpcEndpoint {
  fn drop(&mut self) {
    match std::fs::remove_file(&self.path) {
      Ok(()) => debug!(path = %self.path.display(), "player: removed IPC endpoint"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => warn!(path = %self.path.display(), err = %e, "player: failed to remove IPC endpoint"),
    }
  }
}

/// The live binding of one resolved stream to one player process.
struct Session {
  generation: u64,
  cancel: CancellationToken,
  /// Fires once the process is gone and its output reader has finished.
  reaped: oneshot::Receiver<()>,
  ipc: IpcEndpoint,
}

#[derive(Default)]
struct Status {
  state: PlaybackState,
  progress: PlaybackProgress,
  tracker: ProgressTracker,
  /// Generation of the bound session; 0 when none is bound.
  generation: u64,
  candidate: Option<MediaCandidate>,
  pid: Option<u32>,
  ipc_path: Option<PathBuf>,
}

impl Status {
  fn bind(&mut self, generation: u64, candidate: &MediaCandidate, pid: Option<u32>, ipc_path: &Path) {
    self.generation = generation;
    self.candidate = Some(candidate.clone());
    self.pid = pid;
    self.ipc_path = Some(ipc_path.to_path_buf());
    self.tracker = ProgressTracker::default();
  }

  fn unbind(&mut self, state: PlaybackState) {
    self.state = state;
    self.generation = 0;
    self.candidate = None;
    self.pid = None;
    self.ipc_path = None;
  }
}

pub(crate) struct Core {
  backend: PlayerBackend,
  sink: EventSink,
  session: tokio::sync::Mutex<Option<Session>>,
  status: Mutex<Status>,
  kill_grace: Duration,
  control_timeout: Duration,
}

impl Core {
  pub(crate) fn kill_grace(&self) -> Duration {
    self.kill_grace
  }

  fn launch(&self, url: &str) -> Result<(u64, Child, IpcEndpoint), PlaybackError> {
    let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
    let ipc = IpcEndpoint::for_session(generation);
    info!(generation, program = %self.backend.program_name(), ipc = %ipc.path().display(), "player: spawning");
    let child = self
      .backend
      .command(url, ipc.path())
      .spawn()
      .map_err(|e| PlaybackError::Spawn(PlaybackError::from_launch(&self.backend.program_name(), &e)))?;
    Ok((generation, child, ipc))
  }

  /// Tear down the bound session, if any. The caller holds the session lock.
  async fn teardown(&self, slot: &mut Option<Session>) -> bool {
    let Some(Session { generation, cancel, reaped, ipc }) = slot.take() else {
      return false;
    };
    info!(generation, "player: stopping session");
    cancel.cancel();
    if reaped.await.is_err() {
      warn!(generation, "player: exit waiter ended without reporting");
    }
    drop(ipc);
    self.status.lock().unbind(PlaybackState::Stopped);
    self.sink.deliver(PlaybackEvent::Stopped);
    true
  }

  /// Report a failed play attempt and return to `Idle`.
  fn fail(&self, err: PlaybackError) {
    warn!(err = %err, "player: play failed");
    self.status.lock().unbind(PlaybackState::Idle);
    self.sink.deliver(PlaybackEvent::Error(err));
    self.sink.deliver(PlaybackEvent::StateChanged(PlaybackState::Idle));
  }

  /// Classify one line of player output for session `generation`.
  pub(crate) fn observe_line(&self, generation: u64, line: &str) {
    let line = line.trim();
    if line.is_empty() {
      return;
    }
    let Some(progress) = self.backend.parser().parse(line) else {
      self.sink.offer(PlaybackEvent::OutputLine(line.to_string()));
      return;
    };

    let (became_playing, accepted) = {
      let mut status = self.status.lock();
      if status.generation != generation {
        return;
      }
      let became_playing = status.state == PlaybackState::Loading;
      if became_playing {
        status.state = PlaybackState::Playing;
      }
      let accepted = status.tracker.accept(progress);
      if let Some(ref p) = accepted {
        status.progress = p.clone();
      }
      (became_playing, accepted)
    };

    if became_playing {
      info!(generation, "player: playing");
      self.sink.deliver(PlaybackEvent::StateChanged(PlaybackState::Playing));
    }
    if let Some(progress) = accepted {
      self.sink.offer(PlaybackEvent::Progress(progress));
    }
  }

  /// Cleanup after the process ended on its own. A no-op when `stop` or a newer `play`
  /// already tore the session down.
  pub(crate) async fn finish(&self, generation: u64, outcome: ExitOutcome) {
    let mut slot = self.session.lock().await;
    if slot.as_ref().map(|s| s.generation) != Some(generation) {
      debug!(generation, "player: session already torn down");
      return;
    }
    drop(slot.take());

    match outcome {
      ExitOutcome::Exited(status) if status.success() => {
        let finished = {
          let mut s = self.status.lock();
          let finished = (s.state == PlaybackState::Playing).then(|| PlaybackProgress::finished(&s.progress));
          if let Some(ref p) = finished {
            s.progress = p.clone();
          }
          s.unbind(PlaybackState::Stopped);
          finished
        };
        info!(generation, "player: finished");
        if let Some(progress) = finished {
          self.sink.deliver(PlaybackEvent::Progress(progress));
        }
        self.sink.deliver(PlaybackEvent::StateChanged(PlaybackState::Stopped));
      }
      ExitOutcome::Exited(status) => {
        self.runtime_failure(generation, format!("player exited with {status}"));
      }
      ExitOutcome::WaitFailed(e) => {
        self.runtime_failure(generation, format!("failed to wait for player: {e}"));
      }
      ExitOutcome::Cancelled => {}
    }
  }

  fn runtime_failure(&self, generation: u64, message: String) {
    warn!(generation, err = %message, "player: exited abnormally");
    self.status.lock().unbind(PlaybackState::Idle);
    self.sink.deliver(PlaybackEvent::Error(PlaybackError::Runtime(message)));
    self.sink.deliver(PlaybackEvent::Stopped);
  }
}

/// Owns at most one playback session at a time.
///
/// Cloning is cheap and every clone drives the same session.
pub struct Supervisor<R: StreamResolver = Resolver> {
  resolver: Arc<R>,
  core: Arc<Core>,
  events: Events,
}

impl<R: StreamResolver> Clone for Supervisor<R> {
  fn clone(&self) -> Self {
    Self { resolver: Arc::clone(&self.resolver), core: Arc::clone(&self.core), events: self.events.clone() }
  }
}

impl Supervisor<Resolver> {
  pub fn from_config(config: &Config) -> Self {
    Self::new(Resolver::from_config(config), PlayerBackend::from_config(config))
  }
}

impl<R: StreamResolver> Supervisor<R> {
  pub fn new(resolver: R, backend: PlayerBackend) -> Self {
    let c = constants();
    let (sink, events) = events::channel(c.event_queue_capacity);
    let core = Core {
      backend,
      sink,
      session: tokio::sync::Mutex::new(None),
      status: Mutex::new(Status::default()),
      kill_grace: c.kill_grace(),
      control_timeout: c.control_timeout(),
    };
    Self { resolver: Arc::new(resolver), core: Arc::new(core), events }
  }

  /// Receive-only handle on the event queue.
  pub fn events(&self) -> Events {
    self.events.clone()
  }

  /// Resolve `candidate` and start playing it, replacing any current session.
  ///
  /// Returns once the player process is running; later failures arrive as events.
  /// Pre-spawn failures are both returned and emitted, and leave the state `Idle`.
  pub async fn play(&self, candidate: &MediaCandidate) -> Result<(), PlaybackError> {
    let core = &self.core;
    let mut slot = core.session.lock().await;
    core.teardown(&mut slot).await;

    info!(id = %candidate.id, title = %candidate.title, "player: loading");
    {
      let mut status = core.status.lock();
      status.state = PlaybackState::Loading;
      status.progress = PlaybackProgress::default();
    }
    core.sink.deliver(PlaybackEvent::StateChanged(PlaybackState::Loading));

    let launched = match self.resolver.resolve(&candidate.id).await {
      Ok(url) => core.launch(&url),
      Err(e) => Err(e),
    };
    let (generation, mut child, ipc) = match launched {
      Ok(launched) => launched,
      Err(e) => {
        core.fail(e.clone());
        return Err(e);
      }
    };

    core.status.lock().bind(generation, candidate, child.id(), ipc.path());
    core.sink.deliver(PlaybackEvent::Started { id: candidate.id.clone(), title: candidate.title.clone() });

    let cancel = CancellationToken::new();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let reaped = bridge::attach(Arc::clone(core), generation, cancel.clone(), child, stdout, stderr);
    *slot = Some(Session { generation, cancel, reaped, ipc });
    Ok(())
  }

  /// Stop the current session. Without one this is a no-op.
  pub async fn stop(&self) -> Result<(), PlaybackError> {
    let mut slot = self.core.session.lock().await;
    if !self.core.teardown(&mut slot).await {
      debug!("player: stop without an active session");
    }
    Ok(())
  }

  /// Stop playback before the program exits.
  pub async fn shutdown(&self) {
    let _ = self.stop().await;
  }

  pub fn is_playing(&self) -> bool {
    self.core.status.lock().state.is_active()
  }

  pub fn state(&self) -> PlaybackState {
    self.core.status.lock().state
  }

  /// Snapshot of the last reported progress.
  pub fn current_info(&self) -> PlaybackProgress {
    self.core.status.lock().progress.clone()
  }

  pub fn current_candidate(&self) -> Option<MediaCandidate> {
    self.core.status.lock().candidate.clone()
  }

  pub fn process_id(&self) -> Option<u32> {
    self.core.status.lock().pid
  }

  pub fn ipc_path(&self) -> Option<PathBuf> {
    self.core.status.lock().ipc_path.clone()
  }

  /// Send one raw line to the player's IPC socket and return its reply.
  ///
  /// Failures are reported to the caller and logged; the session keeps playing.
  pub async fn command(&self, line: &str) -> Result<String, PlaybackError> {
    let Some(path) = self.ipc_path() else {
      return Err(PlaybackError::Control("no active session".to_string()));
    };
    control::send_command(&path, line, self.core.control_timeout).await.inspect_err(|e| {
      warn!(err = %e, "player: control command failed");
    })
  }

  pub async fn toggle_pause(&self) -> Result<(), PlaybackError> {
    let reply = self.command(control::TOGGLE_PAUSE).await?;
    control::check_reply(&reply)
  }
}
