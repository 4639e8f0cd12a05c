use futures::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use crate::error::PlaybackError;
use crate::progress::PlaybackProgress;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
  #[default]
  Idle,
  Loading,
  Playing,
  Stopped,
}

impl PlaybackState {
  pub fn label(self) -> &'static str {
    match self {
      PlaybackState::Idle => "idle",
      PlaybackState::Loading => "loading",
      PlaybackState::Playing => "playing",
      PlaybackState::Stopped => "stopped",
    }
  }

  /// Whether a session is bound in this state.
  pub fn is_active(self) -> bool {
    matches!(self, PlaybackState::Loading | PlaybackState::Playing)
  }
}

/// Everything the supervisor tells the display layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
  Started { id: String, title: String },
  Progress(PlaybackProgress),
  StateChanged(PlaybackState),
  /// Player output that isn't a status line, passed through for diagnostics.
  OutputLine(String),
  Error(PlaybackError),
  Stopped,
}

impl PlaybackEvent {
  /// Lifecycle events are never dropped when the queue is full.
  pub fn is_droppable(&self) -> bool {
    matches!(self, PlaybackEvent::Progress(_) | PlaybackEvent::OutputLine(_))
  }
}

/// Number of droppable events currently queued, shared by both ends of the queue.
struct Backlog {
  queued: AtomicUsize,
  capacity: usize,
}

/// A queued event and whether it counts against the backlog.
type Entry = (PlaybackEvent, bool);

/// Producer side of the event queue.
///
/// The queue itself never refuses a send; `capacity` bounds only the droppable events, so a
/// consumer that stops draining can lose progress but never stalls a lifecycle transition.
pub(crate) struct EventSink {
  tx: mpsc::UnboundedSender<Entry>,
  backlog: Arc<Backlog>,
}

impl EventSink {
  /// Best-effort send: once `capacity` droppable events are waiting, new ones are dropped.
  pub(crate) fn offer(&self, event: PlaybackEvent) {
    if self.backlog.queued.fetch_add(1, Ordering::AcqRel) >= self.backlog.capacity {
      self.backlog.queued.fetch_sub(1, Ordering::AcqRel);
      tracing::trace!(?event, "events: queue full, dropping");
      return;
    }
    if self.tx.send((event, true)).is_err() {
      self.backlog.queued.fetch_sub(1, Ordering::AcqRel);
    }
  }

  /// Guaranteed send for lifecycle events and the final completion update. Never waits on
  /// the consumer.
  pub(crate) fn deliver(&self, event: PlaybackEvent) {
    if self.tx.send((event, false)).is_err() {
      tracing::debug!("events: receiver dropped");
    }
  }
}

/// Receive-only handle on the supervisor's event queue.
///
/// Clones share one queue: each event is delivered to exactly one receiver.
#[derive(Clone)]
pub struct Events {
  rx: Arc<Mutex<mpsc::UnboundedReceiver<Entry>>>,
  backlog: Arc<Backlog>,
}

impl Events {
  /// Wait for the next event. `None` once the supervisor is gone and the queue is drained.
  pub async fn recv(&self) -> Option<PlaybackEvent> {
    let entry = self.rx.lock().await.recv().await?;
    Some(self.settle(entry))
  }

  /// Wait up to `timeout` for the next event; meant for a UI loop that redraws on every tick.
  pub async fn recv_timeout(&self, timeout: Duration) -> Option<PlaybackEvent> {
    tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
  }

  /// Take an already-queued event without waiting.
  pub fn try_recv(&self) -> Option<PlaybackEvent> {
    let mut rx = self.rx.try_lock().ok()?;
    let entry = rx.try_recv().ok()?;
    Some(self.settle(entry))
  }

  pub fn into_stream(self) -> impl Stream<Item = PlaybackEvent> {
    futures::stream::unfold(self, |events| async move {
      let event = events.recv().await?;
      Some((event, events))
    })
  }

  fn settle(&self, (event, counted): Entry) -> PlaybackEvent {
    if counted {
      self.backlog.queued.fetch_sub(1, Ordering::AcqRel);
    }
    event
  }
}

pub(crate) fn channel(capacity: usize) -> (EventSink, Events) {
  let (tx, rx) = mpsc::unbounded_channel();
  let backlog = Arc::new(Backlog { queued: AtomicUsize::new(0), capacity: capacity.max(1) });
  (EventSink { tx, backlog: Arc::clone(&backlog) }, Events { rx: Arc::new(Mutex::new(rx)), backlog })
}
