//! Search and play streamed audio through `yt-dlp` and `mpv`.
//!
//! - [`Resolver`] searches and resolves stream addresses.
//! - [`Supervisor`] owns the single playback session and its event queue.
//! - [`Events`] is what a display layer drains, one event per receive.

mod bridge;
pub mod config;
pub mod constants;
pub mod control;
pub mod error;
pub mod events;
pub mod logging;
pub mod player;
pub mod progress;
pub mod resolver;

pub use config::Config;
pub use error::PlaybackError;
pub use events::{Events, PlaybackEvent, PlaybackState};
pub use player::{PlayerBackend, Supervisor};
pub use progress::{PlaybackProgress, ProgressFormat, ProgressParser};
pub use resolver::{MediaCandidate, Resolver, StreamResolver};
