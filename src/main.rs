use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use ytplay::{Config, MediaCandidate, PlaybackEvent, PlaybackState, Resolver, Supervisor, logging};

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// List search results without playing anything
  Search {
    query: Vec<String>,
    /// Maximum number of results (default from prefs.toml, else 10)
    #[arg(short = 'n', long)]
    max: Option<usize>,
  },
  /// Search and play one result. While playing: p = pause, n = next result, s = stop, q = quit
  Play {
    query: Vec<String>,
    #[arg(short = 'n', long)]
    max: Option<usize>,
    /// 1-based position of the result to play
    #[arg(short, long, default_value_t = 1)]
    index: usize,
  },
  /// Show the effective preferences and where they are read from
  Config {
    /// Write the effective preferences back to prefs.toml
    #[arg(long)]
    write: bool,
  },
  /// Print shell completions
  Completions { shell: clap_complete::Shell },
}

// --- Helpers ---

fn format_candidate(position: usize, c: &MediaCandidate) -> String {
  if c.uploader.is_empty() {
    format!("{:>2}. {} ({}) [{}]", position, c.title, c.duration_label(), c.id)
  } else {
    format!("{:>2}. {} - {} ({}) [{}]", position, c.title, c.uploader, c.duration_label(), c.id)
  }
}

/// Print one event. Returns true when the session has ended.
fn render(event: &PlaybackEvent) -> bool {
  match event {
    PlaybackEvent::Started { title, .. } => {
      println!("▶ {title}");
      false
    }
    PlaybackEvent::Progress(p) => {
      print!("\r  {} / {} ({:>3}%)", p.elapsed, p.total, p.percent);
      let _ = std::io::stdout().flush();
      false
    }
    PlaybackEvent::StateChanged(PlaybackState::Stopped) => {
      println!("\n■ finished");
      true
    }
    PlaybackEvent::StateChanged(PlaybackState::Idle) => true,
    PlaybackEvent::StateChanged(state) => {
      debug!(state = state.label(), "state changed");
      false
    }
    PlaybackEvent::OutputLine(line) => {
      debug!(line = %line, "player output");
      false
    }
    PlaybackEvent::Error(e) => {
      eprintln!("\n✗ {e}");
      false
    }
    PlaybackEvent::Stopped => {
      println!("\n■ stopped");
      true
    }
  }
}

fn spawn_play(supervisor: &Supervisor, candidate: MediaCandidate) {
  let supervisor = supervisor.clone();
  tokio::spawn(async move {
    // Failures are also delivered as events, which is what gets rendered.
    if let Err(e) = supervisor.play(&candidate).await {
      debug!(err = %e, "play failed");
    }
  });
}

// --- Commands ---

async fn search(config: &Config, query: &str, max: usize) -> Result<()> {
  let resolver = Resolver::from_config(config);
  let candidates = resolver.search(query, max).await.context("Search failed")?;
  for (i, c) in candidates.iter().enumerate() {
    println!("{}", format_candidate(i + 1, c));
  }
  Ok(())
}

async fn play(config: &Config, query: &str, max: usize, index: usize) -> Result<()> {
  let resolver = Resolver::from_config(config);
  let candidates = resolver.search(query, max).await.context("Search failed")?;
  let mut selected = index.saturating_sub(1).min(candidates.len() - 1);

  let supervisor = Supervisor::from_config(config);
  let events = supervisor.events();
  println!("{}", format_candidate(selected + 1, &candidates[selected]));
  spawn_play(&supervisor, candidates[selected].clone());

  let mut input = BufReader::new(tokio::io::stdin()).lines();
  let mut stdin_open = true;
  // A Stopped caused by switching tracks is not the end of the run.
  let mut switching = false;

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      line = input.next_line(), if stdin_open => match line {
        Ok(Some(line)) => match line.trim() {
          "q" => break,
          "s" => supervisor.stop().await?,
          "p" => {
            if let Err(e) = supervisor.toggle_pause().await {
              eprintln!("\n✗ {e}");
            }
          }
          "n" if selected + 1 < candidates.len() => {
            selected += 1;
            switching = supervisor.is_playing();
            println!("\n{}", format_candidate(selected + 1, &candidates[selected]));
            spawn_play(&supervisor, candidates[selected].clone());
          }
          _ => {}
        },
        _ => stdin_open = false,
      },
      event = events.recv() => {
        let Some(event) = event else { break };
        if render(&event) {
          if switching && event == PlaybackEvent::Stopped {
            switching = false;
            continue;
          }
          break;
        }
      }
    }
  }

  supervisor.shutdown().await;
  Ok(())
}

fn show_config(config: &Config, write: bool) -> Result<()> {
  match Config::path() {
    Some(path) => println!("# {}", path.display()),
    None => println!("# no config directory on this platform"),
  }
  print!("{}", toml::to_string(config).context("Failed to serialize preferences")?);
  if write {
    config.save();
  }
  Ok(())
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  let config = Config::load();
  let _guard = logging::init(config.log_level.as_deref())?;
  info!(command = ?args.command, "ytplay starting");

  match args.command {
    Cmd::Search { query, max } => search(&config, &query.join(" "), max.unwrap_or(config.max_results())).await,
    Cmd::Play { query, max, index } => play(&config, &query.join(" "), max.unwrap_or(config.max_results()), index).await,
    Cmd::Config { write } => show_config(&config, write),
    Cmd::Completions { shell } => {
      clap_complete::generate(shell, &mut Args::command(), "ytplay", &mut std::io::stdout());
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn candidate(uploader: &str) -> MediaCandidate {
    MediaCandidate { id: "abc".into(), title: "Song".into(), duration_seconds: 200.0, uploader: uploader.into() }
  }

  #[test]
  fn candidate_line_with_uploader() {
    assert_eq!(format_candidate(1, &candidate("Band")), " 1. Song - Band (3:20) [abc]");
  }

  #[test]
  fn candidate_line_without_uploader() {
    assert_eq!(format_candidate(12, &candidate("")), "12. Song (3:20) [abc]");
  }

  #[test]
  fn terminal_events_end_the_run() {
    assert!(render(&PlaybackEvent::Stopped));
    assert!(render(&PlaybackEvent::StateChanged(PlaybackState::Stopped)));
    assert!(render(&PlaybackEvent::StateChanged(PlaybackState::Idle)));
    assert!(!render(&PlaybackEvent::StateChanged(PlaybackState::Playing)));
    assert!(!render(&PlaybackEvent::OutputLine("x".into())));
  }

  #[test]
  fn cli_parses_play() {
    let args = Args::try_parse_from(["ytplay", "play", "lofi", "beats", "-n", "5", "-i", "2"]).unwrap();
    match args.command {
      Cmd::Play { query, max, index } => {
        assert_eq!(query.join(" "), "lofi beats");
        assert_eq!(max, Some(5));
        assert_eq!(index, 2);
      }
      other => panic!("unexpected command {other:?}"),
    }
  }

  #[test]
  fn cli_definition_is_valid() {
    Args::command().debug_assert();
  }
}
