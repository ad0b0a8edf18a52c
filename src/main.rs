//! Claude Session Watch - follow Claude Code session logs as they are written.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_session_watch::config::{ConfigError, ConfigLoader, WatcherConfig};
use claude_session_watch::display;
use claude_session_watch::events::{EventFilter, EventKind};
use claude_session_watch::watcher::{AsyncSessionWatcher, WatcherError, DEFAULT_QUEUE_SIZE};

#[derive(Parser)]
#[command(
    name = "claude-session-watch",
    about = "Realtime monitoring of Claude Code session logs",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print events from session logs as they are written.
    Watch(WatchArgs),
}

#[derive(Args)]
struct WatchArgs {
    /// Projects directory to watch (default: ~/.claude/projects).
    #[arg(long)]
    base_dir: Option<PathBuf>,
    /// Config file to load instead of the default search paths.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Only report records written after startup.
    #[arg(long)]
    skip_existing: bool,
    /// Persist read positions to this file and resume from it.
    #[arg(long)]
    state_file: Option<PathBuf>,
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
    /// Seconds without activity before a session is idle.
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,
    /// Seconds spent idle before a session ends.
    #[arg(long, value_name = "SECS")]
    end_timeout: Option<u64>,
    /// Only show sessions whose id starts with this prefix.
    #[arg(long, value_name = "PREFIX")]
    session: Option<String>,
    /// Only show these event types (repeatable), e.g. `tool_use`.
    #[arg(long = "type", value_name = "KIND")]
    types: Vec<EventKind>,
    /// Print one JSON object per event.
    #[arg(long)]
    json: bool,
    /// Print content without truncation.
    #[arg(long)]
    raw: bool,
    /// Maintain live sessions and print their counters on exit.
    #[arg(long)]
    live: bool,
    /// Disable OS file notifications and rely on polling alone.
    #[arg(long)]
    no_notify: bool,
    /// Stop after this many seconds.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

impl WatchArgs {
    fn load_config(&self) -> Result<WatcherConfig, ConfigError> {
        let loader = match &self.config {
            Some(path) => ConfigLoader::with_path(path.clone()),
            None => ConfigLoader::new(),
        };
        let mut config = loader.load()?;

        if let Some(base_dir) = &self.base_dir {
            config.base_dir.clone_from(base_dir);
        }
        if self.skip_existing {
            config.process_existing = false;
        }
        if let Some(state_file) = &self.state_file {
            config.state_file = Some(state_file.clone());
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if let Some(secs) = self.end_timeout {
            config.end_timeout_secs = secs;
        }
        if self.live {
            config.live.enabled = true;
        }
        if self.no_notify {
            config.use_notify = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn filter(&self) -> EventFilter {
        let mut filter = EventFilter::all();
        if let Some(prefix) = &self.session {
            filter = filter.and(EventFilter::session_prefix(prefix.clone()));
        }
        if !self.types.is_empty() {
            filter = filter.and(EventFilter::kinds(self.types.iter().copied()));
        }
        filter
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn watch(args: WatchArgs) -> Result<(), CliError> {
    let config = args.load_config()?;
    let filter = args.filter();
    tracing::info!(
        base_dir = %config.base_dir.display(),
        process_existing = config.process_existing,
        live = config.live.enabled,
        "Starting session watcher"
    );

    let mut watcher = AsyncSessionWatcher::start(config, DEFAULT_QUEUE_SIZE)?;

    let deadline = args.duration.map(Duration::from_secs);
    let timeout = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(timeout);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, stopping watcher");
                break;
            }
            () = &mut timeout => {
                tracing::info!("Watch duration elapsed");
                break;
            }
            event = watcher.next_event() => {
                let Some(event) = event else { break };
                if !filter.matches(&event) {
                    continue;
                }
                if args.json {
                    display::print_event_json(&event);
                } else {
                    display::print_event(&event, args.raw);
                }
            }
        }
    }

    if !watcher.stop().await {
        tracing::warn!("Watcher thread did not stop in time");
    }
    let dropped = watcher.dropped_events();
    if dropped > 0 {
        tracing::warn!(dropped, "Events were dropped because output fell behind");
    }

    if let Some(live) = watcher.watcher().live_sessions() {
        for session in live.active_sessions().iter().chain(live.ended_sessions().iter()) {
            let summary = session.summary();
            if args.json {
                match serde_json::to_string(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize summary"),
                }
            } else {
                display::print_summary(&summary);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Watch(args) => watch(args).await,
    };
    if let Err(e) = result {
        display::print_error(&e.to_string());
        std::process::exit(1);
    }
}
