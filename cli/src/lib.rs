//! `livesync` command-line front end.
//!
//! ## Commands
//!
//! - `livesync watch --panel workflow` - load a panel and follow the live stream
//! - `livesync snapshot --panel crm` - one-shot REST load printed as JSON
//! - `livesync parse` - classify SSE data lines read from stdin

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use livesync_core::ConfigLoader;
use livesync_core::LiveSyncConfig;
use tracing_subscriber::EnvFilter;

pub mod parse_cmd;
pub mod snapshot_cmd;
pub mod watch_cmd;

use parse_cmd::ParseArgs;
use snapshot_cmd::SnapshotArgs;
use watch_cmd::WatchArgs;

/// Follow a live-sync backend from the terminal.
#[derive(Debug, Parser)]
#[command(name = "livesync", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a panel, connect to the event stream and print every change.
    Watch(WatchArgs),
    /// Fetch a panel's REST snapshot once and print it as JSON.
    Snapshot(SnapshotArgs),
    /// Classify SSE data lines read from stdin.
    Parse(ParseArgs),
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Config directory (defaults to $LIVESYNC_HOME, then ~/.livesync).
    #[arg(long = "home", global = true)]
    pub home: Option<PathBuf>,

    /// Backend base URL, overriding config.toml and LIVESYNC_BASE_URL.
    #[arg(long = "base-url", global = true)]
    pub base_url: Option<String>,

    /// Log filter (e.g. `debug`, `livesync_core=trace`). Overrides RUST_LOG.
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,
}

impl GlobalArgs {
    /// Resolve the layered configuration. `--base-url` is applied as the
    /// highest-precedence environment override so it is validated with the
    /// rest.
    pub fn load_config(&self) -> anyhow::Result<LiveSyncConfig> {
        let mut vars: Vec<(String, String)> = Vec::new();
        if let Some(base_url) = &self.base_url {
            vars.push(("LIVESYNC_BASE_URL".to_string(), base_url.clone()));
        }
        vars.extend(std::env::vars());

        let mut loader = ConfigLoader::new().with_env_vars(vars);
        if let Some(home) = &self.home {
            loader = loader.with_home(home.clone());
        }
        Ok(loader.load()?)
    }
}

/// Which panel reducer to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PanelKind {
    Workflow,
    Studio,
    Crm,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Watch(args) => {
                let config = self.global.load_config()?;
                watch_cmd::run_watch(&config, args).await
            }
            Command::Snapshot(args) => {
                let config = self.global.load_config()?;
                snapshot_cmd::run_snapshot(&config, args).await
            }
            Command::Parse(args) => parse_cmd::run_parse(args).await,
        }
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// machine-readable.
pub fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
