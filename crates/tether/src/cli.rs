use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tether_connector::{ConcurrencyMode, ProcessingMode};

#[derive(Clone, Debug, Parser)]
#[command(name = "tether", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    #[command(subcommand)]
    pub cmd: Commands,

    /// Log more; repeat for trace output. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "f", name = "fetch", about = "Fetch URLs through the connector")]
    Fetch(FetchArg),
}

#[derive(Clone, Debug, Args)]
pub struct FetchArg {
    /// URLs to fetch; `~/path` resolves against `--base`.
    #[arg(required = true, num_args = 1..)]
    pub urls: Vec<String>,

    #[arg(long, value_name = "URL")]
    pub base: Option<String>,

    #[arg(short, long, value_enum)]
    pub concurrency: Option<ConcurrencyArg>,

    #[arg(short, long, value_enum)]
    pub processing: Option<ProcessingArg>,

    /// In-flight limit for the queued concurrency modes.
    #[arg(short, long, value_name = "N")]
    pub max: Option<usize>,

    /// Per-request timeout in seconds; 0 disables it.
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<f64>,

    #[arg(long)]
    pub reset_on_progress: bool,

    #[arg(long)]
    pub cache_bust: bool,

    /// Share one fetch between identical URLs.
    #[arg(long)]
    pub dedupe: bool,

    /// Milliseconds between connector ticks.
    #[arg(long, value_name = "MS")]
    pub tick: Option<u64>,

    /// TOML file with connector settings; flags override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConcurrencyArg {
    Multiple,
    SingleFirst,
    SingleLast,
    Fifo,
    Filo,
}

impl From<ConcurrencyArg> for ConcurrencyMode {
    fn from(arg: ConcurrencyArg) -> Self {
        match arg {
            ConcurrencyArg::Multiple => ConcurrencyMode::Multiple,
            ConcurrencyArg::SingleFirst => ConcurrencyMode::SingleFirst,
            ConcurrencyArg::SingleLast => ConcurrencyMode::SingleLast,
            ConcurrencyArg::Fifo => ConcurrencyMode::FifoQueued,
            ConcurrencyArg::Filo => ConcurrencyMode::FiloQueued,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProcessingArg {
    Async,
    Sync,
    SyncAll,
}

impl From<ProcessingArg> for ProcessingMode {
    fn from(arg: ProcessingArg) -> Self {
        match arg {
            ProcessingArg::Async => ProcessingMode::Async,
            ProcessingArg::Sync => ProcessingMode::Sync,
            ProcessingArg::SyncAll => ProcessingMode::SyncAll,
        }
    }
}
