use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{PipelineConfig, DEFAULT_BASE_URL, DEFAULT_RATING};
use crate::month::SnapshotMonth;

pub const DEFAULT_DB: &str = "smogon_usage.db";

/// First month `sync --auto` considers when `--start` is not given
pub const DEFAULT_AUTO_START: &str = "2025-01";

#[derive(Parser, Debug)]
#[command(name = "smogon-usage-to-sqlite")]
#[command(version, about = "Ingest monthly Smogon usage statistics into SQLite")]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which months to work on
#[derive(Args, Debug, Clone, Default)]
pub struct MonthSelection {
    /// A single month (YYYY-MM)
    #[arg(short, long, conflicts_with_all = ["from", "to"])]
    pub month: Option<SnapshotMonth>,

    /// First month of an inclusive range
    #[arg(long, requires = "to")]
    pub from: Option<SnapshotMonth>,

    /// Last month of an inclusive range
    #[arg(long, requires = "from")]
    pub to: Option<SnapshotMonth>,
}

impl MonthSelection {
    /// Explicitly requested months, or `None` when nothing was given
    pub fn months(&self) -> Option<Vec<SnapshotMonth>> {
        match (self.month, self.from, self.to) {
            (Some(month), _, _) => Some(vec![month]),
            (None, Some(from), Some(to)) => Some(SnapshotMonth::range(from, to)),
            _ => None,
        }
    }
}

/// Upstream settings shared by the network commands
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Format hint, e.g. `regi` or `gen9vgc2025regibo3`
    #[arg(long, env = "SMOGON_FORMAT")]
    pub format: Option<String>,

    /// Rating cutoff of the published listings
    #[arg(long, env = "SMOGON_RATING", default_value_t = DEFAULT_RATING)]
    pub rating: u32,

    /// Statistics root URL
    #[arg(long, env = "SMOGON_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Request timeout in seconds
    #[arg(long, env = "SMOGON_TIMEOUT", default_value_t = 60)]
    pub timeout: u64,

    /// Retries for transient failures
    #[arg(long, env = "SMOGON_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,
}

impl SourceArgs {
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            rating: self.rating,
            request_timeout: Duration::from_secs(self.timeout),
            max_retries: self.max_retries,
            ..PipelineConfig::default()
        }
        .with_base_url(self.base_url.clone())
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, parse and store usage snapshots
    Sync {
        /// SQLite database path
        #[arg(env = "SMOGON_DB", default_value = DEFAULT_DB)]
        db: PathBuf,

        #[command(flatten)]
        months: MonthSelection,

        /// Every month from --start to --end missing from the database
        #[arg(long, conflicts_with_all = ["month", "from", "to"])]
        auto: bool,

        /// First month considered by --auto (default: 2025-01)
        #[arg(long, requires = "auto")]
        start: Option<SnapshotMonth>,

        /// Last month considered by --auto (default: last full month)
        #[arg(long, requires = "auto")]
        end: Option<SnapshotMonth>,

        /// With --auto, re-ingest months already present
        #[arg(short, long)]
        force: bool,

        /// Months to walk back when looking for the latest snapshot
        #[arg(long, default_value_t = 3)]
        lookback: u32,

        #[command(flatten)]
        source: SourceArgs,

        /// Also refresh a read-only copy of the database
        #[arg(long, env = "SMOGON_READ_COPY")]
        read_copy: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download raw snapshots into the cache directory
    Download {
        #[command(flatten)]
        months: MonthSelection,

        #[command(flatten)]
        source: SourceArgs,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Force re-download even if cached
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest local snapshot files
    Convert {
        /// Detailed (chaos) JSON listing
        detail: PathBuf,

        /// SQLite database path
        #[arg(env = "SMOGON_DB")]
        db: PathBuf,

        /// Month the files belong to
        #[arg(short, long)]
        month: SnapshotMonth,

        /// Format tag to store the rows under
        #[arg(long)]
        format: String,

        /// Plain-text ranking listing
        #[arg(short, long)]
        ranking: Option<PathBuf>,
    },

    /// List months and formats present in the database
    ListMonths {
        /// SQLite database path
        #[arg(env = "SMOGON_DB", default_value = DEFAULT_DB)]
        db: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
