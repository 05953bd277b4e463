use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Operate the sync queue and day close of a point-of-sale terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Terminal configuration file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show queue, conflict and day-close status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect the mutation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Drain the mutation queue
    Sync {
        /// Drain deadline in seconds (configured drain timeout when omitted)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Keep draining in the background and stream queue events until Ctrl-C
        #[arg(long, conflicts_with = "timeout")]
        watch: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and resolve version conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Compare local and central totals for a business date
    Integrity {
        /// Business date (YYYY-MM-DD)
        date: NaiveDate,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Close a business date
    Close {
        #[command(subcommand)]
        command: CloseCommands,
    },
    /// Show the effective terminal configuration
    Config,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued mutations with their error detail
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Make failed entries eligible again right away
    Retry,
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List recorded conflicts, open ones by default
    List {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle an open conflict
    Resolve {
        /// Conflict ID
        id: i64,
        /// How to settle it
        #[arg(value_enum)]
        strategy: StrategyArg,
        /// Merged entity JSON (manual-merge only)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
        /// Operator recorded as resolver
        #[arg(long, value_name = "NAME", default_value = "operator")]
        by: String,
    },
}

#[derive(Subcommand)]
pub enum CloseCommands {
    /// Report what still keeps a business date open
    Check {
        /// Business date (YYYY-MM-DD)
        date: NaiveDate,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the full day close
    Run {
        /// Business date (YYYY-MM-DD)
        date: NaiveDate,
        /// Skip the integrity check for this run
        #[arg(long)]
        skip_integrity: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Finish closes interrupted after they were committed
    Resume,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    LocalWins,
    RemoteWins,
    ManualMerge,
    ForceUpdate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
