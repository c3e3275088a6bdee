//! CLI argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cct::SortBy;
use crate::domain::{TimerDomain, View};

#[derive(Parser)]
#[command(
    name = "callscope",
    version,
    about = "Build and inspect calling-context trees from recorded profiler sessions",
    after_help = "\
EXAMPLES:
    callscope replay session.jsonl                         Flat profile, all threads
    callscope replay session.jsonl --tree --depth 4        Call tree, four levels deep
    callscope replay session.jsonl --view class --top 20   Top 20 classes by self time
    callscope replay session.jsonl --export tree.json      Write the call tree as JSON
    callscope diff before.jsonl after.jsonl                Flat profile delta
    callscope reverse session.jsonl --method 'app.Db.query(I)V'"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a recording and print its profile
    Replay(ReplayArgs),
    /// Compare two recordings of the same program
    Diff(DiffArgs),
    /// Show every calling context of one method
    Reverse(ReverseArgs),
}

#[derive(clap::Args)]
pub struct ReplayArgs {
    /// Recording file (JSON Lines)
    #[arg(value_name = "FILE")]
    pub recording: PathBuf,

    #[command(flatten)]
    pub display: DisplayArgs,

    /// Sort flat profile rows by
    #[arg(long, value_enum, default_value_t = SortArg::SelfTime)]
    pub sort: SortArg,

    /// Only show methods whose name contains this text
    #[arg(long, value_name = "TEXT")]
    pub filter: Option<String>,

    /// Print replay counters and per-thread active times
    #[arg(long)]
    pub stats: bool,
}

#[derive(clap::Args)]
pub struct DiffArgs {
    /// Baseline recording
    #[arg(value_name = "BEFORE")]
    pub first: PathBuf,

    /// Recording compared against the baseline
    #[arg(value_name = "AFTER")]
    pub second: PathBuf,

    #[command(flatten)]
    pub display: DisplayArgs,
}

#[derive(clap::Args)]
pub struct ReverseArgs {
    /// Recording file (JSON Lines)
    #[arg(value_name = "FILE")]
    pub recording: PathBuf,

    /// Method to look up, by display name or numeric id
    #[arg(short, long)]
    pub method: String,

    /// Aggregation level
    #[arg(long, value_enum, default_value_t = ViewArg::Method)]
    pub view: ViewArg,

    /// Restrict to one thread, by name
    #[arg(long, value_name = "NAME")]
    pub thread: Option<String>,

    /// Maximum tree depth to print
    #[arg(long)]
    pub depth: Option<usize>,

    /// Export the caller tree as JSON
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,
}

/// Options shared by `replay` and `diff`
#[derive(clap::Args)]
pub struct DisplayArgs {
    /// Aggregation level
    #[arg(long, value_enum, default_value_t = ViewArg::Method)]
    pub view: ViewArg,

    /// Restrict to one thread, by name
    #[arg(long, value_name = "NAME")]
    pub thread: Option<String>,

    /// Print the call tree instead of the flat profile
    #[arg(long)]
    pub tree: bool,

    /// Maximum tree depth to print
    #[arg(long, requires = "tree")]
    pub depth: Option<usize>,

    /// Show only the first N rows (0 = all)
    #[arg(long, default_value = "0")]
    pub top: usize,

    /// Export the result to a file instead of printing it
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Export as CSV (flat profiles only)
    #[arg(long, requires = "export", conflicts_with = "tree")]
    pub csv: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ViewArg {
    Method,
    Class,
    Package,
}

impl From<ViewArg> for View {
    fn from(arg: ViewArg) -> Self {
        match arg {
            ViewArg::Method => View::Method,
            ViewArg::Class => View::Class,
            ViewArg::Package => View::Package,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Name,
    SelfTime,
    TotalTime,
    Calls,
}

impl SortArg {
    /// Ordering and direction: names ascend, everything else descends
    #[must_use]
    pub fn ordering(self) -> (SortBy, bool) {
        match self {
            SortArg::Name => (SortBy::Name, false),
            SortArg::SelfTime => (SortBy::SelfTime(TimerDomain::Absolute), true),
            SortArg::TotalTime => (SortBy::TotalTime(TimerDomain::Absolute), true),
            SortArg::Calls => (SortBy::Invocations, true),
        }
    }
}
