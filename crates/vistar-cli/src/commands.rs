//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Vistador: visual regression runs, baseline review and reports
#[derive(Parser, Debug)]
#[command(name = "vistador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Harness configuration file (YAML)
    #[arg(long, env = "VISTAR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a plan of checkpoints against the baselines and report
    Run(RunArgs),

    /// Compare two images under a match level
    Compare(CompareArgs),

    /// Accept a plan's current captures as the new baselines
    Accept(AcceptArgs),

    /// Inspect or prune stored baselines
    Baselines(BaselinesArgs),

    /// Re-render a saved JSON report
    Report(ReportArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Plan file listing tests and their checkpoint images
    pub plan: PathBuf,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: ReportFormatArg,

    /// Save NEW checkpoints as baselines when their session closes
    #[arg(long)]
    pub save_new: bool,

    /// Baseline directory (overrides configuration)
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,

    /// Write diff images for mismatches into this directory
    #[arg(long)]
    pub diff_dir: Option<PathBuf>,

    /// Give up waiting for open sessions after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Number of tests run concurrently
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Candidate image (PNG)
    pub candidate: PathBuf,

    /// Baseline image (PNG); a missing file compares as NEW
    pub baseline: PathBuf,

    /// Match level
    #[arg(short, long, value_enum, default_value = "strict")]
    pub match_level: MatchLevelArg,

    /// Write a diff image here on mismatch
    #[arg(long)]
    pub diff_output: Option<PathBuf>,

    /// Print the comparison as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the accept command
#[derive(Parser, Debug)]
pub struct AcceptArgs {
    /// Plan file whose images become baselines
    pub plan: PathBuf,

    /// Reviewer recorded with each baseline
    #[arg(long)]
    pub by: Option<String>,

    /// Only accept tests with this name (repeatable)
    #[arg(long)]
    pub only: Vec<String>,

    /// Baseline directory (overrides configuration)
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,
}

/// Arguments for the baselines command
#[derive(Parser, Debug)]
pub struct BaselinesArgs {
    /// Baselines subcommand
    #[command(subcommand)]
    pub command: BaselinesCommand,
}

/// Baselines subcommands
#[derive(Subcommand, Debug)]
pub enum BaselinesCommand {
    /// List stored baselines
    List {
        /// Baseline directory (overrides configuration)
        #[arg(long)]
        baseline_dir: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete one stored baseline
    Delete {
        /// Application name
        #[arg(long)]
        app: String,

        /// Test name
        #[arg(long)]
        test: String,

        /// Checkpoint name
        #[arg(long)]
        checkpoint: String,

        /// Viewport as WIDTHxHEIGHT
        #[arg(long, default_value = "1400x900")]
        viewport: String,

        /// Environment label
        #[arg(long)]
        environment: Option<String>,

        /// Baseline directory (overrides configuration)
        #[arg(long)]
        baseline_dir: Option<PathBuf>,
    },
}

/// Arguments for the report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// JSON report written by `run --format json`
    pub input: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "html")]
    pub format: ReportFormatArg,

    /// Write here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Match level argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchLevelArg {
    /// Any channel difference
    Exact,
    /// Perceptual colour tolerance
    #[default]
    Strict,
    /// Block structure only
    Layout,
    /// Block structure and ink presence
    Content,
}

impl From<MatchLevelArg> for vistar::MatchLevel {
    fn from(arg: MatchLevelArg) -> Self {
        match arg {
            MatchLevelArg::Exact => Self::Exact,
            MatchLevelArg::Strict => Self::Strict,
            MatchLevelArg::Layout => Self::Layout,
            MatchLevelArg::Content => Self::Content,
        }
    }
}

/// Report format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormatArg {
    /// Plain text
    #[default]
    Text,
    /// JSON
    Json,
    /// JUnit XML
    Junit,
    /// HTML page
    Html,
}

impl From<ReportFormatArg> for vistar::ReportFormat {
    fn from(arg: ReportFormatArg) -> Self {
        match arg {
            ReportFormatArg::Text => Self::Text,
            ReportFormatArg::Json => Self::Json,
            ReportFormatArg::Junit => Self::Junit,
            ReportFormatArg::Html => Self::Html,
        }
    }
}

/// Color argument
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
