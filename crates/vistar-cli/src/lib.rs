//! Vistador CLI Library
//!
//! Command-line front end for the Vistar visual regression engine: runs
//! YAML plans of rendered checkpoint images against stored baselines,
//! accepts new baselines and renders batch reports.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::format_push_string)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod logging;
mod output;
pub mod plan;

pub use commands::{
    AcceptArgs, BaselinesArgs, BaselinesCommand, Cli, ColorArg, CompareArgs, Commands,
    MatchLevelArg, ReportArgs, ReportFormatArg, RunArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use logging::init_tracing;
pub use output::ProgressReporter;
pub use plan::{Plan, PlanCheckpoint, PlanTest};
