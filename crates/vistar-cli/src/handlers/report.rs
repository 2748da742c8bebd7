//! Report command handler

use super::write_output;
use crate::commands::ReportArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use vistar::{render, BatchReport, ReportFormat};

/// Execute the report command: re-render a saved JSON report
pub fn execute_report(_config: &CliConfig, args: &ReportArgs) -> CliResult<BatchReport> {
    let json = std::fs::read_to_string(&args.input).map_err(|e| {
        CliError::report_generation(format!("cannot read {}: {e}", args.input.display()))
    })?;
    let report = BatchReport::from_json(&json)
        .map_err(|e| CliError::report_generation(e.to_string()))?;
    let rendered = render(&report, ReportFormat::from(args.format))?;
    write_output(args.output.as_deref(), &rendered)?;
    Ok(report)
}
