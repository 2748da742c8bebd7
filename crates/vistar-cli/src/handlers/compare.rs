//! Compare command handler

use crate::commands::CompareArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use std::path::Path;
use vistar::{DiffEngine, DiffResult, Image, MatchLevel};

fn read_png(path: &Path) -> CliResult<Image> {
    let bytes = std::fs::read(path)
        .map_err(|e| CliError::invalid_argument(format!("cannot read {}: {e}", path.display())))?;
    Ok(Image::from_png(&bytes)?)
}

/// Comparison as a JSON document
#[must_use]
pub fn comparison_json(result: &DiffResult, level: MatchLevel) -> serde_json::Value {
    serde_json::json!({
        "matchLevel": level,
        "outcome": result.outcome,
        "reason": result.reason,
        "detail": result.detail,
        "regions": result.regions,
        "diffPixelCount": result.diff_pixel_count,
        "totalPixels": result.total_pixels,
        "diffRatio": result.diff_ratio(),
    })
}

/// Execute the compare command
///
/// A baseline path that does not exist compares as NEW.
pub fn execute_compare(config: &CliConfig, args: &CompareArgs) -> CliResult<DiffResult> {
    let diff_config = config
        .harness_config()?
        .diff
        .with_diff_image(args.diff_output.is_some());
    let engine = DiffEngine::new(diff_config);
    let level = MatchLevel::from(args.match_level);

    let candidate = read_png(&args.candidate)?;
    let baseline = if args.baseline.exists() {
        Some(read_png(&args.baseline)?)
    } else {
        None
    };

    let result = engine.compare(&candidate, baseline.as_ref(), level)?;

    if let (Some(path), Some(png)) = (&args.diff_output, &result.diff_image) {
        super::write_bytes(path, png)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&comparison_json(&result, level))?);
    } else {
        ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet())
            .comparison(&result);
    }
    Ok(result)
}
