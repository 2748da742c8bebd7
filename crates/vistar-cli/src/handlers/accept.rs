//! Accept command handler

use crate::commands::AcceptArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use crate::plan::Plan;
use tracing::info;
use vistar::{open_store, Acceptance, BaselineKey, CaptureAdapter, FileTarget};

/// Execute the accept command
///
/// Every checkpoint image of the selected tests goes through the same capture
/// checks as `run` and is stored under the key `run` would look it up by.
/// Returns the number of baselines written.
pub async fn execute_accept(config: &CliConfig, args: &AcceptArgs) -> CliResult<usize> {
    let plan = Plan::load(&args.plan)?;
    let mut harness = plan.apply_to(config.harness_config()?)?;
    if let Some(dir) = &args.baseline_dir {
        harness.baseline_dir.clone_from(dir);
    }
    let accepted_by = args.by.clone().unwrap_or_else(|| harness.accepted_by.clone());

    let selected = plan.selected(&args.only);
    if selected.is_empty() {
        return Err(CliError::invalid_argument(format!(
            "no plan test matches {:?}",
            args.only
        )));
    }

    let store = open_store(harness.baseline_backend, &harness.baseline_dir);
    let adapter = CaptureAdapter::new(harness.capture_mode);
    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    let mut accepted = 0;

    for test in selected {
        let viewport = Plan::test_viewport(test, &harness)?;
        for checkpoint in &test.checkpoints {
            let target = FileTarget::new(plan.image_path(checkpoint), viewport);
            let image = adapter.capture(&target, checkpoint.region).await?;

            let key = BaselineKey::new(&harness.app_name, &test.name, &checkpoint.name, viewport)
                .with_environment(harness.environment.clone());
            store
                .put(&key, &image, Acceptance::now(accepted_by.clone()))
                .await?;
            info!(key = %key, by = %accepted_by, "baseline accepted");
            reporter.success(&format!("accepted {key}"));
            accepted += 1;
        }
    }

    reporter.info(&format!("{accepted} baseline(s) accepted by {accepted_by}"));
    Ok(accepted)
}
