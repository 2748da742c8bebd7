//! Run command handler

use super::write_output;
use crate::commands::RunArgs;
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::ProgressReporter;
use crate::plan::Plan;
use indicatif::ProgressBar;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vistar::{
    render, Batch, BatchInfo, BatchReport, FileTarget, HarnessConfig, MatchLevel, Region,
    ReportFormat, SessionTracker, SuiteRunner, TestJob, VistarError,
};

/// A checkpoint resolved to an image on disk
#[derive(Debug, Clone)]
struct ResolvedCheckpoint {
    name: String,
    image: PathBuf,
    match_level: Option<MatchLevel>,
    region: Option<Region>,
}

/// Await `work`, then advance the progress bar whatever it returned
async fn tick_after<T>(progress: Option<ProgressBar>, work: impl Future<Output = T>) -> T {
    let out = work.await;
    if let Some(pb) = progress {
        pb.inc(1);
    }
    out
}

/// Harness configuration for a run: config file, plan, then flags
pub fn resolve_config(config: &CliConfig, plan: &Plan, args: &RunArgs) -> CliResult<HarnessConfig> {
    let mut harness = plan.apply_to(config.harness_config()?)?;
    if let Some(dir) = &args.baseline_dir {
        harness.baseline_dir.clone_from(dir);
    }
    if let Some(dir) = &args.diff_dir {
        harness.diff_dir = Some(dir.clone());
        harness.diff.render_diff_image = true;
    }
    if args.save_new {
        harness.save_new_baselines = true;
    }
    if let Some(ms) = args.timeout_ms {
        harness = harness.with_finish_timeout(Duration::from_millis(ms));
    }
    if let Some(jobs) = args.jobs {
        harness.concurrency = jobs;
    }
    harness.validate()?;
    Ok(harness)
}

/// Execute the run command
///
/// The report is rendered even when the batch timed out with sessions
/// still open; the caller derives the exit code from it.
pub async fn execute_run(config: &CliConfig, args: &RunArgs) -> CliResult<BatchReport> {
    let plan = Plan::load(&args.plan)?;
    let harness = Arc::new(resolve_config(config, &plan, args)?);

    let batch = Batch::start(BatchInfo::from_config(&harness));
    let tracker = SessionTracker::from_config(Arc::clone(&harness)).with_batch(batch);
    let runner = SuiteRunner::new(tracker)?;

    let mut reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    reporter.header(&format!("Batch {}", harness.batch.name));
    reporter.start_progress(plan.tests.len() as u64, "capturing");

    let mut jobs = Vec::with_capacity(plan.tests.len());
    for test in &plan.tests {
        let viewport = Plan::test_viewport(test, &harness)?;
        let checkpoints: Vec<ResolvedCheckpoint> = test
            .checkpoints
            .iter()
            .map(|c| ResolvedCheckpoint {
                name: c.name.clone(),
                image: plan.image_path(c),
                match_level: c.match_level,
                region: c.region,
            })
            .collect();
        let progress = reporter.progress_handle();
        jobs.push(
            TestJob::new(test.name.clone(), move |mut session| {
                tick_after(progress, async move {
                    for checkpoint in checkpoints {
                        let target = FileTarget::new(&checkpoint.image, viewport);
                        match session
                            .check(&checkpoint.name, &target, checkpoint.region, checkpoint.match_level)
                            .await
                        {
                            Ok(_) => {}
                            // recorded as MISSING; the remaining checkpoints still run
                            Err(e) if e.is_retriable() => {
                                warn!(checkpoint = %checkpoint.name, error = %e, "capture failed");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    session.close().await
                })
            })
            .with_viewport(viewport),
        );
    }

    let report = match runner.run(jobs).await {
        Ok(report) => report,
        Err(VistarError::IncompleteBatch { report, waited_ms, .. }) => {
            warn!(waited_ms, "batch finished with sessions still open");
            *report
        }
        Err(e) => return Err(e.into()),
    };
    reporter.finish();

    for session in &report.per_session {
        reporter.session(session);
    }
    reporter.batch_summary(&report);

    let format = ReportFormat::from(args.format);
    write_output(args.output.as_deref(), &render(&report, format)?)?;
    if let Some(path) = &args.output {
        info!(path = %path.display(), %format, "report written");
    }
    Ok(report)
}
