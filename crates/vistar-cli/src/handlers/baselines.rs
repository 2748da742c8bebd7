//! Baselines command handlers

use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::ProgressReporter;
use crate::plan::parse_viewport;
use std::path::PathBuf;
use vistar::{open_store, BaselineKey, HarnessConfig};

fn harness_with_dir(config: &CliConfig, dir: Option<&PathBuf>) -> CliResult<HarnessConfig> {
    let mut harness = config.harness_config()?;
    if let Some(dir) = dir {
        harness.baseline_dir.clone_from(dir);
    }
    Ok(harness)
}

/// List stored baselines, sorted by key
pub async fn execute_list(
    config: &CliConfig,
    baseline_dir: Option<&PathBuf>,
    json: bool,
) -> CliResult<Vec<BaselineKey>> {
    let harness = harness_with_dir(config, baseline_dir)?;
    let store = open_store(harness.baseline_backend, &harness.baseline_dir);
    let keys = store.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
    } else {
        for key in &keys {
            println!("{key}");
        }
        ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet())
            .info(&format!("{} baseline(s) in {}", keys.len(), harness.baseline_dir.display()));
    }
    Ok(keys)
}

/// Identifies the baseline to delete
#[derive(Debug, Clone)]
pub struct DeleteTarget<'a> {
    /// Application name
    pub app: &'a str,
    /// Test name
    pub test: &'a str,
    /// Checkpoint name
    pub checkpoint: &'a str,
    /// Viewport as `WIDTHxHEIGHT`
    pub viewport: &'a str,
    /// Environment label
    pub environment: Option<&'a str>,
}

/// Delete one baseline; returns whether it existed
pub async fn execute_delete(
    config: &CliConfig,
    target: &DeleteTarget<'_>,
    baseline_dir: Option<&PathBuf>,
) -> CliResult<bool> {
    let harness = harness_with_dir(config, baseline_dir)?;
    let store = open_store(harness.baseline_backend, &harness.baseline_dir);
    let key = BaselineKey::new(
        target.app,
        target.test,
        target.checkpoint,
        parse_viewport(target.viewport)?,
    )
    .with_environment(target.environment.map(str::to_string));

    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    let existed = store.delete(&key).await?;
    if existed {
        reporter.success(&format!("deleted {key}"));
    } else {
        reporter.warning(&format!("no baseline stored for {key}"));
    }
    Ok(existed)
}
