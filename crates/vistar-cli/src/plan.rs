//! Run plans: tests and the rendered images of their checkpoints
//!
//! ```yaml
//! app_name: bank
//! batch:
//!   name: nightly
//!   sequence_name: Bank SDK
//! viewport: 1400x900
//! tests:
//!   - name: Log into a bank account
//!     checkpoints:
//!       - name: Login page
//!         image: shots/login.png
//!       - name: Main page
//!         image: shots/main.png
//!         match_level: layout
//! ```
//!
//! Image paths are relative to the plan file.

use crate::error::{CliError, CliResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use vistar::{BatchSettings, HarnessConfig, MatchLevel, Region, Viewport};

/// One checkpoint of a planned test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCheckpoint {
    /// Checkpoint name
    pub name: String,
    /// Rendered page image (PNG)
    pub image: PathBuf,
    /// Match level override
    #[serde(default)]
    pub match_level: Option<MatchLevel>,
    /// Only compare this part of the image
    #[serde(default)]
    pub region: Option<Region>,
}

/// One planned test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTest {
    /// Test name
    pub name: String,
    /// Viewport override, `WIDTHxHEIGHT`
    #[serde(default)]
    pub viewport: Option<String>,
    /// Ordered checkpoints
    #[serde(default)]
    pub checkpoints: Vec<PlanCheckpoint>,
}

/// A run plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Application under test; overrides the configured name
    #[serde(default)]
    pub app_name: Option<String>,
    /// Batch grouping; overrides the configured batch
    #[serde(default)]
    pub batch: Option<BatchSettings>,
    /// Default viewport, `WIDTHxHEIGHT`
    #[serde(default)]
    pub viewport: Option<String>,
    /// Default match level
    #[serde(default)]
    pub match_level: Option<MatchLevel>,
    /// Planned tests
    pub tests: Vec<PlanTest>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Plan {
    /// Read and validate a plan file
    pub fn load(path: &Path) -> CliResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            CliError::plan(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut plan = Self::from_yaml_str(&yaml)?;
        plan.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(plan)
    }

    /// Parse and validate plan YAML; image paths resolve against the
    /// current directory
    pub fn from_yaml_str(yaml: &str) -> CliResult<Self> {
        let plan: Self = serde_yaml_ng::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Reject plans the harness cannot run unambiguously
    pub fn validate(&self) -> CliResult<()> {
        if self.tests.is_empty() {
            return Err(CliError::plan("plan has no tests"));
        }
        if let Some(viewport) = &self.viewport {
            parse_viewport(viewport)?;
        }

        let mut names = HashSet::new();
        for test in &self.tests {
            if test.name.trim().is_empty() {
                return Err(CliError::plan("test name must not be empty"));
            }
            if !names.insert(test.name.as_str()) {
                return Err(CliError::plan(format!("duplicate test '{}'", test.name)));
            }
            if let Some(viewport) = &test.viewport {
                parse_viewport(viewport)?;
            }
            let mut checkpoints = HashSet::new();
            for checkpoint in &test.checkpoints {
                if !checkpoints.insert(checkpoint.name.as_str()) {
                    return Err(CliError::plan(format!(
                        "duplicate checkpoint '{}' in test '{}'",
                        checkpoint.name, test.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Overlay the plan's app, batch, viewport and match level onto `config`
    pub fn apply_to(&self, mut config: HarnessConfig) -> CliResult<HarnessConfig> {
        if let Some(app) = &self.app_name {
            config.app_name.clone_from(app);
        }
        if let Some(batch) = &self.batch {
            config.batch = batch.clone();
        }
        if let Some(viewport) = &self.viewport {
            config.viewport = parse_viewport(viewport)?;
        }
        if let Some(level) = self.match_level {
            config.default_match_level = level;
        }
        Ok(config)
    }

    /// Viewport a test runs at, given the effective configuration
    pub fn test_viewport(test: &PlanTest, config: &HarnessConfig) -> CliResult<Viewport> {
        test.viewport
            .as_deref()
            .map_or(Ok(config.viewport), parse_viewport)
    }

    /// Resolve a checkpoint image against the plan directory
    #[must_use]
    pub fn image_path(&self, checkpoint: &PlanCheckpoint) -> PathBuf {
        if checkpoint.image.is_absolute() {
            checkpoint.image.clone()
        } else {
            self.base_dir.join(&checkpoint.image)
        }
    }

    /// Tests whose names appear in `only`; all tests when `only` is empty
    #[must_use]
    pub fn selected<'a>(&'a self, only: &[String]) -> Vec<&'a PlanTest> {
        self.tests
            .iter()
            .filter(|t| only.is_empty() || only.iter().any(|o| o == &t.name))
            .collect()
    }
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_viewport(s: &str) -> CliResult<Viewport> {
    s.parse::<Viewport>()
        .map_err(|e| CliError::invalid_argument(e.to_string()))
}
