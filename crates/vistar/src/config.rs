//! Harness configuration.
//!
//! Loaded once from YAML, overlaid with `VISTAR_*` environment variables, then
//! frozen and shared as `Arc<HarnessConfig>` by trackers, sessions and the
//! batch.

use crate::baseline::BaselineBackend;
use crate::batch::BatchProperty;
use crate::capture::{CaptureMode, Viewport};
use crate::diff::{DiffConfig, MatchLevel};
use crate::result::{VistarError, VistarResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Batch grouping settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Display name of the batch
    pub name: String,
    /// Groups batches of the same suite across runs
    pub sequence_name: Option<String>,
    /// Free-form key/value pairs attached to the batch
    pub properties: Vec<BatchProperty>,
    /// Emit a completion notification when the batch finishes
    pub notify_on_completion: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            name: "vistar".to_string(),
            sequence_name: None,
            properties: Vec::new(),
            notify_on_completion: false,
        }
    }
}

/// Harness configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application under test
    pub app_name: String,
    /// Batch grouping
    pub batch: BatchSettings,
    /// Credential for a hosted baseline backend; never written back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Match level used when a checkpoint does not name one
    pub default_match_level: MatchLevel,
    /// Default viewport for new sessions
    pub viewport: Viewport,
    /// Browser/OS descriptor folded into baseline keys
    pub environment: Option<String>,
    /// Maximum sessions run in parallel
    pub concurrency: usize,
    /// Full-page or viewport capture
    pub capture_mode: CaptureMode,
    /// Baseline storage backend
    pub baseline_backend: BaselineBackend,
    /// Root of the filesystem baseline store
    pub baseline_dir: PathBuf,
    /// Where diff images are written, when enabled
    pub diff_dir: Option<PathBuf>,
    /// Accept NEW checkpoints as baselines when their session closes
    pub save_new_baselines: bool,
    /// Recorded as the acceptor of auto-saved baselines
    pub accepted_by: String,
    /// Upper bound for `Batch::finish`; unbounded when absent
    pub finish_timeout_ms: Option<u64>,
    /// Diff engine tuning
    pub diff: DiffConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            app_name: "app".to_string(),
            batch: BatchSettings::default(),
            api_key: None,
            default_match_level: MatchLevel::Strict,
            viewport: Viewport::default(),
            environment: None,
            concurrency: 4,
            capture_mode: CaptureMode::FullPage,
            baseline_backend: BaselineBackend::Filesystem,
            baseline_dir: PathBuf::from("__baselines__"),
            diff_dir: None,
            save_new_baselines: false,
            accepted_by: "vistar".to_string(),
            finish_timeout_ms: None,
            diff: DiffConfig::default(),
        }
    }
}

impl fmt::Debug for HarnessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessConfig")
            .field("app_name", &self.app_name)
            .field("batch", &self.batch)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("default_match_level", &self.default_match_level)
            .field("viewport", &self.viewport)
            .field("environment", &self.environment)
            .field("concurrency", &self.concurrency)
            .field("capture_mode", &self.capture_mode)
            .field("baseline_backend", &self.baseline_backend)
            .field("baseline_dir", &self.baseline_dir)
            .field("diff_dir", &self.diff_dir)
            .field("save_new_baselines", &self.save_new_baselines)
            .field("accepted_by", &self.accepted_by)
            .field("finish_timeout_ms", &self.finish_timeout_ms)
            .field("diff", &self.diff)
            .finish()
    }
}

impl HarnessConfig {
    /// Create a default configuration for `app_name`
    #[must_use]
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set the batch name
    #[must_use]
    pub fn with_batch_name(mut self, name: impl Into<String>) -> Self {
        self.batch.name = name.into();
        self
    }

    /// Set the batch sequence name
    #[must_use]
    pub fn with_sequence_name(mut self, sequence: impl Into<String>) -> Self {
        self.batch.sequence_name = Some(sequence.into());
        self
    }

    /// Add a batch property
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.batch.properties.push(BatchProperty::new(name, value));
        self
    }

    /// Enable or disable the completion notification
    #[must_use]
    pub const fn with_notify_on_completion(mut self, notify: bool) -> Self {
        self.batch.notify_on_completion = notify;
        self
    }

    /// Set the default match level
    #[must_use]
    pub const fn with_match_level(mut self, level: MatchLevel) -> Self {
        self.default_match_level = level;
        self
    }

    /// Set the default viewport
    #[must_use]
    pub const fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Set the environment descriptor
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Set the concurrency limit
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the capture mode
    #[must_use]
    pub const fn with_capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }

    /// Set the baseline backend
    #[must_use]
    pub const fn with_baseline_backend(mut self, backend: BaselineBackend) -> Self {
        self.baseline_backend = backend;
        self
    }

    /// Set the baseline directory
    #[must_use]
    pub fn with_baseline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline_dir = dir.into();
        self
    }

    /// Auto-accept NEW checkpoints on session close
    #[must_use]
    pub const fn with_save_new_baselines(mut self, save: bool) -> Self {
        self.save_new_baselines = save;
        self
    }

    /// Set the acceptor recorded for auto-saved baselines
    #[must_use]
    pub fn with_accepted_by(mut self, accepted_by: impl Into<String>) -> Self {
        self.accepted_by = accepted_by.into();
        self
    }

    /// Bound `Batch::finish`
    #[must_use]
    pub const fn with_finish_timeout(mut self, timeout: Duration) -> Self {
        self.finish_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set diff engine tuning
    #[must_use]
    pub const fn with_diff(mut self, diff: DiffConfig) -> Self {
        self.diff = diff;
        self
    }

    /// `finish_timeout_ms` as a duration
    #[must_use]
    pub fn finish_timeout(&self) -> Option<Duration> {
        self.finish_timeout_ms.map(Duration::from_millis)
    }

    /// Parse YAML; unspecified fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns error on malformed YAML or invalid values
    pub fn from_yaml_str(yaml: &str) -> VistarResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> VistarResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VistarError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Overlay `VISTAR_*` variables from the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an unparsable value
    pub fn with_env_overrides(self) -> VistarResult<Self> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Overlay `VISTAR_*` variables read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an unparsable value
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> VistarResult<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("VISTAR_APP_NAME") {
            self.app_name = v;
        }
        if let Some(v) = var("VISTAR_BATCH_NAME") {
            self.batch.name = v;
        }
        if let Some(v) = var("VISTAR_BATCH_SEQUENCE") {
            self.batch.sequence_name = Some(v);
        }
        if let Some(v) = var("VISTAR_NOTIFY_ON_COMPLETION") {
            self.batch.notify_on_completion = parse_bool("VISTAR_NOTIFY_ON_COMPLETION", &v)?;
        }
        if let Some(v) = var("VISTAR_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = var("VISTAR_MATCH_LEVEL") {
            self.default_match_level = v.parse()?;
        }
        if let Some(v) = var("VISTAR_VIEWPORT") {
            self.viewport = v.parse()?;
        }
        if let Some(v) = var("VISTAR_ENVIRONMENT") {
            self.environment = Some(v);
        }
        if let Some(v) = var("VISTAR_CONCURRENCY") {
            self.concurrency = v
                .trim()
                .parse()
                .map_err(|_| VistarError::config(format!("VISTAR_CONCURRENCY: not a number: {v}")))?;
        }
        if let Some(v) = var("VISTAR_CAPTURE_MODE") {
            self.capture_mode = v.parse()?;
        }
        if let Some(v) = var("VISTAR_BASELINE_DIR") {
            self.baseline_dir = PathBuf::from(v);
        }
        if let Some(v) = var("VISTAR_DIFF_DIR") {
            self.diff_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("VISTAR_SAVE_NEW_BASELINES") {
            self.save_new_baselines = parse_bool("VISTAR_SAVE_NEW_BASELINES", &v)?;
        }
        if let Some(v) = var("VISTAR_FINISH_TIMEOUT_MS") {
            self.finish_timeout_ms = Some(v.trim().parse().map_err(|_| {
                VistarError::config(format!("VISTAR_FINISH_TIMEOUT_MS: not a number: {v}"))
            })?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field
    pub fn validate(&self) -> VistarResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(VistarError::config("app_name must not be empty"));
        }
        if self.batch.name.trim().is_empty() {
            return Err(VistarError::config("batch.name must not be empty"));
        }
        if self.concurrency == 0 {
            return Err(VistarError::config("concurrency must be at least 1"));
        }
        if !self.viewport.is_valid() {
            return Err(VistarError::config(format!(
                "viewport {} must be non-zero",
                self.viewport
            )));
        }
        if self.diff.color_threshold < 0.0 {
            return Err(VistarError::config("diff.color_threshold must be >= 0"));
        }
        for (name, ratio) in [
            ("diff.max_diff_ratio", self.diff.max_diff_ratio),
            ("diff.content_ratio", self.diff.content_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(VistarError::config(format!(
                    "{name} must be within 0.0..=1.0, got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> VistarResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(VistarError::config(format!("{name}: not a boolean: {other}"))),
    }
}
