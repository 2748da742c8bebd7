//! Session tracker: one session per test, an ordered list of checkpoints, a
//! verdict on close.
//!
//! ```text
//!            add_checkpoint / check
//!              ┌──────────┐
//!              ▼          │
//!  open() ──► OPEN ───────┘
//!              │ close(): accept NEW baselines (optional)
//!              │ close() / abandon() / drop
//!              ▼
//!           CLOSING ── roll up verdict ── attach to batch
//!              │
//!              ▼
//!           CLOSED ── add_checkpoint → SessionClosed, close → AlreadyClosed
//! ```
//!
//! Checkpoint methods take `&mut self`, so a capture, its baseline fetch and
//! its diff finish before the next checkpoint or `close` can start.

use crate::baseline::{open_store, Acceptance, BaselineKey, BaselineStore};
use crate::batch::Batch;
use crate::capture::{CaptureAdapter, CaptureTarget, Image, Region, Viewport};
use crate::config::HarnessConfig;
use crate::diff::{Comparator, DiffEngine, DiffOutcome, DiffResult, MatchLevel, MismatchReason};
use crate::result::{VistarError, VistarResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting checkpoints
    Open,
    /// Rolling up results
    Closing,
    /// Finished; no further calls accepted
    Closed,
}

/// Session verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionVerdict {
    /// Every checkpoint matched or was new
    Passed,
    /// Some checkpoint did not pass, or the session was abandoned
    Failed,
}

impl SessionVerdict {
    /// Check if the session passed
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl fmt::Display for SessionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        })
    }
}

/// One named capture within a session, immutable once diffed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Checkpoint name
    pub name: String,
    /// Position within the session, strictly increasing from 0
    pub ordinal: usize,
    /// Match level it was compared under
    pub match_level: MatchLevel,
    /// Diff outcome
    pub outcome: DiffOutcome,
    /// Reason code when not MATCH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<MismatchReason>,
    /// Human-readable explanation when not MATCH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Differing regions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<Region>,
    /// Number of differing pixels
    #[serde(default)]
    pub diff_pixel_count: usize,
    /// SHA-256 of the captured image; absent when the capture failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    /// Written diff visualization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_image: Option<PathBuf>,
}

impl Checkpoint {
    /// Check if this checkpoint lets the session pass
    #[must_use]
    pub const fn is_passing(&self) -> bool {
        self.outcome.is_passing()
    }
}

/// A NEW checkpoint's image, waiting for explicit acceptance
#[derive(Debug, Clone)]
pub struct PendingBaseline {
    /// Where it would be stored
    pub key: BaselineKey,
    /// Captured image
    pub image: Image,
    /// Checkpoint that produced it
    pub checkpoint: String,
}

/// Outcome of a closed or abandoned session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    /// Session id
    pub session_id: Uuid,
    /// Owning batch
    pub batch_id: Option<Uuid>,
    /// Test name
    pub test_name: String,
    /// Application under test
    pub app_name: String,
    /// Viewport of the session
    pub viewport: Viewport,
    /// Browser/OS descriptor
    pub environment: Option<String>,
    /// Verdict
    pub verdict: SessionVerdict,
    /// Reason code of the first failure, or ABANDONED
    pub reason: Option<MismatchReason>,
    /// Human-readable reason when FAILED
    pub detail: Option<String>,
    /// Name of the first checkpoint that did not pass
    pub first_failure: Option<String>,
    /// Checkpoints in ordinal order
    pub checkpoints: Vec<Checkpoint>,
    /// NEW images not yet accepted
    #[serde(skip)]
    pub pending_baselines: Vec<PendingBaseline>,
    /// When the session opened
    pub started_at: DateTime<Utc>,
    /// When the session closed
    pub closed_at: DateTime<Utc>,
}

impl SessionResult {
    /// Check if the session passed
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        self.verdict.is_passed()
    }

    /// Number of checkpoints with the given outcome
    #[must_use]
    pub fn count(&self, outcome: DiffOutcome) -> usize {
        self.checkpoints
            .iter()
            .filter(|c| c.outcome == outcome)
            .count()
    }
}

/// Opens sessions against shared configuration, store and comparator
#[derive(Debug, Clone)]
pub struct SessionTracker {
    config: Arc<HarnessConfig>,
    store: Arc<dyn BaselineStore>,
    comparator: Arc<dyn Comparator>,
    adapter: CaptureAdapter,
    batch: Option<Batch>,
}

impl SessionTracker {
    /// Create a tracker from explicit backends
    #[must_use]
    pub fn new(
        config: Arc<HarnessConfig>,
        store: Arc<dyn BaselineStore>,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        let adapter = CaptureAdapter::new(config.capture_mode);
        Self {
            config,
            store,
            comparator,
            adapter,
            batch: None,
        }
    }

    /// Create a tracker with the configured store backend and the local
    /// diff engine
    #[must_use]
    pub fn from_config(config: Arc<HarnessConfig>) -> Self {
        let store = open_store(config.baseline_backend, &config.baseline_dir);
        let comparator = Arc::new(DiffEngine::new(config.diff));
        Self::new(config, store, comparator)
    }

    /// Bind sessions opened from now on to `batch`
    #[must_use]
    pub fn with_batch(mut self, batch: Batch) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Shared configuration
    #[must_use]
    pub fn config(&self) -> &Arc<HarnessConfig> {
        &self.config
    }

    /// Baseline store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BaselineStore> {
        &self.store
    }

    /// Bound batch
    #[must_use]
    pub fn batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }

    /// Open a session for `test_name`, at `viewport` or the configured default
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::InvalidState`] if the bound batch already finished
    pub fn open(&self, test_name: &str, viewport: Option<Viewport>) -> VistarResult<Session> {
        let id = Uuid::new_v4();
        if let Some(batch) = &self.batch {
            batch.register(id, test_name)?;
        }
        let viewport = viewport.unwrap_or(self.config.viewport);
        info!(session = %test_name, app = %self.config.app_name, viewport = %viewport, "session opened");
        Ok(Session {
            id,
            test_name: test_name.to_string(),
            viewport,
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            comparator: Arc::clone(&self.comparator),
            adapter: self.adapter,
            batch: self.batch.clone(),
            state: SessionState::Open,
            checkpoints: Vec::new(),
            pending: Vec::new(),
            next_ordinal: 0,
            started_at: Utc::now(),
        })
    }
}

/// Handle to an open test session.
///
/// Dropping a session that was neither closed nor abandoned abandons it, so
/// its batch never waits for it forever.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    test_name: String,
    viewport: Viewport,
    config: Arc<HarnessConfig>,
    store: Arc<dyn BaselineStore>,
    comparator: Arc<dyn Comparator>,
    adapter: CaptureAdapter,
    batch: Option<Batch>,
    state: SessionState,
    checkpoints: Vec<Checkpoint>,
    pending: Vec<PendingBaseline>,
    next_ordinal: usize,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Session id
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Test name
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Session viewport
    #[must_use]
    pub const fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Checkpoints recorded so far
    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Baseline key for a checkpoint of this session
    #[must_use]
    pub fn key_for(&self, checkpoint: &str) -> BaselineKey {
        BaselineKey::new(
            self.config.app_name.clone(),
            self.test_name.clone(),
            checkpoint,
            self.viewport,
        )
        .with_environment(self.config.environment.clone())
    }

    fn ensure_open(&self, checkpoint: &str) -> VistarResult<()> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(VistarError::SessionClosed {
                test_name: self.test_name.clone(),
                checkpoint: checkpoint.to_string(),
            })
        }
    }

    /// Ordinal for a new checkpoint named `name`.
    ///
    /// A failed capture immediately followed by another attempt at the same
    /// checkpoint replaces the MISSING entry and keeps its ordinal.
    fn take_ordinal(&mut self, name: &str) -> usize {
        let retry = self.checkpoints.last().is_some_and(|c| {
            c.name == name
                && c.outcome == DiffOutcome::Missing
                && c.reason == Some(MismatchReason::CaptureFailed)
        });
        if retry {
            if let Some(previous) = self.checkpoints.pop() {
                return previous.ordinal;
            }
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }

    /// Compare a captured image against its baseline and record the result
    ///
    /// `level` defaults to the configured match level. A baseline store
    /// failure is recorded as MISMATCH/`BASELINE_UNAVAILABLE`.
    ///
    /// # Errors
    ///
    /// - [`VistarError::SessionClosed`] if the session is not open
    /// - comparator failures
    pub async fn add_checkpoint(
        &mut self,
        name: &str,
        image: Image,
        level: Option<MatchLevel>,
    ) -> VistarResult<DiffOutcome> {
        self.ensure_open(name)?;
        let level = level.unwrap_or(self.config.default_match_level);
        let key = self.key_for(name);

        let diff = match self.store.get(&key).await {
            Ok(baseline) => {
                self.comparator
                    .compare(&image, baseline.as_ref().map(|b| &b.image), level)
                    .await?
            }
            Err(e) => {
                warn!(session = %self.test_name, checkpoint = %name, error = %e, "baseline unavailable");
                DiffResult::baseline_unavailable(e.to_string())
            }
        };

        let diff_image = match &diff.diff_image {
            Some(png) => self.write_diff_image(&key, png).await,
            None => None,
        };

        let ordinal = self.take_ordinal(name);
        let outcome = diff.outcome;
        match outcome {
            DiffOutcome::Match => {
                debug!(session = %self.test_name, checkpoint = %name, ordinal, "checkpoint matched");
            }
            DiffOutcome::New => {
                info!(session = %self.test_name, checkpoint = %name, ordinal, "new checkpoint, no baseline");
            }
            DiffOutcome::Mismatch | DiffOutcome::Missing => {
                warn!(
                    session = %self.test_name,
                    checkpoint = %name,
                    ordinal,
                    level = %level,
                    reason = ?diff.reason,
                    "checkpoint did not match"
                );
            }
        }

        self.checkpoints.push(Checkpoint {
            name: name.to_string(),
            ordinal,
            match_level: level,
            outcome,
            reason: diff.reason,
            detail: diff.detail,
            regions: diff.regions,
            diff_pixel_count: diff.diff_pixel_count,
            image_digest: Some(image.digest()),
            diff_image,
        });
        if outcome == DiffOutcome::New {
            self.pending.push(PendingBaseline {
                key,
                image,
                checkpoint: name.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Capture `target` (optionally cropped to `region`) and record a
    /// checkpoint
    ///
    /// # Errors
    ///
    /// - [`VistarError::Capture`]: the checkpoint is recorded as
    ///   MISSING/`CAPTURE_FAILED` and the error returned so the caller can
    ///   retry; a successful retry replaces the MISSING entry
    /// - everything [`Session::add_checkpoint`] returns
    pub async fn check(
        &mut self,
        name: &str,
        target: &dyn CaptureTarget,
        region: Option<Region>,
        level: Option<MatchLevel>,
    ) -> VistarResult<DiffOutcome> {
        self.ensure_open(name)?;
        match self.adapter.capture(target, region).await {
            Ok(image) => self.add_checkpoint(name, image, level).await,
            Err(e) if e.is_retriable() => {
                self.record_missing(name, level, MismatchReason::CaptureFailed, e.to_string());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Record a checkpoint whose image could not be produced
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::SessionClosed`] if the session is not open
    pub fn add_missing(&mut self, name: &str, detail: impl Into<String>) -> VistarResult<()> {
        self.ensure_open(name)?;
        self.record_missing(name, None, MismatchReason::CaptureFailed, detail.into());
        Ok(())
    }

    fn record_missing(
        &mut self,
        name: &str,
        level: Option<MatchLevel>,
        reason: MismatchReason,
        detail: String,
    ) {
        let ordinal = self.take_ordinal(name);
        warn!(session = %self.test_name, checkpoint = %name, ordinal, detail = %detail, "checkpoint missing");
        self.checkpoints.push(Checkpoint {
            name: name.to_string(),
            ordinal,
            match_level: level.unwrap_or(self.config.default_match_level),
            outcome: DiffOutcome::Missing,
            reason: Some(reason),
            detail: Some(detail),
            regions: Vec::new(),
            diff_pixel_count: 0,
            image_digest: None,
            diff_image: None,
        });
    }

    async fn write_diff_image(&self, key: &BaselineKey, png: &[u8]) -> Option<PathBuf> {
        let dir = self.config.diff_dir.as_ref()?;
        let path = dir.join(key.relative_stem()).with_extension("diff.png");
        let written = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, png).await
        };
        match written.await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot write diff image");
                None
            }
        }
    }

    /// Close the session and compute its verdict
    ///
    /// With `save_new_baselines` enabled, NEW images are accepted into the
    /// store first; those that fail to save stay in `pending_baselines`. The
    /// session stays OPEN while the store is written, so a close future
    /// dropped midway leaves a session that `abandon` or `Drop` still closes.
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::AlreadyClosed`] on a second close
    pub async fn close(&mut self) -> VistarResult<SessionResult> {
        self.ensure_closable()?;

        if self.config.save_new_baselines && !self.pending.is_empty() {
            let acceptance = Acceptance::now(self.config.accepted_by.clone());
            let mut saved = Vec::with_capacity(self.pending.len());
            for pending in &self.pending {
                match self
                    .store
                    .put(&pending.key, &pending.image, acceptance.clone())
                    .await
                {
                    Ok(()) => {
                        debug!(session = %self.test_name, checkpoint = %pending.checkpoint, "new baseline saved");
                        saved.push(true);
                    }
                    Err(e) => {
                        warn!(session = %self.test_name, checkpoint = %pending.checkpoint, error = %e, "cannot save new baseline");
                        saved.push(false);
                    }
                }
            }
            let mut saved = saved.into_iter();
            self.pending.retain(|_| !saved.next().unwrap_or(false));
        }

        self.begin_closing()?;
        let result = self.seal(None);
        info!(
            session = %result.test_name,
            verdict = %result.verdict,
            checkpoints = result.checkpoints.len(),
            first_failure = ?result.first_failure,
            "session closed"
        );
        self.hand_to_batch(&result);
        Ok(result)
    }

    /// Close the session as FAILED/`ABANDONED`
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::AlreadyClosed`] if the session already closed
    pub fn abandon(&mut self, reason: impl Into<String>) -> VistarResult<SessionResult> {
        self.begin_closing()?;
        let result = self.seal(Some(reason.into()));
        warn!(session = %result.test_name, detail = ?result.detail, "session abandoned");
        self.hand_to_batch(&result);
        Ok(result)
    }

    /// Anything short of CLOSED can still be closed or abandoned
    fn ensure_closable(&self) -> VistarResult<()> {
        if self.state == SessionState::Closed {
            return Err(VistarError::AlreadyClosed {
                subject: format!("session '{}'", self.test_name),
            });
        }
        Ok(())
    }

    fn begin_closing(&mut self) -> VistarResult<()> {
        self.ensure_closable()?;
        self.state = SessionState::Closing;
        Ok(())
    }

    /// Roll checkpoints up into a result and mark the session closed
    fn seal(&mut self, abandoned: Option<String>) -> SessionResult {
        let checkpoints = std::mem::take(&mut self.checkpoints);
        let first = checkpoints.iter().find(|c| !c.is_passing());
        let first_failure = first.map(|c| c.name.clone());

        let (verdict, reason, detail) = match abandoned {
            Some(why) => (
                SessionVerdict::Failed,
                Some(MismatchReason::Abandoned),
                Some(why),
            ),
            None => match first {
                Some(c) => (
                    SessionVerdict::Failed,
                    c.reason,
                    Some(format!(
                        "checkpoint '{}' {}: {}",
                        c.name,
                        c.outcome,
                        c.detail.as_deref().unwrap_or("no detail")
                    )),
                ),
                None => (SessionVerdict::Passed, None, None),
            },
        };

        self.state = SessionState::Closed;
        SessionResult {
            session_id: self.id,
            batch_id: self.batch.as_ref().map(Batch::id),
            test_name: self.test_name.clone(),
            app_name: self.config.app_name.clone(),
            viewport: self.viewport,
            environment: self.config.environment.clone(),
            verdict,
            reason,
            detail,
            first_failure,
            checkpoints,
            pending_baselines: std::mem::take(&mut self.pending),
            started_at: self.started_at,
            closed_at: Utc::now(),
        }
    }

    fn hand_to_batch(&self, result: &SessionResult) {
        if let Some(batch) = &self.batch {
            if let Err(e) = batch.attach(result.clone()) {
                warn!(session = %self.test_name, error = %e, "session result not attached to batch");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            let result = self.seal(Some("session dropped without close".to_string()));
            warn!(session = %result.test_name, "session dropped before closing; abandoned");
            self.hand_to_batch(&result);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::baseline::MemoryBaselineStore;
    use crate::batch::BatchInfo;
    use crate::capture::StaticTarget;
    use async_trait::async_trait;
    use image::Rgba;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn page(shade: u8) -> Image {
        let mut img = Image::filled(40, 30, WHITE);
        for y in 5..10 {
            for x in 5..20 {
                img.as_rgba_mut().put_pixel(x, y, Rgba([shade, shade, shade, 255]));
            }
        }
        img
    }

    fn tracker(config: HarnessConfig) -> (SessionTracker, Arc<MemoryBaselineStore>) {
        let store = Arc::new(MemoryBaselineStore::new());
        let tracker = SessionTracker::new(
            Arc::new(config),
            store.clone(),
            Arc::new(DiffEngine::default()),
        );
        (tracker, store)
    }

    async fn seed(store: &MemoryBaselineStore, session: &Session, name: &str, image: &Image) {
        store
            .put(&session.key_for(name), image, Acceptance::now("seed"))
            .await
            .unwrap();
    }

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl BaselineStore for BrokenStore {
        async fn get(&self, key: &BaselineKey) -> VistarResult<Option<crate::baseline::Baseline>> {
            Err(VistarError::baseline_store(key, "disk on fire"))
        }
        async fn put(&self, key: &BaselineKey, _: &Image, _: Acceptance) -> VistarResult<()> {
            Err(VistarError::baseline_store(key, "read-only"))
        }
        async fn delete(&self, _: &BaselineKey) -> VistarResult<bool> {
            Ok(false)
        }
        async fn list(&self) -> VistarResult<Vec<BaselineKey>> {
            Ok(Vec::new())
        }
    }

    /// Store whose writes never complete
    #[derive(Debug)]
    struct StalledStore;

    #[async_trait]
    impl BaselineStore for StalledStore {
        async fn get(&self, _: &BaselineKey) -> VistarResult<Option<crate::baseline::Baseline>> {
            Ok(None)
        }
        async fn put(&self, _: &BaselineKey, _: &Image, _: Acceptance) -> VistarResult<()> {
            std::future::pending().await
        }
        async fn delete(&self, _: &BaselineKey) -> VistarResult<bool> {
            Ok(false)
        }
        async fn list(&self) -> VistarResult<Vec<BaselineKey>> {
            Ok(Vec::new())
        }
    }

    fn stalled_tracker(batch: &Batch) -> SessionTracker {
        SessionTracker::new(
            Arc::new(HarnessConfig::new("bank").with_save_new_baselines(true)),
            Arc::new(StalledStore),
            Arc::new(DiffEngine::default()),
        )
        .with_batch(batch.clone())
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn test_no_baseline_is_new_and_passes() {
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Login", None).unwrap();
            let outcome = session.add_checkpoint("Login page", page(0), None).await.unwrap();
            assert_eq!(outcome, DiffOutcome::New);
            let result = session.close().await.unwrap();
            assert_eq!(result.verdict, SessionVerdict::Passed);
            assert_eq!(result.pending_baselines.len(), 1);
            assert_eq!(result.pending_baselines[0].checkpoint, "Login page");
        }

        #[tokio::test]
        async fn test_match_then_mismatch_fails_with_first_failure() {
            let (tracker, store) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Log into a bank account", None).unwrap();
            seed(&store, &session, "Login page", &page(0)).await;
            seed(&store, &session, "Main page", &page(0)).await;

            let first = session.add_checkpoint("Login page", page(0), None).await.unwrap();
            let second = session.add_checkpoint("Main page", page(200), None).await.unwrap();
            assert_eq!(first, DiffOutcome::Match);
            assert_eq!(second, DiffOutcome::Mismatch);

            let result = session.close().await.unwrap();
            assert_eq!(result.verdict, SessionVerdict::Failed);
            assert_eq!(result.first_failure.as_deref(), Some("Main page"));
            assert_eq!(result.reason, Some(MismatchReason::PixelDifference));
            assert!(result.detail.unwrap().contains("Main page"));
            let ordinals: Vec<_> = result.checkpoints.iter().map(|c| c.ordinal).collect();
            assert_eq!(ordinals, vec![0, 1]);
        }

        #[tokio::test]
        async fn test_add_after_close_is_rejected_without_mutation() {
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Login", None).unwrap();
            session.add_checkpoint("A", page(0), None).await.unwrap();
            let result = session.close().await.unwrap();

            let err = session.add_checkpoint("B", page(0), None).await.unwrap_err();
            assert!(matches!(err, VistarError::SessionClosed { .. }));
            assert!(session.checkpoints().is_empty());
            assert_eq!(result.checkpoints.len(), 1);
            assert_eq!(session.state(), SessionState::Closed);
        }

        #[tokio::test]
        async fn test_second_close_already_closed() {
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Login", None).unwrap();
            session.close().await.unwrap();
            let err = session.close().await.unwrap_err();
            assert!(matches!(err, VistarError::AlreadyClosed { .. }));
            assert!(session.abandon("late").is_err());
        }

        #[tokio::test]
        async fn test_empty_session_passes() {
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Nothing", None).unwrap();
            let result = session.close().await.unwrap();
            assert!(result.is_passed());
            assert!(result.first_failure.is_none());
        }

        #[tokio::test]
        async fn test_viewport_defaults_to_config() {
            let config = HarnessConfig::new("bank").with_viewport(Viewport::new(800, 600));
            let (tracker, _) = tracker(config);
            let session = tracker.open("Login", None).unwrap();
            assert_eq!(session.viewport(), Viewport::new(800, 600));
            let other = tracker.open("Login", Some(Viewport::new(320, 640))).unwrap();
            assert_eq!(other.key_for("x").viewport, Viewport::new(320, 640));
        }
    }

    mod checkpoint_tests {
        use super::*;

        #[tokio::test]
        async fn test_match_level_per_checkpoint() {
            let (tracker, store) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Home", None).unwrap();
            seed(&store, &session, "Home Page", &page(0)).await;
            // same block, different colour: LAYOUT tolerates it
            let outcome = session
                .add_checkpoint("Home Page", page(90), Some(MatchLevel::Layout))
                .await
                .unwrap();
            assert_eq!(outcome, DiffOutcome::Match);
            assert_eq!(session.checkpoints()[0].match_level, MatchLevel::Layout);
        }

        #[tokio::test]
        async fn test_store_failure_degrades_to_baseline_unavailable() {
            let tracker = SessionTracker::new(
                Arc::new(HarnessConfig::new("bank")),
                Arc::new(BrokenStore),
                Arc::new(DiffEngine::default()),
            );
            let mut session = tracker.open("Login", None).unwrap();
            let outcome = session.add_checkpoint("Login page", page(0), None).await.unwrap();
            assert_eq!(outcome, DiffOutcome::Mismatch);
            let result = session.close().await.unwrap();
            assert_eq!(result.reason, Some(MismatchReason::BaselineUnavailable));
            assert!(result.checkpoints[0].detail.as_ref().unwrap().contains("disk on fire"));
        }

        #[tokio::test]
        async fn test_capture_failure_records_missing_and_returns_error() {
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Login", None).unwrap();
            let target = StaticTarget::from_image(&page(0)).unwrap().not_ready();

            let err = session.check("Login page", &target, None, None).await.unwrap_err();
            assert!(err.is_retriable());
            assert_eq!(session.checkpoints()[0].outcome, DiffOutcome::Missing);

            let result = session.close().await.unwrap();
            assert_eq!(result.verdict, SessionVerdict::Failed);
            assert_eq!(result.reason, Some(MismatchReason::CaptureFailed));
        }

        #[tokio::test]
        async fn test_capture_retry_replaces_missing_checkpoint() {
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Login", None).unwrap();
            let broken = StaticTarget::from_image(&page(0)).unwrap().not_ready();
            let ready = StaticTarget::from_image(&page(0)).unwrap();

            session.add_checkpoint("Intro", page(0), None).await.unwrap();
            assert!(session.check("Login page", &broken, None, None).await.is_err());
            let outcome = session.check("Login page", &ready, None, None).await.unwrap();
            assert_eq!(outcome, DiffOutcome::New);

            let result = session.close().await.unwrap();
            assert_eq!(result.checkpoints.len(), 2);
            assert_eq!(result.checkpoints[1].ordinal, 1);
            assert_eq!(result.checkpoints[1].outcome, DiffOutcome::New);
            assert!(result.is_passed());
        }

        #[tokio::test]
        async fn test_add_missing_explicit() {
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let mut session = tracker.open("Login", None).unwrap();
            session.add_missing("Main page", "navigation timed out").unwrap();
            let result = session.close().await.unwrap();
            assert_eq!(result.first_failure.as_deref(), Some("Main page"));
            assert_eq!(result.count(DiffOutcome::Missing), 1);
        }

        #[tokio::test]
        async fn test_save_new_baselines_on_close() {
            let config = HarnessConfig::new("bank")
                .with_save_new_baselines(true)
                .with_accepted_by("nightly");
            let (tracker, store) = tracker(config);
            let mut session = tracker.open("Login", None).unwrap();
            session.add_checkpoint("Login page", page(0), None).await.unwrap();
            let key = session.key_for("Login page");
            let result = session.close().await.unwrap();

            assert!(result.pending_baselines.is_empty());
            let saved = store.get(&key).await.unwrap().unwrap();
            assert_eq!(saved.acceptance.unwrap().accepted_by, "nightly");
        }

        #[tokio::test]
        async fn test_diff_image_written_to_diff_dir() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = HarnessConfig::new("bank");
            config.diff_dir = Some(dir.path().to_path_buf());
            let store = Arc::new(MemoryBaselineStore::new());
            let engine = DiffEngine::new(crate::diff::DiffConfig::default().with_diff_image(true));
            let tracker = SessionTracker::new(Arc::new(config), store.clone(), Arc::new(engine));

            let mut session = tracker.open("Login", None).unwrap();
            seed(&store, &session, "Main page", &page(0)).await;
            session.add_checkpoint("Main page", page(200), None).await.unwrap();
            let path = session.checkpoints()[0].diff_image.clone().unwrap();
            assert!(path.exists());
            assert!(path.to_string_lossy().ends_with(".diff.png"));
        }
    }

    mod batch_binding_tests {
        use super::*;

        #[tokio::test]
        async fn test_close_attaches_to_batch() {
            let batch = Batch::start(BatchInfo::new("run"));
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let tracker = tracker.with_batch(batch.clone());
            let mut session = tracker.open("Login", None).unwrap();
            assert_eq!(batch.pending(), 1);
            session.close().await.unwrap();
            assert_eq!(batch.pending(), 0);
            let report = batch.finish(None).await.unwrap();
            assert_eq!(report.passed, 1);
        }

        #[tokio::test]
        async fn test_drop_abandons_open_session() {
            let batch = Batch::start(BatchInfo::new("run"));
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let tracker = tracker.with_batch(batch.clone());
            {
                let mut session = tracker.open("Crashed", None).unwrap();
                session.add_checkpoint("Login page", page(0), None).await.unwrap();
            }
            let report = batch.finish(None).await.unwrap();
            assert_eq!(report.failed, 1);
            assert_eq!(report.per_session[0].reason, Some(MismatchReason::Abandoned));
        }

        #[tokio::test]
        async fn test_abandon_explicit() {
            let batch = Batch::start(BatchInfo::new("run"));
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let tracker = tracker.with_batch(batch.clone());
            let mut session = tracker.open("Login", None).unwrap();
            let result = session.abandon("browser crashed").unwrap();
            assert_eq!(result.verdict, SessionVerdict::Failed);
            assert_eq!(result.detail.as_deref(), Some("browser crashed"));
            assert_eq!(batch.pending(), 0);
        }

        #[tokio::test]
        async fn test_cancelled_close_can_still_be_abandoned() {
            let batch = Batch::start(BatchInfo::new("run"));
            let tracker = stalled_tracker(&batch);
            let mut session = tracker.open("Login", None).unwrap();
            session.add_checkpoint("Login page", page(0), None).await.unwrap();

            let cancelled =
                tokio::time::timeout(std::time::Duration::from_millis(20), session.close()).await;
            assert!(cancelled.is_err());
            assert_ne!(session.state(), SessionState::Closed);

            let result = session.abandon("close timed out").unwrap();
            assert_eq!(result.reason, Some(MismatchReason::Abandoned));
            assert_eq!(result.checkpoints.len(), 1);
            assert_eq!(batch.pending(), 0);
            let report = batch.finish(Some(std::time::Duration::from_secs(1))).await.unwrap();
            assert_eq!(report.failed, 1);
        }

        #[tokio::test]
        async fn test_cancelled_close_then_drop_releases_batch() {
            let batch = Batch::start(BatchInfo::new("run"));
            let tracker = stalled_tracker(&batch);
            {
                let mut session = tracker.open("Login", None).unwrap();
                session.add_checkpoint("Login page", page(0), None).await.unwrap();
                let cancelled =
                    tokio::time::timeout(std::time::Duration::from_millis(20), session.close())
                        .await;
                assert!(cancelled.is_err());
            }
            assert_eq!(batch.pending(), 0);
            let report = batch.finish(Some(std::time::Duration::from_secs(1))).await.unwrap();
            assert!(!report.incomplete);
            assert_eq!(report.per_session[0].reason, Some(MismatchReason::Abandoned));
        }

        #[tokio::test]
        async fn test_open_after_batch_finished_fails() {
            let batch = Batch::start(BatchInfo::new("run"));
            batch.finish(None).await.unwrap();
            let (tracker, _) = tracker(HarnessConfig::new("bank"));
            let tracker = tracker.with_batch(batch);
            assert!(matches!(
                tracker.open("Late", None),
                Err(VistarError::InvalidState { .. })
            ));
        }
    }
}
