//! Suite runner: one tokio task per test session, bounded by the configured
//! concurrency, then the batch is finished.

use crate::batch::Batch;
use crate::capture::Viewport;
use crate::report::BatchReport;
use crate::result::{VistarError, VistarResult};
use crate::session::{Session, SessionResult, SessionTracker};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

type JobFuture = Pin<Box<dyn Future<Output = VistarResult<SessionResult>> + Send>>;
type JobFn = Box<dyn FnOnce(Session) -> JobFuture + Send>;

/// One test: a name, an optional viewport and the body driving its session
pub struct TestJob {
    name: String,
    viewport: Option<Viewport>,
    body: JobFn,
}

impl std::fmt::Debug for TestJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestJob")
            .field("name", &self.name)
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}

impl TestJob {
    /// Create a job; `body` receives the opened session and should close it
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(Session) -> Fut + Send + 'static,
        Fut: Future<Output = VistarResult<SessionResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            viewport: None,
            body: Box::new(move |session| Box::pin(body(session))),
        }
    }

    /// Run at a specific viewport instead of the configured default
    #[must_use]
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    /// Test name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs jobs against a batch-bound tracker
#[derive(Debug, Clone)]
pub struct SuiteRunner {
    tracker: SessionTracker,
    batch: Batch,
}

impl SuiteRunner {
    /// Create a runner
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::InvalidState`] if the tracker has no batch
    pub fn new(tracker: SessionTracker) -> VistarResult<Self> {
        let batch = tracker
            .batch()
            .cloned()
            .ok_or_else(|| VistarError::invalid_state("suite runner needs a batch-bound tracker"))?;
        Ok(Self { tracker, batch })
    }

    /// Batch being filled
    #[must_use]
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Run every job, then finish the batch with the configured timeout.
    ///
    /// All sessions are opened up front so the batch waits for queued jobs
    /// too. A job that fails or panics without closing its session leaves it
    /// abandoned.
    ///
    /// # Errors
    ///
    /// - [`VistarError::InvalidState`] if the batch already finished
    /// - [`VistarError::IncompleteBatch`] if the finish timeout elapsed
    pub async fn run(&self, jobs: Vec<TestJob>) -> VistarResult<BatchReport> {
        let limit = self.tracker.config().concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let session = self.tracker.open(&job.name, job.viewport)?;
            let session_id = session.id();
            let semaphore = Arc::clone(&semaphore);
            let batch = self.batch.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let TestJob { name, body, .. } = job;
                match body(session).await {
                    Ok(result) => {
                        debug!(test = %name, verdict = %result.verdict, "job finished");
                    }
                    Err(e) => {
                        error!(test = %name, error = %e, "job failed");
                        // the body dropped its session; keep the cause on the report
                        batch.explain_abandoned(session_id, &format!("job failed: {e}"));
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "job task panicked or was cancelled");
            }
        }

        self.batch
            .finish(self.tracker.config().finish_timeout())
            .await
    }
}
