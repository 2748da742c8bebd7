//! Batch aggregator: groups every session of one run and rolls them up into a
//! [`BatchReport`].
//!
//! A [`Batch`] is a cheap cloneable handle. Sessions register when opened and
//! attach their result when closed or abandoned. [`Batch::finish`] waits until
//! nothing registered is still open.
//!
//! ```text
//!  open ──register──►┌───────┐◄──attach── close / abandon / drop
//!                    │ Batch │
//!  finish(timeout) ─►└───────┘──► BatchReport (incomplete on timeout)
//! ```

use crate::config::HarnessConfig;
use crate::diff::MismatchReason;
use crate::report::BatchReport;
use crate::result::{VistarError, VistarResult};
use crate::session::SessionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key/value pair attached to a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProperty {
    /// Property name
    pub name: String,
    /// Property value
    pub value: String,
}

impl BatchProperty {
    /// Create a property
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Identity and metadata of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    /// Unique batch id
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Sequence grouping batches across runs
    pub sequence_name: Option<String>,
    /// Ordered key/value properties
    pub properties: Vec<BatchProperty>,
    /// Emit a completion notification on finish
    pub notify_on_completion: bool,
    /// When the batch started
    pub started_at: DateTime<Utc>,
}

impl BatchInfo {
    /// Create batch info with a fresh id
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sequence_name: None,
            properties: Vec::new(),
            notify_on_completion: false,
            started_at: Utc::now(),
        }
    }

    /// Batch info from the configured batch settings
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            sequence_name: config.batch.sequence_name.clone(),
            properties: config.batch.properties.clone(),
            notify_on_completion: config.batch.notify_on_completion,
            ..Self::new(config.batch.name.clone())
        }
    }

    /// Set the sequence name
    #[must_use]
    pub fn with_sequence_name(mut self, sequence: impl Into<String>) -> Self {
        self.sequence_name = Some(sequence.into());
        self
    }

    /// Add a property
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(BatchProperty::new(name, value));
        self
    }

    /// Enable the completion notification
    #[must_use]
    pub const fn with_notify_on_completion(mut self, notify: bool) -> Self {
        self.notify_on_completion = notify;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    /// Registered sessions that have not attached yet
    open: HashMap<Uuid, String>,
    attached: HashSet<Uuid>,
    results: Vec<SessionResult>,
    finish_called: bool,
    /// No further registrations or attachments accepted
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    info: BatchInfo,
    state: Mutex<State>,
    pending: watch::Sender<usize>,
}

/// Shared handle to a running batch
#[derive(Debug, Clone)]
pub struct Batch {
    inner: Arc<Inner>,
}

impl Batch {
    /// Start a batch
    #[must_use]
    pub fn start(info: BatchInfo) -> Self {
        info!(batch = %info.name, id = %info.id, "batch started");
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                info,
                state: Mutex::new(State::default()),
                pending,
            }),
        }
    }

    /// Batch metadata
    #[must_use]
    pub fn info(&self) -> &BatchInfo {
        &self.inner.info
    }

    /// Batch id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.info.id
    }

    /// Registered sessions still open
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Whether `finish` has completed (or timed out)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session that `finish` must wait for
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::InvalidState`] if the batch already finished
    pub fn register(&self, session_id: Uuid, test_name: &str) -> VistarResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(VistarError::invalid_state(format!(
                "batch '{}' is finished; cannot open session '{test_name}'",
                self.inner.info.name
            )));
        }
        state.open.insert(session_id, test_name.to_string());
        self.inner.pending.send_replace(state.open.len());
        debug!(batch = %self.inner.info.name, session = %test_name, "session registered");
        Ok(())
    }

    /// Attach a closed session's result
    ///
    /// Sessions that never registered are accepted as well.
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::InvalidState`] if the batch already finished or
    /// the session already attached
    pub fn attach(&self, result: SessionResult) -> VistarResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(VistarError::invalid_state(format!(
                "batch '{}' is finished; result of session '{}' rejected",
                self.inner.info.name, result.test_name
            )));
        }
        if !state.attached.insert(result.session_id) {
            return Err(VistarError::invalid_state(format!(
                "session '{}' already attached to batch '{}'",
                result.test_name, self.inner.info.name
            )));
        }
        state.open.remove(&result.session_id);
        debug!(
            batch = %self.inner.info.name,
            session = %result.test_name,
            verdict = %result.verdict,
            "session attached"
        );
        state.results.push(result);
        self.inner.pending.send_replace(state.open.len());
        Ok(())
    }

    /// Replace the detail of an abandoned session's result with `cause`
    ///
    /// Returns whether an abandoned result for `session_id` was found before
    /// the batch finished.
    pub fn explain_abandoned(&self, session_id: Uuid, cause: &str) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let Some(result) = state
            .results
            .iter_mut()
            .find(|r| r.session_id == session_id && r.reason == Some(MismatchReason::Abandoned))
        else {
            return false;
        };
        result.detail = Some(cause.to_string());
        true
    }

    /// Wait for every registered session, then build the report
    ///
    /// # Errors
    ///
    /// - [`VistarError::AlreadyClosed`] on a second call
    /// - [`VistarError::IncompleteBatch`] if `timeout` elapsed first; the
    ///   error carries the partial report
    pub async fn finish(&self, timeout: Option<Duration>) -> VistarResult<BatchReport> {
        {
            let mut state = self.lock();
            if state.finish_called {
                return Err(VistarError::AlreadyClosed {
                    subject: format!("batch '{}'", self.inner.info.name),
                });
            }
            state.finish_called = true;
        }

        let started = Instant::now();
        let deadline = timeout.map(|limit| tokio::time::Instant::now() + limit);
        let mut rx = self.inner.pending.subscribe();

        let (results, stragglers) = loop {
            let all_attached = rx.wait_for(|pending| *pending == 0);
            let waited = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, all_attached)
                    .await
                    .ok()
                    .map(|attached| attached.map(|_| ())),
                None => Some(all_attached.await.map(|_| ())),
            };
            let timed_out = match waited {
                Some(Ok(())) => false,
                Some(Err(_)) => {
                    return Err(VistarError::invalid_state(format!(
                        "batch '{}' lost its pending-session channel",
                        self.inner.info.name
                    )));
                }
                None => true,
            };

            let mut state = self.lock();
            if timed_out || state.open.is_empty() {
                if timed_out {
                    warn!(
                        batch = %self.inner.info.name,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "batch finish timed out"
                    );
                }
                state.closed = true;
                let mut stragglers: Vec<String> = state.open.values().cloned().collect();
                stragglers.sort();
                break (state.results.clone(), stragglers);
            }
            // a session registered between the count reaching zero and the lock
            debug!(batch = %self.inner.info.name, pending = state.open.len(), "late registration; still waiting");
        };

        let report = BatchReport::from_results(&self.inner.info, &results, &stragglers);
        if !stragglers.is_empty() {
            return Err(VistarError::IncompleteBatch {
                batch_name: self.inner.info.name.clone(),
                pending: stragglers.len(),
                waited_ms: started.elapsed().as_millis() as u64,
                report: Box::new(report),
            });
        }

        info!(
            batch = %report.batch_name,
            total = report.total_sessions,
            passed = report.passed,
            failed = report.failed,
            "batch finished"
        );
        if self.inner.info.notify_on_completion {
            info!(
                target: "vistar::notify",
                batch = %report.batch_name,
                id = %report.batch_id,
                passed = report.passed,
                failed = report.failed,
                "batch completed"
            );
        }
        Ok(report)
    }
}
