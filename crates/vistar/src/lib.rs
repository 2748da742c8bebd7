//! Vistar: self-hosted visual regression engine
//!
//! Vistar (Spanish: "to view") captures rendered pages, compares them against
//! accepted baselines under a chosen match level, and rolls the results of a
//! run up into a batch report.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                         VISTAR Architecture                           │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌─────────────┐   ┌────────────┐   ┌───────────┐  │
//! │  │ CaptureTarget│──►│  Session    │──►│ DiffEngine │◄──│ Baseline  │  │
//! │  │ (page/file)  │   │  (ordered   │   │ EXACT      │   │ Store     │  │
//! │  └──────────────┘   │ checkpoints)│   │ STRICT     │   │ (fs/mem)  │  │
//! │                     └──────┬──────┘   │ LAYOUT     │   └───────────┘  │
//! │                            │ close    │ CONTENT    │                  │
//! │                            ▼          └────────────┘                  │
//! │                     ┌─────────────┐   ┌────────────┐                  │
//! │                     │   Batch     │──►│  Report    │ text/json/junit/ │
//! │                     │ (aggregate) │   │  Emitter   │ html             │
//! │                     └─────────────┘   └────────────┘                  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vistar::prelude::*;
//!
//! # async fn demo(login: Image, main: Image) -> VistarResult<()> {
//! let config = Arc::new(HarnessConfig::new("bank").with_batch_name("nightly"));
//! let batch = Batch::start(BatchInfo::from_config(&config));
//! let tracker = SessionTracker::from_config(config).with_batch(batch.clone());
//!
//! let mut session = tracker.open("Log into a bank account", None)?;
//! session.add_checkpoint("Login page", login, None).await?;
//! session.add_checkpoint("Main page", main, Some(MatchLevel::Layout)).await?;
//! session.close().await?;
//!
//! let report = batch.finish(None).await?;
//! println!("{}", render(&report, ReportFormat::Text)?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Reference image persistence
pub mod baseline;
/// Run-level aggregation
pub mod batch;
/// Page capture seam and raster images
pub mod capture;
/// Harness configuration
pub mod config;
/// Pixel and structural comparison
pub mod diff;
/// Content-block detection
pub mod layout;
/// Batch report rendering
pub mod report;
/// Error types
pub mod result;
/// Concurrent suite execution
pub mod runner;
/// Per-test session tracking
pub mod session;

pub use baseline::{
    open_store, Acceptance, Baseline, BaselineBackend, BaselineKey, BaselineStore,
    FsBaselineStore, MemoryBaselineStore,
};
pub use batch::{Batch, BatchInfo, BatchProperty};
#[cfg(feature = "browser")]
pub use capture::ChromiumTarget;
pub use capture::{
    CaptureAdapter, CaptureMode, CaptureTarget, FileTarget, Image, Region, StaticTarget, Viewport,
};
pub use config::{BatchSettings, HarnessConfig};
pub use diff::{
    Comparator, DiffConfig, DiffEngine, DiffOutcome, DiffResult, MatchLevel, MismatchReason,
};
pub use layout::{detect_blocks, LayoutConfig};
pub use report::{render, BatchReport, ReportFormat, SessionReport};
pub use result::{VistarError, VistarResult};
pub use runner::{SuiteRunner, TestJob};
pub use session::{
    Checkpoint, PendingBaseline, Session, SessionResult, SessionState, SessionTracker,
    SessionVerdict,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::baseline::*;
    pub use super::batch::*;
    pub use super::capture::*;
    pub use super::config::*;
    pub use super::diff::*;
    pub use super::layout::{detect_blocks, LayoutConfig};
    pub use super::report::*;
    pub use super::result::*;
    pub use super::runner::*;
    pub use super::session::*;
}
