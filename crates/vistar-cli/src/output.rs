//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use vistar::{BatchReport, DiffOutcome, DiffResult, SessionReport};

/// Progress reporter for a run
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
        }
    }

    /// Start a progress bar over `total` tests
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Handle that jobs can tick from other tasks
    #[must_use]
    pub fn progress_handle(&self) -> Option<ProgressBar> {
        self.progress_bar.clone()
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }

        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "PASS".to_string()
        };

        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        let prefix = if self.use_color {
            style("✗").red().bold().to_string()
        } else {
            "FAIL".to_string()
        };

        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }

        let prefix = if self.use_color {
            style("⚠").yellow().bold().to_string()
        } else {
            "WARN".to_string()
        };

        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }

        let prefix = if self.use_color {
            style("ℹ").blue().bold().to_string()
        } else {
            "INFO".to_string()
        };

        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        let _ = self.term.write_line("");
        let _ = self.term.write_line(&styled);
    }

    /// One line per session
    pub fn session(&self, session: &SessionReport) {
        let label = format!("{} [{}]", session.name, session.viewport);
        if session.verdict.is_passed() {
            self.success(&label);
        } else {
            let failure = session.first_failure.as_deref().unwrap_or("-");
            let reason = session.reason.map_or_else(|| "-".to_string(), |r| r.to_string());
            self.failure(&format!("{label}: '{failure}' {reason}"));
        }
    }

    /// Print the batch summary
    pub fn batch_summary(&self, report: &BatchReport) {
        if self.quiet && report.all_passed() {
            return;
        }

        let _ = self.term.write_line("");

        if report.incomplete {
            self.warning(&format!(
                "batch finished with {} open session(s): {}",
                report.pending_sessions.len(),
                report.pending_sessions.join(", ")
            ));
        }

        if self.use_color {
            let passed_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();
            let new_style = Style::new().yellow();

            let status = if report.all_passed() {
                passed_style.apply_to("PASSED")
            } else {
                failed_style.apply_to("FAILED")
            };

            let _ = self.term.write_line(&format!(
                "{} {} ({} sessions: {} passed, {} failed, {} new baselines)",
                status,
                report.batch_name,
                report.total_sessions,
                passed_style.apply_to(report.passed),
                if report.failed > 0 {
                    failed_style.apply_to(report.failed).to_string()
                } else {
                    report.failed.to_string()
                },
                new_style.apply_to(report.new_baselines)
            ));
        } else {
            let _ = self.term.write_line(&report.summary());
        }
    }

    /// Print a single comparison result
    pub fn comparison(&self, result: &DiffResult) {
        let detail = result.detail.as_deref().unwrap_or("");
        match result.outcome {
            DiffOutcome::Match => self.success(&format!("MATCH {detail}")),
            DiffOutcome::New => self.info("NEW (no baseline)"),
            DiffOutcome::Mismatch | DiffOutcome::Missing => {
                let reason = result.reason.map_or_else(String::new, |r| r.to_string());
                self.failure(&format!(
                    "{} {reason} {detail} ({} of {} pixels, {} region(s))",
                    result.outcome,
                    result.diff_pixel_count,
                    result.total_pixels,
                    result.regions.len()
                ));
            }
        }
    }
}
