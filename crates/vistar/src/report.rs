//! Report emitter: pure rendering of a [`BatchReport`] as text, JSON, JUnit
//! XML or HTML.

use crate::batch::{BatchInfo, BatchProperty};
use crate::capture::Viewport;
use crate::diff::{DiffOutcome, MismatchReason};
use crate::result::{VistarError, VistarResult};
use crate::session::{Checkpoint, SessionResult, SessionVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Per-session section of a batch report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Test name
    pub name: String,
    /// Application under test
    pub app: String,
    /// Session viewport
    pub viewport: Viewport,
    /// Browser/OS descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Verdict
    pub verdict: SessionVerdict,
    /// Reason code when FAILED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<MismatchReason>,
    /// Human-readable reason when FAILED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// First checkpoint that did not pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    /// Checkpoints in ordinal order
    pub checkpoints: Vec<Checkpoint>,
}

impl From<&SessionResult> for SessionReport {
    fn from(result: &SessionResult) -> Self {
        Self {
            name: result.test_name.clone(),
            app: result.app_name.clone(),
            viewport: result.viewport,
            environment: result.environment.clone(),
            verdict: result.verdict,
            reason: result.reason,
            detail: result.detail.clone(),
            first_failure: result.first_failure.clone(),
            checkpoints: result.checkpoints.clone(),
        }
    }
}

/// Aggregated results of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Batch display name
    pub batch_name: String,
    /// Batch id
    pub batch_id: Uuid,
    /// Sequence name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_name: Option<String>,
    /// Batch properties, in order
    #[serde(default)]
    pub properties: Vec<BatchProperty>,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the report was built
    pub finished_at: DateTime<Utc>,
    /// Sessions that reported
    pub total_sessions: usize,
    /// Sessions that PASSED
    pub passed: usize,
    /// Sessions that FAILED
    pub failed: usize,
    /// NEW checkpoints across all sessions
    pub new_baselines: usize,
    /// Some registered session never reported
    pub incomplete: bool,
    /// Names of sessions that never reported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_sessions: Vec<String>,
    /// Per-session details, in attach order
    pub per_session: Vec<SessionReport>,
}

impl BatchReport {
    /// Roll session results up; `pending` names sessions still open
    #[must_use]
    pub fn from_results(info: &BatchInfo, results: &[SessionResult], pending: &[String]) -> Self {
        let passed = results.iter().filter(|r| r.is_passed()).count();
        Self {
            batch_name: info.name.clone(),
            batch_id: info.id,
            sequence_name: info.sequence_name.clone(),
            properties: info.properties.clone(),
            started_at: info.started_at,
            finished_at: Utc::now(),
            total_sessions: results.len(),
            passed,
            failed: results.len() - passed,
            new_baselines: results.iter().map(|r| r.count(DiffOutcome::New)).sum(),
            incomplete: !pending.is_empty(),
            pending_sessions: pending.to_vec(),
            per_session: results.iter().map(SessionReport::from).collect(),
        }
    }

    /// Check if every session passed and the batch completed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && !self.incomplete
    }

    /// Process exit code for CI: 0 on success, 1 otherwise
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.all_passed())
    }

    /// Sessions that FAILED
    #[must_use]
    pub fn failures(&self) -> Vec<&SessionReport> {
        self.per_session
            .iter()
            .filter(|s| !s.verdict.is_passed())
            .collect()
    }

    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {}/{} passed, {} failed, {} new",
            self.batch_name, self.passed, self.total_sessions, self.failed, self.new_baselines
        );
        if self.incomplete {
            line.push_str(&format!(
                " (INCOMPLETE: {} session(s) never reported)",
                self.pending_sessions.len()
            ));
        }
        line
    }

    /// Parse a report previously rendered as JSON
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON
    pub fn from_json(json: &str) -> VistarResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Plain text
    #[default]
    Text,
    /// JSON payload
    Json,
    /// JUnit XML
    Junit,
    /// Standalone HTML page
    Html,
}

impl ReportFormat {
    /// Conventional file extension
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
            Self::Junit => "xml",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Junit => "junit",
            Self::Html => "html",
        })
    }
}

impl FromStr for ReportFormat {
    type Err = VistarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "junit" | "xml" => Ok(Self::Junit),
            "html" => Ok(Self::Html),
            other => Err(VistarError::config(format!("unknown report format '{other}'"))),
        }
    }
}

/// Render `report` in `format`
///
/// # Errors
///
/// Returns error only if JSON serialization fails
pub fn render(report: &BatchReport, format: ReportFormat) -> VistarResult<String> {
    match format {
        ReportFormat::Text => Ok(render_text(report)),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ReportFormat::Junit => Ok(render_junit(report)),
        ReportFormat::Html => Ok(render_html(report)),
    }
}

fn checkpoint_note(c: &Checkpoint) -> String {
    let mut note = format!("{} [{}] {}", c.name, c.match_level, c.outcome);
    if let Some(reason) = c.reason {
        note.push_str(&format!(" {reason}"));
    }
    if let Some(detail) = &c.detail {
        note.push_str(&format!(": {detail}"));
    }
    if !c.regions.is_empty() {
        let regions: Vec<String> = c.regions.iter().map(ToString::to_string).collect();
        note.push_str(&format!(" at {}", regions.join(", ")));
    }
    note
}

/// Render the plain-text summary
#[must_use]
pub fn render_text(report: &BatchReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Batch: {} ({})\n", report.batch_name, report.batch_id));
    if let Some(sequence) = &report.sequence_name {
        out.push_str(&format!("Sequence: {sequence}\n"));
    }
    for property in &report.properties {
        out.push_str(&format!("  {} = {}\n", property.name, property.value));
    }
    out.push('\n');

    for session in &report.per_session {
        out.push_str(&format!(
            "{} {} ({} @ {})\n",
            session.verdict, session.name, session.app, session.viewport
        ));
        if let Some(detail) = &session.detail {
            let code = session.reason.map(|r| r.code()).unwrap_or("FAILED");
            out.push_str(&format!("    reason: {code}: {detail}\n"));
        }
        for c in &session.checkpoints {
            let mark = if c.outcome == DiffOutcome::Match { "ok" } else { "!!" };
            out.push_str(&format!("    {mark} #{} {}\n", c.ordinal, checkpoint_note(c)));
        }
    }
    for pending in &report.pending_sessions {
        out.push_str(&format!("PENDING {pending} (never reported)\n"));
    }

    out.push('\n');
    out.push_str(&report.summary());
    out.push('\n');
    out
}

/// Render JUnit XML for CI integration
#[must_use]
pub fn render_junit(report: &BatchReport) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(
        r#"<testsuite name="{}" tests="{}" failures="{}" errors="{}" timestamp="{}">"#,
        escape_xml(&report.batch_name),
        report.total_sessions + report.pending_sessions.len(),
        report.failed,
        report.pending_sessions.len(),
        report.started_at.to_rfc3339()
    ));
    xml.push('\n');

    if !report.properties.is_empty() {
        xml.push_str("  <properties>\n");
        for p in &report.properties {
            xml.push_str(&format!(
                r#"    <property name="{}" value="{}"/>"#,
                escape_xml(&p.name),
                escape_xml(&p.value)
            ));
            xml.push('\n');
        }
        xml.push_str("  </properties>\n");
    }

    for session in &report.per_session {
        xml.push_str(&format!(
            r#"  <testcase classname="{}" name="{}">"#,
            escape_xml(&session.app),
            escape_xml(&session.name)
        ));
        xml.push('\n');
        if !session.verdict.is_passed() {
            let message = session.detail.as_deref().unwrap_or("visual mismatch");
            let kind = session.reason.map(|r| r.code()).unwrap_or("FAILED");
            let body: Vec<String> = session
                .checkpoints
                .iter()
                .filter(|c| c.outcome != DiffOutcome::Match)
                .map(checkpoint_note)
                .collect();
            xml.push_str(&format!(
                r#"    <failure type="{}" message="{}">{}</failure>"#,
                kind,
                escape_xml(message),
                escape_xml(&body.join("\n"))
            ));
            xml.push('\n');
        }
        xml.push_str("  </testcase>\n");
    }

    for pending in &report.pending_sessions {
        xml.push_str(&format!(
            r#"  <testcase name="{}"><error message="session never reported"/></testcase>"#,
            escape_xml(pending)
        ));
        xml.push('\n');
    }

    xml.push_str("</testsuite>\n");
    xml
}

/// Render a standalone HTML page
#[must_use]
pub fn render_html(report: &BatchReport) -> String {
    let mut html = String::new();

    html.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Vistar Visual Report</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 20px; }
        .summary { background: #f5f5f5; padding: 20px; border-radius: 8px; margin-bottom: 20px; }
        .progress-bar { background: #ddd; height: 20px; border-radius: 10px; overflow: hidden; }
        .passed { background: #4caf50; height: 100%; }
        .session { padding: 10px; margin: 5px 0; border-radius: 4px; }
        .session.pass { background: #e8f5e9; border-left: 4px solid #4caf50; }
        .session.fail { background: #ffebee; border-left: 4px solid #f44336; }
        .session.pending { background: #fff3e0; border-left: 4px solid #ff9800; }
        .reason { color: #d32f2f; font-family: monospace; white-space: pre-wrap; }
        table { border-collapse: collapse; margin-top: 8px; }
        td, th { padding: 2px 8px; text-align: left; font-size: 0.9em; }
        .outcome-MATCH { color: #2e7d32; }
        .outcome-NEW { color: #1565c0; }
        .outcome-MISMATCH, .outcome-MISSING { color: #c62828; font-weight: bold; }
    </style>
</head>
<body>
"#,
    );

    let rate = if report.total_sessions == 0 {
        0.0
    } else {
        report.passed as f64 / report.total_sessions as f64 * 100.0
    };
    html.push_str(&format!(
        r#"<div class="summary">
    <h1>{}</h1>
    <h2>Results: {}/{} passed ({:.1}%), {} new baseline(s)</h2>
    <div class="progress-bar">
        <div class="passed" style="width: {:.1}%"></div>
    </div>
"#,
        escape_xml(&report.batch_name),
        report.passed,
        report.total_sessions,
        rate,
        report.new_baselines,
        rate
    ));
    if let Some(sequence) = &report.sequence_name {
        html.push_str(&format!("    <p>Sequence: {}</p>\n", escape_xml(sequence)));
    }
    for p in &report.properties {
        html.push_str(&format!(
            "    <p>{}: {}</p>\n",
            escape_xml(&p.name),
            escape_xml(&p.value)
        ));
    }
    if report.incomplete {
        html.push_str("    <p class=\"reason\">Batch incomplete</p>\n");
    }
    html.push_str("</div>\n");

    html.push_str("<h2>Sessions</h2>\n");
    for session in &report.per_session {
        let class = if session.verdict.is_passed() { "pass" } else { "fail" };
        html.push_str(&format!(
            r#"<div class="session {}">
    <strong>{}</strong> - {} ({} @ {})
"#,
            class,
            escape_xml(&session.name),
            session.verdict,
            escape_xml(&session.app),
            session.viewport
        ));
        if let Some(detail) = &session.detail {
            html.push_str(&format!(
                r#"    <div class="reason">{}</div>"#,
                escape_xml(detail)
            ));
            html.push('\n');
        }
        html.push_str("    <table>\n        <tr><th>#</th><th>Checkpoint</th><th>Level</th><th>Outcome</th><th>Reason</th></tr>\n");
        for c in &session.checkpoints {
            let reason = match (&c.reason, &c.detail) {
                (Some(r), Some(d)) => format!("{r}: {d}"),
                (Some(r), None) => r.to_string(),
                (None, Some(d)) => d.clone(),
                (None, None) => String::new(),
            };
            html.push_str(&format!(
                "        <tr><td>{}</td><td>{}</td><td>{}</td><td class=\"outcome-{}\">{}</td><td>{}</td></tr>\n",
                c.ordinal,
                escape_xml(&c.name),
                c.match_level,
                c.outcome,
                c.outcome,
                escape_xml(&reason)
            ));
        }
        html.push_str("    </table>\n</div>\n");
    }
    for pending in &report.pending_sessions {
        html.push_str(&format!(
            "<div class=\"session pending\"><strong>{}</strong> - never reported</div>\n",
            escape_xml(pending)
        ));
    }

    html.push_str(
        r#"
<footer>
    <p>Generated by Vistar</p>
</footer>
</body>
</html>
"#,
    );
    html
}

/// Escape XML/HTML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capture::Region;
    use crate::diff::MatchLevel;

    fn checkpoint(name: &str, ordinal: usize, outcome: DiffOutcome) -> Checkpoint {
        let failing = outcome == DiffOutcome::Mismatch;
        Checkpoint {
            name: name.to_string(),
            ordinal,
            match_level: MatchLevel::Strict,
            outcome,
            reason: failing.then_some(MismatchReason::PixelDifference),
            detail: failing.then(|| "12 of 100 pixels differ".to_string()),
            regions: if failing {
                vec![Region::new(1, 2, 3, 4)]
            } else {
                Vec::new()
            },
            diff_pixel_count: if failing { 12 } else { 0 },
            image_digest: None,
            diff_image: None,
        }
    }

    fn session(name: &str, checkpoints: Vec<Checkpoint>) -> SessionResult {
        let failed = checkpoints.iter().find(|c| !c.is_passing());
        SessionResult {
            session_id: Uuid::new_v4(),
            batch_id: None,
            test_name: name.to_string(),
            app_name: "playwright.sdk".to_string(),
            viewport: Viewport::new(1400, 900),
            environment: None,
            verdict: if failed.is_some() {
                SessionVerdict::Failed
            } else {
                SessionVerdict::Passed
            },
            reason: failed.and_then(|c| c.reason),
            detail: failed.map(|c| format!("checkpoint '{}' MISMATCH", c.name)),
            first_failure: failed.map(|c| c.name.clone()),
            checkpoints: checkpoints.clone(),
            pending_baselines: Vec::new(),
            started_at: Utc::now(),
            closed_at: Utc::now(),
        }
    }

    fn report() -> BatchReport {
        let info = BatchInfo::new("Playwright SDK TypeScript")
            .with_sequence_name("Playwright SDK")
            .with_property("Demo", "Playwright SDK");
        let login = session(
            "Log into a bank account",
            vec![
                checkpoint("Login page", 0, DiffOutcome::Match),
                checkpoint("Main page", 1, DiffOutcome::Mismatch),
            ],
        );
        let home = session(
            "Open McDonalds Website",
            vec![checkpoint("Home Page", 0, DiffOutcome::New)],
        );
        BatchReport::from_results(&info, &[login, home], &[])
    }

    #[test]
    fn test_counts() {
        let r = report();
        assert_eq!(r.total_sessions, 2);
        assert_eq!(r.passed, 1);
        assert_eq!(r.failed, 1);
        assert_eq!(r.new_baselines, 1);
        assert!(!r.incomplete);
        assert_eq!(r.exit_code(), 1);
        assert_eq!(r.failures()[0].first_failure.as_deref(), Some("Main page"));
    }

    #[test]
    fn test_exit_code_zero_when_all_passed() {
        let info = BatchInfo::new("ok");
        let s = session("A", vec![checkpoint("x", 0, DiffOutcome::Match)]);
        let r = BatchReport::from_results(&info, &[s], &[]);
        assert_eq!(r.exit_code(), 0);
    }

    #[test]
    fn test_incomplete_forces_failure_exit() {
        let info = BatchInfo::new("partial");
        let r = BatchReport::from_results(&info, &[], &["Straggler".to_string()]);
        assert!(r.incomplete);
        assert_eq!(r.exit_code(), 1);
        assert!(r.summary().contains("INCOMPLETE"));
    }

    #[test]
    fn test_json_payload_field_names() {
        let json = render(&report(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["batchName"], "Playwright SDK TypeScript");
        assert_eq!(value["sequenceName"], "Playwright SDK");
        assert_eq!(value["totalSessions"], 2);
        assert_eq!(value["newBaselines"], 1);
        assert_eq!(value["incomplete"], false);
        let first = &value["perSession"][0];
        assert_eq!(first["verdict"], "FAILED");
        assert_eq!(first["firstFailure"], "Main page");
        assert_eq!(first["checkpoints"][1]["outcome"], "MISMATCH");
        assert_eq!(first["checkpoints"][1]["reason"], "PIXEL_DIFFERENCE");
        assert_eq!(first["checkpoints"][1]["matchLevel"], "STRICT");
    }

    #[test]
    fn test_json_parses_back() {
        let original = report();
        let json = render(&original, ReportFormat::Json).unwrap();
        assert_eq!(BatchReport::from_json(&json).unwrap(), original);
    }

    #[test]
    fn test_text_lists_reasons() {
        let text = render(&report(), ReportFormat::Text).unwrap();
        assert!(text.contains("FAILED Log into a bank account"));
        assert!(text.contains("Main page [STRICT] MISMATCH PIXEL_DIFFERENCE"));
        assert!(text.contains("Home Page [STRICT] NEW"));
        assert!(text.contains("Demo = Playwright SDK"));
        assert!(text.ends_with("1/2 passed, 1 failed, 1 new\n"));
    }

    #[test]
    fn test_junit() {
        let xml = render(&report(), ReportFormat::Junit).unwrap();
        assert!(xml.contains(r#"tests="2" failures="1""#));
        assert!(xml.contains(r#"<failure type="PIXEL_DIFFERENCE""#));
        assert!(xml.contains(r#"<property name="Demo" value="Playwright SDK"/>"#));
    }

    #[test]
    fn test_html_escapes() {
        let info = BatchInfo::new("<script>");
        let r = BatchReport::from_results(&info, &[], &[]);
        let html = render(&r, ReportFormat::Html).unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<h1><script>"));
    }

    #[test]
    fn test_html_sessions() {
        let html = render_html(&report());
        assert!(html.contains("session fail"));
        assert!(html.contains("session pass"));
        assert!(html.contains("outcome-MISMATCH"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JUnit".parse::<ReportFormat>().unwrap(), ReportFormat::Junit);
        assert_eq!(ReportFormat::Html.extension(), "html");
        assert!("pdf".parse::<ReportFormat>().is_err());
    }
}
