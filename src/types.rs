//! Core record types shared by every analysis stage.
//!
//! `TestError` is produced once by the extractor and then only read; the
//! `with_*` builders consume `self`, so a record is never mutated in place
//! after it has been handed to the fingerprinter or matcher.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Category
// ============================================================================

/// Coarse failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// An action, navigation or test exceeded its time budget.
    Timeout,
    /// Connection refused/reset, DNS failures, `net::ERR_*`.
    Network,
    /// A locator never resolved or resolved ambiguously.
    Selector,
    /// An `expect(...)` assertion failed.
    Assertion,
    /// Node-only code was bundled into the browser.
    BrowserCompat,
    /// Page navigation failed or the frame went away.
    Navigation,
    /// 401/403 responses, expired sessions, bad credentials.
    Auth,
    /// ORM / driver failures surfaced through the app.
    Database,
    /// Module resolution and ESM/CJS import failures.
    Import,
    /// Uncaught `TypeError` / `ReferenceError` and friends.
    Runtime,
    /// 5xx responses from the application under test.
    Server,
    /// Nothing recognizable.
    #[default]
    Unknown,
}

impl Category {
    /// All categories in declaration order.
    #[must_use]
    pub fn all() -> &'static [Category] {
        &[
            Self::Timeout,
            Self::Network,
            Self::Selector,
            Self::Assertion,
            Self::BrowserCompat,
            Self::Navigation,
            Self::Auth,
            Self::Database,
            Self::Import,
            Self::Runtime,
            Self::Server,
            Self::Unknown,
        ]
    }

    /// The snake_case name used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Selector => "selector",
            Self::Assertion => "assertion",
            Self::BrowserCompat => "browser_compat",
            Self::Navigation => "navigation",
            Self::Auth => "auth",
            Self::Database => "database",
            Self::Import => "import",
            Self::Runtime => "runtime",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }

    /// Fixed two-letter mnemonic used in compact status lines.
    #[must_use]
    pub fn semantic_code(&self) -> &'static str {
        match self {
            Self::Timeout => "TO",
            Self::Network => "NW",
            Self::Selector => "SL",
            Self::Assertion => "AS",
            Self::BrowserCompat => "BC",
            Self::Navigation => "NV",
            Self::Auth => "AU",
            Self::Database => "DB",
            Self::Import => "IM",
            Self::Runtime => "RT",
            Self::Server => "SV",
            Self::Unknown => "UK",
        }
    }

    /// Map a pattern database category string onto a canonical category.
    ///
    /// Pattern authors use a looser vocabulary than the engine, so several
    /// spellings collapse onto one category. Anything unrecognized is
    /// `Unknown`.
    #[must_use]
    pub fn from_pattern_category(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "timeout" | "timeouts" => Self::Timeout,
            "network" | "connection" => Self::Network,
            "selector" | "element_not_found" | "locator" => Self::Selector,
            "assertion" | "expect" => Self::Assertion,
            "browser_compat" | "browser" | "node_in_browser" => Self::BrowserCompat,
            "navigation" => Self::Navigation,
            "auth" | "authentication" => Self::Auth,
            "database" | "db" | "typeorm" => Self::Database,
            "import" | "module" | "module_resolution" => Self::Import,
            "runtime" | "type_error" => Self::Runtime,
            "server" | "api" => Self::Server,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

// ============================================================================
// Severity
// ============================================================================

/// Pattern-level urgency, `critical > high > medium > low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    #[default]
    Low,
}

impl Severity {
    /// Rank where lower is more severe (critical = 0).
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Base priority score for action items (critical = 1 … low = 4).
    #[must_use]
    pub fn score(&self) -> f64 {
        f64::from(self.rank()) + 1.0
    }

    /// Whichever of the two is more severe.
    #[must_use]
    pub fn max_of(self, other: Severity) -> Severity {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

// ============================================================================
// TestError
// ============================================================================

/// A single normalized failure extracted from runner output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestError {
    /// Cleaned-up, human-readable failure message.
    pub message: String,
    /// Raw stack frames, one per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// First-pass category from the extractor.
    #[serde(default)]
    pub category: Category,
    /// Source file of the failing frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Code frame printed by the runner around the failing line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Contents of the companion DOM snapshot, when one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
}

impl TestError {
    /// Create an `unknown`-category error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            category: Category::Unknown,
            file: None,
            line: None,
            column: None,
            snippet: None,
            dom_snapshot: None,
            screenshot_path: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Add a file location.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    #[must_use]
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    #[must_use]
    pub fn with_dom_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.dom_snapshot = Some(snapshot.into());
        self
    }

    #[must_use]
    pub fn with_screenshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.screenshot_path = Some(path.into());
        self
    }

    /// Basename of `file`, if any.
    #[must_use]
    pub fn file_basename(&self) -> Option<String> {
        self.file.as_deref().map(basename)
    }

    /// Text the matcher scores against: message, stack, snippet and DOM
    /// snapshot joined by newlines, absent parts skipped.
    #[must_use]
    pub fn combined_text(&self) -> String {
        let mut parts = vec![self.message.as_str()];
        parts.extend(
            [&self.stack, &self.snippet, &self.dom_snapshot]
                .into_iter()
                .filter_map(|p| p.as_deref()),
        );
        parts.join("\n")
    }

    /// Format as "file:line:column" string when a location is known.
    #[must_use]
    pub fn location(&self) -> Option<String> {
        let file = self.file.as_ref()?;
        let mut s = file.clone();
        if let Some(line) = self.line {
            s.push_str(&format!(":{}", line));
            if let Some(col) = self.column {
                s.push_str(&format!(":{}", col));
            }
        }
        Some(s)
    }
}

/// Final path component of a `/` or `\` separated path.
pub(crate) fn basename(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

// ============================================================================
// TestResult
// ============================================================================

/// Outcome reported by the runner for one test attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    Passed,
    #[default]
    Failed,
    TimedOut,
    Skipped,
    Interrupted,
}

impl TestStatus {
    /// Parse a runner status string; unrecognized strings count as failed.
    #[must_use]
    pub fn from_runner(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "passed" | "expected" | "ok" => Self::Passed,
            "timedout" | "timed_out" | "timeout" => Self::TimedOut,
            "skipped" | "pending" => Self::Skipped,
            "interrupted" => Self::Interrupted,
            _ => Self::Failed,
        }
    }
}

/// One test as reported by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Runner project, usually the browser name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
}

impl TestResult {
    pub fn new(title: impl Into<String>, status: TestStatus) -> Self {
        Self {
            title: title.into(),
            file: None,
            line: None,
            project: None,
            status,
            duration_ms: None,
            retry: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: TestError) -> Self {
        self.error = Some(error);
        self
    }

    /// A result counts as a failure when it carries an error or did not
    /// pass/skip.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
            || matches!(
                self.status,
                TestStatus::Failed | TestStatus::TimedOut | TestStatus::Interrupted
            )
    }
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
