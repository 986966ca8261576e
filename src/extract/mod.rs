//! Raw test-runner output → structured failure records.
//!
//! Parsing follows the same JSON-first, text-second order as any reporter
//! consumer:
//!
//! 1. **JSON** - Playwright's JSON reporter (`suites → specs → tests →
//!    results`), or a flat list of `{ title, status, error }` objects.
//! 2. **Text** - list-reporter failure blocks headed `  1) [project] ›
//!    file:line:col › title`.
//! 3. **Fallback** - a single `unknown` failure wrapping the raw text.
//!
//! Nothing in this module returns an error. Bad input degrades; it never
//! aborts the run.
//!
//! # Example
//!
//! ```rust
//! use e2e_triage::extract::ErrorExtractor;
//! use e2e_triage::types::Category;
//!
//! let extractor = ErrorExtractor::new();
//! assert_eq!(extractor.categorize("Timeout 5000ms exceeded"), Category::Timeout);
//!
//! let error = extractor.extract_details("Error: Timeout 5000ms exceeded.\n    at /app/a.spec.ts:3:9");
//! assert_eq!(error.message, "Timeout 5000ms exceeded");
//! assert_eq!(error.line, Some(3));
//! ```

pub mod context;
pub mod rules;
pub mod stack;

pub use context::{slugify, ContextLocator};
pub use rules::{default_rules, ExtractionRule};
pub use stack::{StackFrame, StackParser};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::types::{Category, TestError, TestResult, TestStatus};

/// Title used when the input could not be attributed to any test.
pub const UNKNOWN_TEST_TITLE: &str = "unknown";

/// Separator between title path segments.
const TITLE_SEPARATOR: &str = " › ";

// ============================================================================
// Error Extractor
// ============================================================================

/// Parses runner output and classifies failure text.
#[derive(Debug)]
pub struct ErrorExtractor {
    rules: Vec<ExtractionRule>,
    stack: StackParser,
    ansi: Regex,
    error_line: Regex,
    snippet_line: Regex,
    failure_header: Regex,
    summary_line: Regex,
    location: Regex,
}

impl Default for ErrorExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorExtractor {
    /// Create an extractor with the built-in ordered rules.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    /// Create an extractor with a custom ordered rule list.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn with_rules(rules: Vec<ExtractionRule>) -> Self {
        Self {
            rules,
            stack: StackParser::new(),
            ansi: Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ansi regex"),
            error_line: Regex::new(r"(?m)^\s*(?:[A-Za-z]*Error)(?:\s*\[[^\]]*\])?:\s*\S.*$")
                .expect("valid error line regex"),
            snippet_line: Regex::new(r"^\s*(?:>\s*)?\d*\s*\|").expect("valid snippet regex"),
            failure_header: Regex::new(r"^\s*(\d+)\)\s+(?:\[([^\]]+)\]\s+(?:›|>)\s+)?(.+?)[\s─-]*$")
                .expect("valid header regex"),
            summary_line: Regex::new(
                r"^\s*\d+\s+(?:failed|passed|flaky|skipped|did not run|interrupted)\b",
            )
            .expect("valid summary regex"),
            location: Regex::new(r"^(.+?):(\d+)(?::(\d+))?$").expect("valid location regex"),
        }
    }

    /// The ordered rules, in precedence order.
    #[must_use]
    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    /// Remove ANSI colour escapes.
    #[must_use]
    pub fn strip_ansi(&self, text: &str) -> String {
        self.ansi.replace_all(text, "").into_owned()
    }

    // ------------------------------------------------------------------------
    // Categorization
    // ------------------------------------------------------------------------

    /// First-match-wins category for `text`; `unknown` when no rule fires.
    #[must_use]
    pub fn categorize(&self, text: &str) -> Category {
        let text = self.strip_ansi(text);
        self.rules
            .iter()
            .find(|r| r.is_match(&text))
            .map_or(Category::Unknown, |r| r.category())
    }

    /// Build a full `TestError` from free-form failure text.
    ///
    /// The message is the first matching rule's synthesized message, else
    /// the first `...Error: ...` line, else the first non-empty line.
    #[must_use]
    pub fn extract_details(&self, text: &str) -> TestError {
        let text = self.strip_ansi(text);

        let (category, synthesized) = self
            .rules
            .iter()
            .find(|r| r.is_match(&text))
            .map_or((Category::Unknown, None), |r| (r.category(), r.extract(&text)));

        let message = synthesized
            .or_else(|| {
                self.error_line
                    .find(&text)
                    .map(|m| m.as_str().trim().to_string())
            })
            .unwrap_or_else(|| first_line(&text));

        let mut error = TestError::new(message).with_category(category);
        if let Some(stack) = self.stack.stack_lines(&text) {
            error = error.with_stack(stack);
        }
        if let Some(frame) = self.stack.locate(&text) {
            error.file = Some(frame.file);
            error.line = frame.line;
            error.column = frame.column;
        }
        if let Some(snippet) = self.snippet(&text) {
            error = error.with_snippet(snippet);
        }
        error
    }

    fn snippet(&self, text: &str) -> Option<String> {
        let lines: Vec<&str> = text
            .lines()
            .filter(|l| self.snippet_line.is_match(l))
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    // ------------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------------

    /// Parse raw runner output into test results. Never fails.
    ///
    /// Blank input yields no results. Input that neither parses as a known
    /// JSON shape nor contains failure blocks yields one failed result
    /// titled [`UNKNOWN_TEST_TITLE`] whose error wraps the raw text with
    /// category `unknown`.
    #[must_use]
    pub fn parse(&self, raw: &str) -> Vec<TestResult> {
        if raw.trim().is_empty() {
            return Vec::new();
        }

        if let Ok(json) = serde_json::from_str::<Value>(raw) {
            if let Some(results) = self.parse_json(&json) {
                debug!("Parsed {} results from JSON report", results.len());
                return results;
            }
            debug!("JSON input has no recognizable report shape, trying text");
        }

        let results = self.parse_text(raw);
        if !results.is_empty() {
            debug!("Parsed {} failures from text output", results.len());
            return results;
        }

        debug!("No structure found in runner output, wrapping raw text");
        let text = self.strip_ansi(raw);
        vec![TestResult::new(UNKNOWN_TEST_TITLE, TestStatus::Failed)
            .with_error(TestError::new(text.trim()).with_category(Category::Unknown))]
    }

    /// Parse a JSON report. `None` when the value has no recognizable shape.
    #[must_use]
    pub fn parse_json(&self, json: &Value) -> Option<Vec<TestResult>> {
        if let Some(suites) = json.get("suites").and_then(Value::as_array) {
            let mut results = Vec::new();
            for suite in suites {
                self.walk_suite(suite, &[], &mut results);
            }
            return Some(results);
        }

        let entries = json
            .as_array()
            .or_else(|| json.get("results").and_then(Value::as_array))
            .or_else(|| json.get("tests").and_then(Value::as_array))?;

        let results: Vec<TestResult> = entries
            .iter()
            .filter_map(|entry| self.parse_flat_entry(entry))
            .collect();
        if results.is_empty() {
            None
        } else {
            Some(results)
        }
    }

    fn walk_suite(&self, suite: &Value, parents: &[String], out: &mut Vec<TestResult>) {
        let mut path = parents.to_vec();
        let title = str_field(suite, "title").unwrap_or_default();
        let file = str_field(suite, "file");
        // File-level suites are titled with their file name; that is not
        // part of the test's title path.
        if !title.is_empty() && Some(&title) != file.as_ref() {
            path.push(title);
        }

        for spec in array_field(suite, "specs") {
            self.parse_spec(spec, &path, out);
        }
        for child in array_field(suite, "suites") {
            self.walk_suite(child, &path, out);
        }
    }

    fn parse_spec(&self, spec: &Value, parents: &[String], out: &mut Vec<TestResult>) {
        let mut path = parents.to_vec();
        if let Some(title) = str_field(spec, "title") {
            path.push(title);
        }
        let title = path.join(TITLE_SEPARATOR);
        let file = str_field(spec, "file");
        let line = u32_field(spec, "line");

        for test in array_field(spec, "tests") {
            let project = str_field(test, "projectName");
            for result in array_field(test, "results") {
                let status = str_field(result, "status")
                    .map_or(TestStatus::Failed, |s| TestStatus::from_runner(&s));
                let mut parsed = TestResult::new(title.clone(), status)
                    .with_retry(u32_field(result, "retry").unwrap_or(0));
                if let Some(ref f) = file {
                    parsed = parsed.with_file(f.clone());
                }
                if let Some(l) = line {
                    parsed = parsed.with_line(l);
                }
                if let Some(ref p) = project {
                    parsed = parsed.with_project(p.clone());
                }
                if let Some(d) = result.get("duration").and_then(Value::as_u64) {
                    parsed = parsed.with_duration(d);
                }

                let error_value = result
                    .get("error")
                    .filter(|e| !e.is_null())
                    .or_else(|| array_field(result, "errors").first());
                if let Some(err) = error_value {
                    let mut error = self.error_from_json(err);
                    if let Some(shot) = screenshot_attachment(result) {
                        error = error.with_screenshot(shot);
                    }
                    parsed = parsed.with_error(error);
                }
                out.push(parsed);
            }
        }
    }

    fn parse_flat_entry(&self, entry: &Value) -> Option<TestResult> {
        let title = str_field(entry, "title").or_else(|| str_field(entry, "name"))?;
        let status = str_field(entry, "status").map_or_else(
            || {
                if entry.get("error").is_some_and(|e| !e.is_null()) {
                    TestStatus::Failed
                } else {
                    TestStatus::Passed
                }
            },
            |s| TestStatus::from_runner(&s),
        );
        let mut result = TestResult::new(title, status);
        if let Some(file) = str_field(entry, "file") {
            result = result.with_file(file);
        }
        if let Some(err) = entry.get("error").filter(|e| !e.is_null()) {
            result = result.with_error(self.error_from_json(err));
        }
        Some(result)
    }

    /// Build a `TestError` from a JSON error value (object or string).
    fn error_from_json(&self, value: &Value) -> TestError {
        let Some(obj) = value.as_object() else {
            return self.extract_details(value.as_str().unwrap_or_default());
        };

        let message = obj.get("message").and_then(Value::as_str).unwrap_or_default();
        let stack = obj.get("stack").and_then(Value::as_str);
        let text = match stack {
            // Stacks usually repeat the message as their first line.
            Some(s) if s.contains(message) => s.to_string(),
            Some(s) => format!("{}\n{}", message, s),
            None => message.to_string(),
        };
        let mut error = self.extract_details(&text);

        if let Some(loc) = obj.get("location") {
            if let Some(file) = str_field(loc, "file") {
                error.file = Some(file);
                error.line = u32_field(loc, "line");
                error.column = u32_field(loc, "column");
            }
        }
        if let Some(snippet) = obj.get("snippet").and_then(Value::as_str) {
            let snippet = self.strip_ansi(snippet);
            if !snippet.trim().is_empty() {
                error = error.with_snippet(snippet);
            }
        }
        error
    }

    /// Parse list-reporter text into failed results.
    #[must_use]
    pub fn parse_text(&self, raw: &str) -> Vec<TestResult> {
        let text = self.strip_ansi(raw);
        let mut results = Vec::new();
        let mut current: Option<(TestResult, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some(caps) = self.failure_header.captures(line) {
                if let Some((result, body)) = current.take() {
                    results.push(self.finish_block(result, &body));
                }
                let header = caps.get(3).map_or("", |m| m.as_str());
                let mut result = self.result_from_header(header);
                if let Some(project) = caps.get(2) {
                    result = result.with_project(project.as_str());
                }
                current = Some((result, Vec::new()));
                continue;
            }

            if self.summary_line.is_match(line) {
                if let Some((result, body)) = current.take() {
                    results.push(self.finish_block(result, &body));
                }
                continue;
            }

            if let Some((_, ref mut body)) = current {
                body.push(line);
            }
        }
        if let Some((result, body)) = current.take() {
            results.push(self.finish_block(result, &body));
        }
        results
    }

    fn result_from_header(&self, header: &str) -> TestResult {
        let segments: Vec<&str> = header
            .split(['›', '>'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut file = None;
        let mut line = None;
        let mut title_parts = Vec::new();
        for seg in segments {
            match self.location.captures(seg) {
                Some(caps) if file.is_none() => {
                    file = caps.get(1).map(|m| m.as_str().to_string());
                    line = caps.get(2).and_then(|m| m.as_str().parse().ok());
                }
                _ => title_parts.push(seg),
            }
        }

        let title = if title_parts.is_empty() {
            header.trim().to_string()
        } else {
            title_parts.join(TITLE_SEPARATOR)
        };
        let mut result = TestResult::new(title, TestStatus::Failed);
        if let Some(f) = file {
            result = result.with_file(f);
        }
        if let Some(l) = line {
            result = result.with_line(l);
        }
        result
    }

    fn finish_block(&self, result: TestResult, body: &[&str]) -> TestResult {
        let text = body.join("\n");
        if text.trim().is_empty() {
            return result;
        }
        let mut result = result;
        if text.contains("Test timeout of") {
            result.status = TestStatus::TimedOut;
        }
        result.with_error(self.extract_details(&text))
    }

    // ------------------------------------------------------------------------
    // Failures
    // ------------------------------------------------------------------------

    /// The failing results as `(title, error)` pairs.
    ///
    /// Failures the runner reported without any error text get a synthesized
    /// error so they are still counted.
    #[must_use]
    pub fn failures(&self, results: &[TestResult]) -> Vec<(String, TestError)> {
        results
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| {
                let error = match (&r.error, r.status) {
                    (Some(e), _) => e.clone(),
                    (None, TestStatus::TimedOut) => {
                        TestError::new("Test timeout exceeded").with_category(Category::Timeout)
                    }
                    (None, _) => TestError::new("Test failed without an error message"),
                };
                (r.title.clone(), error)
            })
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Unknown error")
        .to_string()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn u32_field(value: &Value, key: &str) -> Option<u32> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn screenshot_attachment(result: &Value) -> Option<String> {
    array_field(result, "attachments")
        .iter()
        .find(|a| {
            str_field(a, "name").as_deref() == Some("screenshot")
                || str_field(a, "contentType").as_deref() == Some("image/png")
        })
        .and_then(|a| str_field(a, "path"))
}
