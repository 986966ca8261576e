//! Best-effort V8 stack frame parsing.
//!
//! Handles the two shapes browsers and Node print:
//!
//! ```text
//!     at LoginPage.submit (/app/tests/pages/login.ts:42:13)
//!     at /app/tests/login.spec.ts:12:5
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::basename;

/// One parsed `at ...` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: Option<String>,
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl StackFrame {
    /// Frames from dependencies or the Node runtime.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.file.contains("node_modules")
            || self.file.starts_with("node:")
            || self.file.starts_with("internal/")
    }

    /// `function@basename`, with `anonymous` standing in for a missing name.
    #[must_use]
    pub fn normalized(&self) -> String {
        format!(
            "{}@{}",
            self.function.as_deref().unwrap_or("anonymous"),
            basename(&self.file)
        )
    }
}

/// Parses stack frames out of arbitrary failure text.
#[derive(Debug, Clone)]
pub struct StackParser {
    frame: Regex,
}

impl Default for StackParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StackParser {
    #[must_use]
    pub fn new() -> Self {
        // The lazy file group stretches to the last `:line(:col)` on the line,
        // so URLs with ports still parse.
        #[allow(clippy::expect_used)]
        let frame = Regex::new(
            r"^\s*at\s+(?:(?P<func>[^()]+?)\s+\()?(?P<file>[^()]+?):(?P<line>\d+)(?::(?P<col>\d+))?\)?\s*$",
        )
        .expect("valid stack frame regex");
        Self { frame }
    }

    /// Parse a single line; `None` if it is not a frame.
    #[must_use]
    pub fn parse_frame(&self, line: &str) -> Option<StackFrame> {
        let caps = self.frame.captures(line)?;
        let function = caps
            .name("func")
            .map(|m| m.as_str().trim())
            .map(|f| f.strip_prefix("async ").unwrap_or(f).trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        let file = caps.name("file")?.as_str().trim();
        let file = file.strip_prefix("file://").unwrap_or(file).to_string();
        Some(StackFrame {
            function,
            file,
            line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
            column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
        })
    }

    /// Every frame in `text`, in order.
    #[must_use]
    pub fn parse(&self, text: &str) -> Vec<StackFrame> {
        text.lines().filter_map(|l| self.parse_frame(l)).collect()
    }

    /// The raw frame lines of `text`, trimmed and newline-joined.
    #[must_use]
    pub fn stack_lines(&self, text: &str) -> Option<String> {
        let lines: Vec<&str> = text
            .lines()
            .filter(|l| self.frame.is_match(l))
            .map(str::trim)
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// The frame that best locates the failure: the first frame outside
    /// dependencies, else the first frame.
    #[must_use]
    pub fn locate(&self, text: &str) -> Option<StackFrame> {
        let frames = self.parse(text);
        frames
            .iter()
            .find(|f| !f.is_internal())
            .or_else(|| frames.first())
            .cloned()
    }
}
