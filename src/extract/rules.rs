//! Ordered categorization rules.
//!
//! Rules are tried top to bottom and the first match wins. The order is a
//! precedence policy: `Module not found: Can't resolve 'fs'` must land in
//! `browser_compat` before the generic import rule sees it, and
//! `page.goto: Timeout 30000ms exceeded` is a timeout before it is a
//! navigation failure.
//!
//! This list is deliberately independent of the pattern database used by
//! [`crate::matcher::PatternMatcher`], which scores every pattern instead
//! of stopping at the first hit.

use regex::{Captures, Regex, RegexBuilder};
use tracing::warn;

use crate::types::Category;

/// Builds a cleaner message from a rule's captures and the full text.
pub type MessageExtractor = fn(&Captures<'_>, &str) -> Option<String>;

/// One ordered categorization rule.
pub struct ExtractionRule {
    category: Category,
    regex: Regex,
    extractor: MessageExtractor,
}

impl std::fmt::Debug for ExtractionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionRule")
            .field("category", &self.category)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

impl ExtractionRule {
    /// Compile a rule. Patterns are case-insensitive; `None` if the pattern
    /// does not compile.
    #[must_use]
    pub fn new(category: Category, pattern: &str, extractor: MessageExtractor) -> Option<Self> {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => Some(Self {
                category,
                regex,
                extractor,
            }),
            Err(e) => {
                warn!("Skipping extraction rule {:?}: {}", pattern, e);
                None
            }
        }
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Run the rule's extractor, if the rule matches.
    #[must_use]
    pub fn extract(&self, text: &str) -> Option<String> {
        let caps = self.regex.captures(text)?;
        (self.extractor)(&caps, text).filter(|m| !m.trim().is_empty())
    }
}

// ============================================================================
// Extractors
// ============================================================================

/// The whole line containing the match, without a leading `Error: `.
fn matched_line(caps: &Captures<'_>, text: &str) -> Option<String> {
    let m = caps.get(0)?;
    let start = text[..m.start()].rfind('\n').map_or(0, |i| i + 1);
    let end = text[m.end()..]
        .find('\n')
        .map_or(text.len(), |i| m.end() + i);
    let line = text[start..end].trim();
    Some(
        line.strip_prefix("Error: ")
            .unwrap_or(line)
            .trim()
            .to_string(),
    )
}

fn group(caps: &Captures<'_>, idx: usize) -> Option<String> {
    caps.get(idx)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn timeout_message(caps: &Captures<'_>, text: &str) -> Option<String> {
    match group(caps, 1) {
        Some(ms) => Some(format!("Timeout {}ms exceeded", ms)),
        None => matched_line(caps, text),
    }
}

fn node_builtin_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|m| format!("Node built-in '{}' bundled for the browser", m))
}

fn node_global_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|g| format!("Node global '{}' is not defined in the browser", g))
}

fn network_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|code| format!("Network error: {}", code))
}

fn navigation_message(caps: &Captures<'_>, text: &str) -> Option<String> {
    match group(caps, 1) {
        Some(reason) => Some(format!("Navigation failed: {}", reason)),
        None => matched_line(caps, text),
    }
}

fn element_not_found_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|sel| format!("Element not found: {}", sel))
}

fn strict_mode_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|detail| format!("Ambiguous locator: {}", detail))
}

fn expect_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    let subject = group(caps, 1)?;
    let matcher = group(caps, 2)?;
    Some(format!("Assertion failed: expect({}).{}", subject, matcher))
}

fn assertion_error_message(caps: &Captures<'_>, text: &str) -> Option<String> {
    match group(caps, 1) {
        Some(detail) => Some(format!("Assertion failed: {}", detail)),
        None => matched_line(caps, text),
    }
}

fn query_failed_message(caps: &Captures<'_>, text: &str) -> Option<String> {
    match group(caps, 1) {
        Some(detail) => Some(format!("Database query failed: {}", detail)),
        None => matched_line(caps, text),
    }
}

fn missing_relation_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|rel| format!("Missing table: {}", rel))
}

fn missing_module_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|module| format!("Cannot find module '{}'", module))
}

fn unresolved_import_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    group(caps, 1).map(|module| format!("Cannot resolve import '{}'", module))
}

fn server_status_message(caps: &Captures<'_>, text: &str) -> Option<String> {
    match group(caps, 1) {
        Some(status) => Some(format!("Server responded with {}", status)),
        None => matched_line(caps, text),
    }
}

fn js_error_message(caps: &Captures<'_>, _text: &str) -> Option<String> {
    let kind = group(caps, 1)?;
    let detail = group(caps, 2)?;
    Some(format!("{}: {}", kind, detail))
}

// ============================================================================
// Default Rule Set
// ============================================================================

/// The built-in ordered rule set.
#[must_use]
pub fn default_rules() -> Vec<ExtractionRule> {
    // Ordered from most specific to least specific.
    let rules: Vec<Option<ExtractionRule>> = vec![
        // Node-only code in the browser (before import + runtime)
        ExtractionRule::new(
            Category::BrowserCompat,
            r"\S+\s+cannot be used in the browser",
            matched_line,
        ),
        ExtractionRule::new(
            Category::BrowserCompat,
            r"Module not found:\s*(?:Error:\s*)?Can't resolve '(fs|path|os|crypto|net|tls|child_process|stream|zlib|http|https)'",
            node_builtin_message,
        ),
        ExtractionRule::new(
            Category::BrowserCompat,
            r"\b(process|Buffer|require|__dirname|__filename|global) is not defined",
            node_global_message,
        ),
        // Timeouts (before navigation and selectors)
        ExtractionRule::new(
            Category::Timeout,
            r"(?:test\s+)?timeout(?:\s+of)?\s+(\d+)\s*ms\s+exceeded",
            timeout_message,
        ),
        ExtractionRule::new(
            Category::Timeout,
            r"exceeded (?:the )?timeout of (\d+)\s*ms",
            timeout_message,
        ),
        ExtractionRule::new(
            Category::Timeout,
            r"timed out after (\d+)\s*ms",
            timeout_message,
        ),
        ExtractionRule::new(Category::Timeout, r"TimeoutError|\btimed out\b", timeout_message),
        // Network
        ExtractionRule::new(Category::Network, r"net::(ERR_[A-Z_]+)", network_message),
        ExtractionRule::new(
            Category::Network,
            r"\b(ECONNREFUSED|ECONNRESET|ENOTFOUND|ETIMEDOUT|EAI_AGAIN|EPIPE)\b",
            network_message,
        ),
        ExtractionRule::new(
            Category::Network,
            r"(fetch failed|Failed to fetch|NetworkError|socket hang up)",
            network_message,
        ),
        // Navigation
        ExtractionRule::new(Category::Navigation, r"page\.goto:\s*([^\n]+)", navigation_message),
        ExtractionRule::new(
            Category::Navigation,
            r"navigation (?:failed|interrupted)|frame was detached|Target page, context or browser has been closed",
            navigation_message,
        ),
        // Selectors
        ExtractionRule::new(
            Category::Selector,
            r"waiting for ((?:locator|getBy\w+)\([^\n]*\))",
            element_not_found_message,
        ),
        ExtractionRule::new(
            Category::Selector,
            r#"waiting for selector "([^"]+)""#,
            element_not_found_message,
        ),
        ExtractionRule::new(
            Category::Selector,
            r"strict mode violation:\s*([^\n]+)",
            strict_mode_message,
        ),
        ExtractionRule::new(
            Category::Selector,
            r"(?:element|node) is not (?:attached|visible|stable)|no elements? (?:found|matching)",
            matched_line,
        ),
        // Assertions
        ExtractionRule::new(
            Category::Assertion,
            r"expect\(([^\n]*?)\)\.((?:not\.)?\w+)",
            expect_message,
        ),
        ExtractionRule::new(
            Category::Assertion,
            r"AssertionError:?[ \t]*([^\n]*)",
            assertion_error_message,
        ),
        ExtractionRule::new(
            Category::Assertion,
            r"expected [^\n]+ to (?:be|equal|have|contain)",
            matched_line,
        ),
        // Auth
        ExtractionRule::new(
            Category::Auth,
            r"(?:status(?: code)?|HTTP)\s*(?:40[13])\b|\b40[13] (?:Unauthorized|Forbidden)|unauthori[sz]ed|\bforbidden\b|invalid credentials|authentication failed|session (?:has )?expired",
            matched_line,
        ),
        // Database
        ExtractionRule::new(
            Category::Database,
            r"QueryFailedError:?[ \t]*([^\n]*)",
            query_failed_message,
        ),
        ExtractionRule::new(
            Category::Database,
            r#"relation "([^"]+)" does not exist"#,
            missing_relation_message,
        ),
        ExtractionRule::new(
            Category::Database,
            r"duplicate key value violates unique constraint|\bSQLITE_[A-Z]+|\bER_[A-Z_]+|EntityMetadataNotFound(?:Error)?|DataSource is not initialized|Connection terminated unexpectedly|deadlock detected",
            matched_line,
        ),
        // Module resolution
        ExtractionRule::new(
            Category::Import,
            r"Cannot find module '([^']+)'",
            missing_module_message,
        ),
        ExtractionRule::new(
            Category::Import,
            r#"Failed to resolve import "([^"]+)""#,
            unresolved_import_message,
        ),
        ExtractionRule::new(
            Category::Import,
            r"Module not found|Cannot use import statement outside a module|does not provide an export named|ERR_REQUIRE_ESM",
            matched_line,
        ),
        // Server
        ExtractionRule::new(
            Category::Server,
            r"(?:status(?: code)?|HTTP)\s*(5\d\d)\b",
            server_status_message,
        ),
        ExtractionRule::new(
            Category::Server,
            r"Internal Server Error|Bad Gateway|Service Unavailable|Gateway Timeout",
            server_status_message,
        ),
        // Uncaught runtime errors (last - most general)
        ExtractionRule::new(
            Category::Runtime,
            r"(TypeError|ReferenceError|RangeError|SyntaxError):[ \t]*([^\n]+)",
            js_error_message,
        ),
        ExtractionRule::new(
            Category::Runtime,
            r"Cannot read propert(?:y|ies) of (?:undefined|null)|is not a function",
            matched_line,
        ),
    ];

    rules.into_iter().flatten().collect()
}
