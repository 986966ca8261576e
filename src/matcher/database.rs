//! Pattern database file format.
//!
//! ```json
//! {
//!   "version": "1.0.0",
//!   "patterns": [
//!     {
//!       "id": "typeorm-in-browser",
//!       "name": "TypeORM bundled into the client",
//!       "category": "browser_compat",
//!       "severity": "critical",
//!       "patterns": ["getRepository cannot be used in the browser"],
//!       "rootCause": "Server-only data access imported by a client component",
//!       "fixAvailable": true
//!     }
//!   ]
//! }
//! ```
//!
//! Field names are camelCase; snake_case spellings are accepted as aliases.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{IntoTriageError, Result, TriageError};
use crate::types::{Category, Severity};

/// The database shipped with the binary.
const BUILTIN_DATABASE: &str = include_str!("../../patterns/default.json");

/// One known failure pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDefinition {
    pub id: String,
    pub name: String,
    /// Free-form category string, mapped with [`Category::from_pattern_category`].
    pub category: String,
    #[serde(default)]
    pub severity: Severity,
    /// Regex sources, compiled case-insensitively.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(alias = "root_cause")]
    pub root_cause: String,
    #[serde(default, alias = "fix_available")]
    pub fix_available: bool,
    #[serde(default, alias = "fix_template", skip_serializing_if = "Option::is_none")]
    pub fix_template: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, alias = "import_trace_required")]
    pub import_trace_required: bool,
    #[serde(default, alias = "semantic_code", skip_serializing_if = "Option::is_none")]
    pub semantic_code: Option<String>,
}

impl PatternDefinition {
    /// Create a pattern with the required fields; everything else defaults.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        root_cause: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            severity: Severity::default(),
            patterns: Vec::new(),
            root_cause: root_cause.into(),
            fix_available: false,
            fix_template: None,
            suggestions: Vec::new(),
            import_trace_required: false,
            semantic_code: None,
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, source: impl Into<String>) -> Self {
        self.patterns.push(source.into());
        self
    }

    /// Mark the pattern as automatically fixable.
    #[must_use]
    pub fn with_fix(mut self, template: Option<String>) -> Self {
        self.fix_available = true;
        self.fix_template = template;
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// The canonical category for this pattern.
    #[must_use]
    pub fn resolved_category(&self) -> Category {
        Category::from_pattern_category(&self.category)
    }
}

/// A versioned list of patterns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternDatabase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub patterns: Vec<PatternDefinition>,
}

impl PatternDatabase {
    /// Parse a database from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `PatternDatabase` if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).into_triage_patterns()
    }

    /// Load a database file.
    ///
    /// # Errors
    ///
    /// Returns `MissingFile` if the path does not exist and
    /// `PatternDatabase` if it cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TriageError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            TriageError::pattern_database_with_path(e.to_string(), path.to_path_buf())
        })?;
        let db: Self = serde_json::from_str(&content).map_err(|e| {
            TriageError::pattern_database_with_path(e.to_string(), path.to_path_buf())
        })?;
        debug!(
            "Loaded {} patterns from {}",
            db.patterns.len(),
            path.display()
        );
        Ok(db)
    }

    /// The database compiled into the binary.
    ///
    /// # Errors
    ///
    /// Only if the embedded file is malformed, which the test suite rules out.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_DATABASE)
    }
}
