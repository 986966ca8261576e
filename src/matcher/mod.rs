//! Confidence-scored matching against the pattern database.
//!
//! Unlike the extractor's first-match rules, the matcher scores *every*
//! pattern against an error and reports all of them above the threshold,
//! best first.
//!
//! For a pattern with `n` regexes, `k` of which match the error text:
//!
//! ```text
//! ratio      = k / n
//! strength   = Σ len(match) / len(text)        over matching regexes
//! confidence = ratio * 0.7 + min(strength, 0.3)
//! confidence = min(confidence * 1.2, 1)        if k > 1
//! confidence = min(confidence * 1.1, 1)        if critical and k >= 1
//! ```
//!
//! rounded to two decimals; only confidences above 0.3 are reported.

pub mod database;

pub use database::{PatternDatabase, PatternDefinition};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, TriageError};
use crate::types::{round2, Category, Severity, TestError};

/// Matches at or below this confidence are discarded.
pub const MIN_CONFIDENCE: f64 = 0.3;

const RATIO_WEIGHT: f64 = 0.7;
const MAX_STRENGTH: f64 = 0.3;
const MULTI_MATCH_BOOST: f64 = 1.2;
const CRITICAL_BOOST: f64 = 1.1;

// ============================================================================
// Match Types
// ============================================================================

/// One pattern's verdict on one error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatch {
    pub pattern_id: String,
    pub name: String,
    pub category: Category,
    pub severity: Severity,
    pub confidence: f64,
    pub root_cause: String,
    pub fix_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_template: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_code: Option<String>,
}

impl PatternMatch {
    fn from_definition(def: &PatternDefinition, confidence: f64) -> Self {
        Self {
            pattern_id: def.id.clone(),
            name: def.name.clone(),
            category: def.resolved_category(),
            severity: def.severity,
            confidence,
            root_cause: def.root_cause.clone(),
            fix_available: def.fix_available,
            fix_template: def.fix_template.clone(),
            suggestions: def.suggestions.clone(),
            semantic_code: def.semantic_code.clone(),
        }
    }
}

/// All matches for one error, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMatch {
    pub error: TestError,
    pub matches: Vec<PatternMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_match: Option<PatternMatch>,
}

impl ErrorMatch {
    /// The best match's category, else the extractor's.
    #[must_use]
    pub fn resolved_category(&self) -> Category {
        self.best_match
            .as_ref()
            .map_or(self.error.category, |m| m.category)
    }
}

// ============================================================================
// Compiled Patterns
// ============================================================================

/// A definition with its regexes compiled.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    definition: PatternDefinition,
    regexes: Vec<Regex>,
}

impl CompiledPattern {
    /// Compile every source case-insensitively. A source that does not
    /// compile is matched as an escaped literal instead.
    #[must_use]
    pub fn compile(definition: PatternDefinition) -> Self {
        let regexes = definition
            .patterns
            .iter()
            .filter_map(|source| compile_source(&definition.id, source))
            .collect();
        Self {
            definition,
            regexes,
        }
    }

    #[must_use]
    pub fn definition(&self) -> &PatternDefinition {
        &self.definition
    }

    /// Confidence that this pattern explains `text`, before thresholding.
    #[must_use]
    pub fn score(&self, text: &str) -> f64 {
        let text_len = text.chars().count();
        let mut matched = 0usize;
        let mut strength = 0.0;

        for regex in &self.regexes {
            if let Some(m) = regex.find(text) {
                matched += 1;
                if text_len > 0 {
                    strength += m.as_str().chars().count() as f64 / text_len as f64;
                }
            }
        }

        let total = self.definition.patterns.len();
        let ratio = if total == 0 {
            0.0
        } else {
            matched as f64 / total as f64
        };

        let mut confidence = ratio * RATIO_WEIGHT + strength.min(MAX_STRENGTH);
        if matched > 1 {
            confidence = (confidence * MULTI_MATCH_BOOST).min(1.0);
        }
        if self.definition.severity == Severity::Critical && matched >= 1 {
            confidence = (confidence * CRITICAL_BOOST).min(1.0);
        }
        round2(confidence)
    }
}

fn compile_source(pattern_id: &str, source: &str) -> Option<Regex> {
    let build = |s: &str| RegexBuilder::new(s).case_insensitive(true).build();
    match build(source) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(
                "Pattern {} has invalid regex {:?} ({}), matching it literally",
                pattern_id, source, e
            );
            build(&regex::escape(source)).ok()
        }
    }
}

// ============================================================================
// Pattern Matcher
// ============================================================================

/// Scores errors against an owned pattern database.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    version: Option<String>,
    patterns: Vec<CompiledPattern>,
    index: HashMap<String, usize>,
}

impl PatternMatcher {
    /// Compile a database. Later duplicates of an id are ignored with a
    /// warning.
    #[must_use]
    pub fn new(db: PatternDatabase) -> Self {
        let mut matcher = Self {
            version: db.version,
            ..Self::default()
        };
        for def in db.patterns {
            if let Err(e) = matcher.add_pattern(def) {
                warn!("Ignoring pattern: {}", e);
            }
        }
        debug!("Compiled {} patterns", matcher.len());
        matcher
    }

    /// Load and compile a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or malformed.
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::new(PatternDatabase::load(path)?))
    }

    /// Compile a database from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `PatternDatabase` if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(PatternDatabase::from_json(json)?))
    }

    /// The built-in database.
    ///
    /// # Errors
    ///
    /// Only if the embedded database is malformed.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(PatternDatabase::builtin()?))
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// All definitions in insertion order.
    pub fn patterns(&self) -> impl Iterator<Item = &PatternDefinition> {
        self.patterns.iter().map(CompiledPattern::definition)
    }

    #[must_use]
    pub fn get_pattern(&self, id: &str) -> Option<&PatternDefinition> {
        self.index.get(id).map(|&i| self.patterns[i].definition())
    }

    #[must_use]
    pub fn by_category(&self, category: Category) -> Vec<&PatternDefinition> {
        self.patterns()
            .filter(|p| p.resolved_category() == category)
            .collect()
    }

    #[must_use]
    pub fn by_severity(&self, severity: Severity) -> Vec<&PatternDefinition> {
        self.patterns().filter(|p| p.severity == severity).collect()
    }

    #[must_use]
    pub fn fixable(&self) -> Vec<&PatternDefinition> {
        self.patterns().filter(|p| p.fix_available).collect()
    }

    /// Register a pattern on this matcher only.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePattern` if the id is already registered.
    pub fn add_pattern(&mut self, definition: PatternDefinition) -> Result<()> {
        if self.index.contains_key(&definition.id) {
            return Err(TriageError::DuplicatePattern { id: definition.id });
        }
        self.index.insert(definition.id.clone(), self.patterns.len());
        self.patterns.push(CompiledPattern::compile(definition));
        Ok(())
    }

    /// Score every pattern against one error.
    #[must_use]
    pub fn match_error(&self, error: &TestError) -> ErrorMatch {
        let text = error.combined_text();
        let mut matches: Vec<PatternMatch> = self
            .patterns
            .iter()
            .filter_map(|p| {
                let confidence = p.score(&text);
                (confidence > MIN_CONFIDENCE)
                    .then(|| PatternMatch::from_definition(p.definition(), confidence))
            })
            .collect();
        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        ErrorMatch {
            error: error.clone(),
            best_match: matches.first().cloned(),
            matches,
        }
    }

    #[must_use]
    pub fn match_all(&self, errors: &[TestError]) -> Vec<ErrorMatch> {
        errors.iter().map(|e| self.match_error(e)).collect()
    }
}
