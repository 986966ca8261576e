//! End-to-end analysis of one test run.
//!
//! ```text
//! raw output ─► extract ─► enrich ─► deduplicate ─► match ─► aggregate ─► report
//! ```
//!
//! Matching and aggregation run over the *unique* errors, so the category
//! counts in a report are counts of distinct failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{ActionItem, AggregatedCategories, AiSummary, CategoryAggregator};
use crate::config::TriageConfig;
use crate::error::Result;
use crate::extract::{ContextLocator, ErrorExtractor};
use crate::fingerprint::{DeduplicationResult, Fingerprinter};
use crate::matcher::{ErrorMatch, PatternMatcher};
use crate::types::{Category, TestError};

// ============================================================================
// Report
// ============================================================================

/// Counts from the deduplication stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationStats {
    pub total_count: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
    pub deduplication_ratio: f64,
}

impl From<&DeduplicationResult> for DeduplicationStats {
    fn from(result: &DeduplicationResult) -> Self {
        Self {
            total_count: result.total_count,
            unique_count: result.unique_count,
            duplicate_count: result.duplicate_count,
            deduplication_ratio: result.deduplication_ratio,
        }
    }
}

/// One fingerprint group, without the repeated error bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub short_hash: String,
    pub category: Category,
    pub normalized_message: String,
    pub count: usize,
    pub test_names: Vec<String>,
}

/// Everything learned from one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_tests: usize,
    pub failed_tests: usize,
    /// Compact status line, e.g. `X:5|BC:3@AF|TO:2`.
    pub status: String,
    pub deduplication: DeduplicationStats,
    pub groups: Vec<GroupSummary>,
    /// Pattern matches for each unique error.
    pub matches: Vec<ErrorMatch>,
    pub aggregated: AggregatedCategories,
    pub action_items: Vec<ActionItem>,
    pub summary: AiSummary,
    pub clusters: Vec<Vec<TestError>>,
}

impl AnalysisReport {
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write this report as pretty JSON to `path`, creating parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Json` on failure.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        info!("Report written to {}", path.display());
        Ok(())
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Runs every stage over raw runner output.
#[derive(Debug)]
pub struct Analyzer {
    extractor: ErrorExtractor,
    fingerprinter: Fingerprinter,
    matcher: PatternMatcher,
    aggregator: CategoryAggregator,
    locator: Option<ContextLocator>,
    cluster_threshold: f64,
}

impl Analyzer {
    /// Build an analyzer around an already-loaded matcher.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the config does not validate.
    pub fn new(matcher: PatternMatcher, config: &TriageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor: ErrorExtractor::new(),
            fingerprinter: Fingerprinter::new(),
            matcher,
            aggregator: CategoryAggregator::new().with_fix_command(config.fix_command.clone()),
            locator: config.context_locator()?,
            cluster_threshold: config.cluster_threshold,
        })
    }

    /// Build an analyzer, loading the configured pattern database or the
    /// built-in one.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern database cannot be loaded or the
    /// config does not validate.
    pub fn from_config(config: &TriageConfig) -> Result<Self> {
        let matcher = match config.patterns_path {
            Some(ref path) => PatternMatcher::from_path(path)?,
            None => PatternMatcher::builtin()?,
        };
        Self::new(matcher, config)
    }

    #[must_use]
    pub fn extractor(&self) -> &ErrorExtractor {
        &self.extractor
    }

    #[must_use]
    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    #[must_use]
    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    #[must_use]
    pub fn aggregator(&self) -> &CategoryAggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn cluster_threshold(&self) -> f64 {
        self.cluster_threshold
    }

    /// Extract failures and attach companion context.
    ///
    /// Returns the number of parsed results alongside the failing titles and
    /// their errors, index-aligned.
    #[must_use]
    pub fn collect_errors(&self, raw: &str) -> (usize, Vec<String>, Vec<TestError>) {
        let results = self.extractor.parse(raw);
        let failures = self.extractor.failures(&results);
        debug!(
            "Extracted {} failures from {} results",
            failures.len(),
            results.len()
        );

        let (titles, errors) = failures
            .into_iter()
            .map(|(title, error)| {
                let error = match self.locator {
                    Some(ref locator) => locator.enrich(&title, error),
                    None => error,
                };
                (title, error)
            })
            .unzip();
        (results.len(), titles, errors)
    }

    /// Analyze one run's raw output.
    #[must_use]
    pub fn analyze(&self, raw: &str) -> AnalysisReport {
        let (total_tests, titles, errors) = self.collect_errors(raw);
        let dedup = self.fingerprinter.deduplicate(&errors, Some(&titles));

        let matches = self.matcher.match_all(&dedup.unique);
        let matched = matches.iter().filter(|m| m.best_match.is_some()).count();
        debug!("{} of {} unique errors matched a pattern", matched, matches.len());

        let aggregated = self.aggregator.aggregate(&matches);
        let action_items = self.aggregator.generate_action_items(&aggregated);
        let clusters = self
            .fingerprinter
            .find_clusters(&dedup.unique, self.cluster_threshold);

        let groups = dedup
            .groups
            .iter()
            .map(|g| GroupSummary {
                short_hash: g.fingerprint.short_hash.clone(),
                category: g.fingerprint.category,
                normalized_message: g.fingerprint.normalized_message.clone(),
                count: g.count,
                test_names: g.test_names.clone(),
            })
            .collect();

        AnalysisReport {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            total_tests,
            failed_tests: errors.len(),
            status: self.aggregator.compact_status(&aggregated),
            deduplication: DeduplicationStats::from(&dedup),
            groups,
            matches,
            summary: self.aggregator.ai_summary(&aggregated),
            aggregated,
            action_items,
            clusters,
        }
    }
}
