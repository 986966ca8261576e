//! Category aggregation and action item generation.
//!
//! Matched errors are grouped by their resolved category (the best match's
//! category, else the extractor's), summarized, and turned into a
//! prioritized to-do list. Lower priority values run first:
//!
//! ```text
//! priority = severity score (critical 1 .. low 4) - min(count / 20, 0.5)
//! ```
//!
//! # Example
//!
//! ```rust
//! use e2e_triage::aggregate::CategoryAggregator;
//!
//! let aggregator = CategoryAggregator::new();
//! let aggregated = aggregator.aggregate(&[]);
//! assert_eq!(aggregated.total_errors, 0);
//! assert_eq!(aggregator.compact_status(&aggregated), "P:0/0");
//! ```

use serde::{Deserialize, Serialize};

use crate::matcher::ErrorMatch;
use crate::types::{round2, Category, Severity};

/// Root cause reported for a category with no pattern matches.
pub const UNKNOWN_ROOT_CAUSE: &str = "Unknown root cause";

/// Command prefix for `auto_fix` action items.
pub const DEFAULT_FIX_COMMAND: &str = "npx e2e-fix";

/// Status line for a run without errors.
pub const EMPTY_STATUS: &str = "P:0/0";

const MAX_SUGGESTIONS: usize = 5;

/// Count at which an item earns its full volume discount.
const COUNT_DIVISOR: f64 = 20.0;
const MAX_COUNT_DISCOUNT: f64 = 0.5;

// ============================================================================
// Summary Types
// ============================================================================

/// Everything known about one category in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub category: Category,
    pub semantic_code: String,
    pub count: usize,
    pub fixable_count: usize,
    pub primary_root_cause: String,
    pub affected_files: Vec<String>,
    pub severity: Severity,
    pub avg_confidence: f64,
    pub suggestions: Vec<String>,
}

/// Number of category summaries at each severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }
}

/// Per-category view of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCategories {
    pub total_errors: usize,
    /// Sorted by count, then severity.
    pub categories: Vec<CategorySummary>,
    pub fixable_errors: usize,
    pub by_severity: SeverityCounts,
}

// ============================================================================
// Action Items
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// A pattern with a known fix matched; run the command.
    AutoFix,
    /// Needs a human, but the cause is known well enough to act on.
    ManualFix,
    /// Critical and unexplained.
    Investigate,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoFix => write!(f, "auto_fix"),
            Self::ManualFix => write!(f, "manual_fix"),
            Self::Investigate => write!(f, "investigate"),
        }
    }
}

/// One prioritized remediation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    /// Lower runs first.
    pub priority: f64,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub category: Category,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    pub affected_files: Vec<String>,
    pub estimated_impact: String,
    pub suggestions: Vec<String>,
}

/// One category in an [`AiSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactCategory {
    pub code: String,
    pub category: Category,
    pub count: usize,
    pub fixable: bool,
    pub severity: Severity,
    pub root_cause: String,
}

/// Compact projection for automated consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSummary {
    pub status: String,
    pub total_errors: usize,
    pub fixable_errors: usize,
    pub categories: Vec<CompactCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<ActionItem>,
}

// ============================================================================
// Category Aggregator
// ============================================================================

/// Groups matched errors by category and derives action items.
#[derive(Debug, Clone)]
pub struct CategoryAggregator {
    fix_command: String,
}

impl Default for CategoryAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fix_command: DEFAULT_FIX_COMMAND.to_string(),
        }
    }

    /// Use a different command prefix for `auto_fix` items.
    #[must_use]
    pub fn with_fix_command(mut self, command: impl Into<String>) -> Self {
        self.fix_command = command.into();
        self
    }

    #[must_use]
    pub fn aggregate(&self, matches: &[ErrorMatch]) -> AggregatedCategories {
        let mut grouped: Vec<(Category, Vec<&ErrorMatch>)> = Vec::new();
        for m in matches {
            let category = m.resolved_category();
            match grouped.iter().position(|(c, _)| *c == category) {
                Some(i) => grouped[i].1.push(m),
                None => grouped.push((category, vec![m])),
            }
        }

        let mut categories: Vec<CategorySummary> = grouped
            .into_iter()
            .map(|(category, members)| summarize(category, &members))
            .collect();
        categories.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.severity.rank().cmp(&b.severity.rank()))
        });

        let mut by_severity = SeverityCounts::default();
        for summary in &categories {
            by_severity.record(summary.severity);
        }

        AggregatedCategories {
            total_errors: matches.len(),
            fixable_errors: categories.iter().map(|c| c.fixable_count).sum(),
            categories,
            by_severity,
        }
    }

    /// One action item per non-empty category, most urgent first.
    #[must_use]
    pub fn generate_action_items(&self, aggregated: &AggregatedCategories) -> Vec<ActionItem> {
        let mut items: Vec<ActionItem> = aggregated
            .categories
            .iter()
            .filter(|s| s.count > 0)
            .map(|s| self.action_item(s, aggregated.total_errors))
            .collect();
        items.sort_by(|a, b| a.priority.total_cmp(&b.priority));
        items
    }

    fn action_item(&self, summary: &CategorySummary, total_errors: usize) -> ActionItem {
        let category = summary.category;
        let noun = if summary.count == 1 { "error" } else { "errors" };

        let (action_type, description, command) = if summary.fixable_count > 0 {
            (
                ActionType::AutoFix,
                format!(
                    "Apply automatic fix for {} {} {}",
                    summary.count, category, noun
                ),
                Some(format!("{} --pattern={}", self.fix_command, category)),
            )
        } else if summary.severity == Severity::Critical {
            (
                ActionType::Investigate,
                format!(
                    "Investigate {} critical {} {}",
                    summary.count, category, noun
                ),
                None,
            )
        } else {
            (
                ActionType::ManualFix,
                format!("Fix {} {} {} manually", summary.count, category, noun),
                None,
            )
        };

        let discount = (summary.count as f64 / COUNT_DIVISOR).min(MAX_COUNT_DISCOUNT);
        let share = if total_errors == 0 {
            0.0
        } else {
            summary.count as f64 * 100.0 / total_errors as f64
        };

        ActionItem {
            priority: round2(summary.severity.score() - discount),
            action_type,
            category,
            description,
            command,
            root_cause: (summary.primary_root_cause != UNKNOWN_ROOT_CAUSE)
                .then(|| summary.primary_root_cause.clone()),
            affected_files: summary.affected_files.clone(),
            estimated_impact: format!(
                "{} of {} errors ({:.0}%)",
                summary.count, total_errors, share
            ),
            suggestions: summary.suggestions.clone(),
        }
    }

    /// One-line status such as `X:5|BC:3@AF|TO:2`.
    ///
    /// The prefix is `X` when any category is fixable, else `F`.
    #[must_use]
    pub fn compact_status(&self, aggregated: &AggregatedCategories) -> String {
        if aggregated.total_errors == 0 || aggregated.categories.is_empty() {
            return EMPTY_STATUS.to_string();
        }
        let prefix = if aggregated.categories.iter().any(|c| c.fixable_count > 0) {
            "X"
        } else {
            "F"
        };

        let mut status = format!("{}:{}", prefix, aggregated.total_errors);
        for summary in &aggregated.categories {
            status.push_str(&format!("|{}:{}", summary.semantic_code, summary.count));
            if summary.fixable_count > 0 {
                status.push_str("@AF");
            }
        }
        status
    }

    #[must_use]
    pub fn ai_summary(&self, aggregated: &AggregatedCategories) -> AiSummary {
        AiSummary {
            status: self.compact_status(aggregated),
            total_errors: aggregated.total_errors,
            fixable_errors: aggregated.fixable_errors,
            categories: aggregated
                .categories
                .iter()
                .map(|s| CompactCategory {
                    code: s.semantic_code.clone(),
                    category: s.category,
                    count: s.count,
                    fixable: s.fixable_count > 0,
                    severity: s.severity,
                    root_cause: s.primary_root_cause.clone(),
                })
                .collect(),
            next_action: self.generate_action_items(aggregated).into_iter().next(),
        }
    }
}

fn summarize(category: Category, members: &[&ErrorMatch]) -> CategorySummary {
    let best: Vec<_> = members.iter().filter_map(|m| m.best_match.as_ref()).collect();

    // Root cause frequency, first-seen order for ties.
    let mut causes: Vec<(&str, usize)> = Vec::new();
    for b in &best {
        match causes.iter().position(|(c, _)| *c == b.root_cause) {
            Some(i) => causes[i].1 += 1,
            None => causes.push((b.root_cause.as_str(), 1)),
        }
    }
    let primary_root_cause = causes
        .iter()
        .fold(None::<(&str, usize)>, |top, &(cause, n)| match top {
            Some((_, best_n)) if best_n >= n => top,
            _ => Some((cause, n)),
        })
        .map_or_else(|| UNKNOWN_ROOT_CAUSE.to_string(), |(c, _)| c.to_string());

    let mut affected_files: Vec<String> = Vec::new();
    for file in members.iter().filter_map(|m| m.error.file.as_ref()) {
        if !affected_files.contains(file) {
            affected_files.push(file.clone());
        }
    }

    let mut suggestions: Vec<String> = Vec::new();
    for s in best.iter().flat_map(|b| b.suggestions.iter()) {
        if suggestions.len() == MAX_SUGGESTIONS {
            break;
        }
        if !suggestions.contains(s) {
            suggestions.push(s.clone());
        }
    }

    let severity = best
        .iter()
        .map(|b| b.severity)
        .reduce(Severity::max_of)
        .unwrap_or_default();
    let confidence_sum: f64 = best.iter().map(|b| b.confidence).sum();

    CategorySummary {
        category,
        semantic_code: category.semantic_code().to_string(),
        count: members.len(),
        fixable_count: best.iter().filter(|b| b.fix_available).count(),
        primary_root_cause,
        affected_files,
        severity,
        avg_confidence: round2(confidence_sum / members.len() as f64),
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::PatternMatch;
    use crate::types::TestError;

    fn pattern_match(
        category: Category,
        severity: Severity,
        confidence: f64,
        root_cause: &str,
        fixable: bool,
    ) -> PatternMatch {
        PatternMatch {
            pattern_id: format!("{}-{}", category, root_cause),
            name: root_cause.to_string(),
            category,
            severity,
            confidence,
            root_cause: root_cause.to_string(),
            fix_available: fixable,
            fix_template: None,
            suggestions: vec![format!("check {}", root_cause), "retry".to_string()],
            semantic_code: None,
        }
    }

    fn matched(file: &str, best: Option<PatternMatch>) -> ErrorMatch {
        ErrorMatch {
            error: TestError::new("boom").with_location(file, 1),
            matches: best.iter().cloned().collect(),
            best_match: best,
        }
    }

    fn unmatched(category: Category) -> ErrorMatch {
        ErrorMatch {
            error: TestError::new("boom").with_category(category),
            matches: Vec::new(),
            best_match: None,
        }
    }

    #[test]
    fn test_empty_input() {
        let aggregator = CategoryAggregator::new();
        let aggregated = aggregator.aggregate(&[]);
        assert_eq!(aggregated.total_errors, 0);
        assert!(aggregated.categories.is_empty());
        assert_eq!(aggregated.fixable_errors, 0);
        assert_eq!(aggregator.compact_status(&aggregated), "P:0/0");
        assert!(aggregator.generate_action_items(&aggregated).is_empty());
        assert!(aggregator.ai_summary(&aggregated).next_action.is_none());

        let json = serde_json::to_value(&aggregated).unwrap();
        assert_eq!(json["totalErrors"], 0);
        assert_eq!(json["fixableErrors"], 0);
        assert_eq!(json["categories"], serde_json::json!([]));
    }

    #[test]
    fn test_summary_fields() {
        let aggregator = CategoryAggregator::new();
        let bc = |cause: &str, sev| {
            Some(pattern_match(Category::BrowserCompat, sev, 0.9, cause, true))
        };
        let matches = vec![
            matched("a.ts", bc("typeorm", Severity::High)),
            matched("b.ts", bc("fs", Severity::Critical)),
            matched("a.ts", bc("fs", Severity::Medium)),
            matched("c.ts", bc("typeorm", Severity::Low)),
        ];
        let aggregated = aggregator.aggregate(&matches);
        assert_eq!(aggregated.categories.len(), 1);

        let summary = &aggregated.categories[0];
        assert_eq!(summary.semantic_code, "BC");
        assert_eq!(summary.count, 4);
        assert_eq!(summary.fixable_count, 4);
        // 2-2 tie goes to the first seen
        assert_eq!(summary.primary_root_cause, "typeorm");
        assert_eq!(summary.affected_files, vec!["a.ts", "b.ts", "c.ts"]);
        assert_eq!(summary.severity, Severity::Critical);
        assert_eq!(summary.avg_confidence, 0.9);
        assert_eq!(
            summary.suggestions,
            vec!["check typeorm", "retry", "check fs"]
        );
    }

    #[test]
    fn test_unmatched_errors_fall_back_to_raw_category() {
        let aggregator = CategoryAggregator::new();
        let matches = vec![
            unmatched(Category::Timeout),
            matched(
                "x.ts",
                Some(pattern_match(Category::Timeout, Severity::High, 0.8, "slow", false)),
            ),
        ];
        let aggregated = aggregator.aggregate(&matches);
        let summary = &aggregated.categories[0];
        assert_eq!(summary.category, Category::Timeout);
        assert_eq!(summary.count, 2);
        // Entries without a best match count as zero confidence
        assert_eq!(summary.avg_confidence, 0.4);

        let only_unmatched = aggregator.aggregate(&[unmatched(Category::Unknown)]);
        let summary = &only_unmatched.categories[0];
        assert_eq!(summary.primary_root_cause, UNKNOWN_ROOT_CAUSE);
        assert_eq!(summary.severity, Severity::Low);
        assert_eq!(summary.semantic_code, "UK");
    }

    #[test]
    fn test_partition_and_ordering() {
        let aggregator = CategoryAggregator::new();
        let mut matches = vec![
            unmatched(Category::Network),
            matched(
                "s.ts",
                Some(pattern_match(Category::Server, Severity::Critical, 0.7, "500", false)),
            ),
        ];
        for _ in 0..3 {
            matches.push(unmatched(Category::Selector));
        }

        let aggregated = aggregator.aggregate(&matches);
        let total: usize = aggregated.categories.iter().map(|c| c.count).sum();
        assert_eq!(total, aggregated.total_errors);

        let order: Vec<_> = aggregated.categories.iter().map(|c| c.category).collect();
        // selector by count; server before network on severity
        assert_eq!(
            order,
            vec![Category::Selector, Category::Server, Category::Network]
        );
        assert_eq!(aggregated.by_severity.critical, 1);
        assert_eq!(aggregated.by_severity.low, 2);
    }

    #[test]
    fn test_action_items() {
        let aggregator = CategoryAggregator::new().with_fix_command("pnpm fix");
        let mut matches = Vec::new();
        for _ in 0..3 {
            matches.push(matched(
                "a.ts",
                Some(pattern_match(Category::BrowserCompat, Severity::High, 1.0, "bundle", true)),
            ));
        }
        matches.push(matched(
            "b.ts",
            Some(pattern_match(Category::Database, Severity::Critical, 0.9, "migrations", false)),
        ));
        matches.push(unmatched(Category::Runtime));

        let aggregated = aggregator.aggregate(&matches);
        let items = aggregator.generate_action_items(&aggregated);
        assert_eq!(items.len(), 3);

        // critical: 1 - 0.05
        assert_eq!(items[0].action_type, ActionType::Investigate);
        assert_eq!(items[0].priority, 0.95);
        assert_eq!(items[0].root_cause.as_deref(), Some("migrations"));

        // high: 2 - 0.15
        assert_eq!(items[1].action_type, ActionType::AutoFix);
        assert_eq!(items[1].priority, 1.85);
        assert_eq!(
            items[1].command.as_deref(),
            Some("pnpm fix --pattern=browser_compat")
        );
        assert_eq!(items[1].estimated_impact, "3 of 5 errors (60%)");

        assert_eq!(items[2].action_type, ActionType::ManualFix);
        assert!(items[2].root_cause.is_none());

        assert!(items.windows(2).all(|w| w[0].priority <= w[1].priority));
    }

    #[test]
    fn test_higher_count_never_lowers_urgency() {
        let aggregator = CategoryAggregator::new();
        let mut matches = vec![unmatched(Category::Network)];
        for _ in 0..4 {
            matches.push(unmatched(Category::Auth));
        }
        let items = aggregator.generate_action_items(&aggregator.aggregate(&matches));
        assert_eq!(items[0].category, Category::Auth);
        assert!(items[0].priority <= items[1].priority);
    }

    #[test]
    fn test_count_discount_is_capped() {
        let aggregator = CategoryAggregator::new();
        let matches: Vec<_> = (0..40).map(|_| unmatched(Category::Timeout)).collect();
        let items = aggregator.generate_action_items(&aggregator.aggregate(&matches));
        assert_eq!(items[0].priority, 3.5);
    }

    #[test]
    fn test_compact_status_and_ai_summary() {
        let aggregator = CategoryAggregator::new();
        let mut matches = Vec::new();
        for _ in 0..3 {
            matches.push(matched(
                "a.ts",
                Some(pattern_match(Category::BrowserCompat, Severity::Critical, 1.0, "bundle", true)),
            ));
        }
        for _ in 0..2 {
            matches.push(unmatched(Category::Timeout));
        }

        let aggregated = aggregator.aggregate(&matches);
        assert_eq!(aggregator.compact_status(&aggregated), "X:5|BC:3@AF|TO:2");

        let summary = aggregator.ai_summary(&aggregated);
        assert_eq!(summary.fixable_errors, 3);
        assert_eq!(summary.categories.len(), 2);
        assert!(summary.categories[0].fixable);
        let next = summary.next_action.unwrap();
        assert_eq!(next.action_type, ActionType::AutoFix);
        assert_eq!(next.command.as_deref(), Some("npx e2e-fix --pattern=browser_compat"));

        let unfixable = aggregator.aggregate(&matches[3..]);
        assert_eq!(aggregator.compact_status(&unfixable), "F:2|TO:2");
    }

    #[test]
    fn test_action_type_serializes_snake_case() {
        let json = serde_json::to_value(ActionType::AutoFix).unwrap();
        assert_eq!(json, "auto_fix");
    }
}
