//! e2e-triage - Error analysis for end-to-end test runs
//!
//! Turns raw runner output into a prioritized, deduplicated picture of what
//! went wrong and what to do about it.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`extract`] - Parse runner output into normalized test errors
//! - [`fingerprint`] - Stable hashes, deduplication and similarity clustering
//! - [`matcher`] - Known-failure pattern database and scoring
//! - [`aggregate`] - Per-category summaries, action items and status lines
//! - [`pipeline`] - The full analysis of one run
//! - [`config`] - Layered configuration loading and validation
//! - [`error`] - Custom error types and handling
//!
//! # Example
//!
//! ```rust,no_run
//! use e2e_triage::config::TriageConfig;
//! use e2e_triage::pipeline::Analyzer;
//!
//! let output = std::fs::read_to_string("test-results.json")?;
//! let analyzer = Analyzer::from_config(&TriageConfig::default())?;
//! let report = analyzer.analyze(&output);
//! println!("{}", report.status);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod matcher;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use error::{IntoTriageError, Result, TriageError};

pub use types::{Category, Severity, TestError, TestResult, TestStatus};

pub use config::{ConfigLoader, TriageConfig};

pub use extract::ErrorExtractor;

pub use fingerprint::{DeduplicationResult, ErrorFingerprint, ErrorGroup, Fingerprinter};

pub use matcher::{
    database::{PatternDatabase, PatternDefinition},
    ErrorMatch, PatternMatch, PatternMatcher,
};

pub use aggregate::{
    ActionItem, ActionType, AggregatedCategories, AiSummary, CategoryAggregator, CategorySummary,
};

pub use pipeline::{AnalysisReport, Analyzer};
