//! Error fingerprinting, deduplication and similarity clustering.
//!
//! A fingerprint is the SHA-256 of a small feature vector:
//!
//! ```text
//! [category, normalizedMessage, fileBasename?, frame1, frame2, frame3]
//! ```
//!
//! Volatile substrings (line numbers, UUIDs, timestamps, durations, ports,
//! numeric ids, addresses) are stripped from the message first, so the same
//! failure hashes identically across runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::extract::StackParser;
use crate::types::{round2, Category, TestError};

/// Default Jaccard threshold for [`Fingerprinter::find_clusters`].
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 0.7;

/// Stack frames that contribute to a fingerprint.
const MAX_FRAMES: usize = 3;

/// Length of [`ErrorFingerprint::short_hash`].
const SHORT_HASH_LEN: usize = 8;

/// How a normalizer rewrites its matches.
#[derive(Clone, Copy)]
enum Rewrite {
    Template(&'static str),
    With(fn(&Captures<'_>) -> String),
}

/// A bare `12:5` becomes `L:C`; a three-part `10:20:30` is a clock time
/// and stays.
fn bare_line_col(caps: &Captures<'_>) -> String {
    if caps.get(2).is_some() {
        return caps[0].to_string();
    }
    format!("{}L:C", &caps[1])
}

/// Ordered message normalizers. Each later rule sees the output of the
/// earlier ones, so none of them may re-match an earlier placeholder.
#[allow(clippy::expect_used)]
static NORMALIZERS: LazyLock<Vec<(Regex, Rewrite)>> = LazyLock::new(|| {
    [
        // file.ts:12:5 (a digit before the colon would be a clock time)
        (r"([^\d\s:]):\d+:\d+", Rewrite::Template("${1}:L:C")),
        (r"(^|[\s(])\d+:\d+(:\d+)?", Rewrite::With(bare_line_col)),
        // cart.ts:42, before the host rule can take it for a port
        (
            r"(?i)(\.(?:[cm]?[jt]sx?|vue|svelte|html?|css|json|py|rb|go|rs|java|kt|php)):\d+\b",
            Rewrite::Template("${1}:L"),
        ),
        (
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            Rewrite::Template("<UUID>"),
        ),
        (
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            Rewrite::Template("<TIMESTAMP>"),
        ),
        (r"(?i)\b\d+(?:\.\d+)?\s*ms\b", Rewrite::Template("Xms")),
        (
            r"(?i)\btimeout\s+(?:of\s+)?Xms\b",
            Rewrite::Template("Timeout Xms"),
        ),
        (
            r"(?i)\b(?:localhost|\d{1,3}(?:\.\d{1,3}){3}|[a-z0-9-]+(?:\.[a-z0-9-]+)+):\d{2,5}\b",
            Rewrite::Template("<HOST>:<PORT>"),
        ),
        // single-label service names: redis:6379, api:8080
        (
            r"(?i)\b[a-z][a-z0-9_-]*:\d{4,5}\b",
            Rewrite::Template("<HOST>:<PORT>"),
        ),
        (r"(?i)\bid=\d+\b", Rewrite::Template("id=<ID>")),
        (r"(?i)\b0x[0-9a-f]+\b", Rewrite::Template("<ADDR>")),
        (r"\s+", Rewrite::Template(" ")),
    ]
    .into_iter()
    .map(|(pattern, rewrite)| {
        (
            Regex::new(pattern).expect("valid normalization regex"),
            rewrite,
        )
    })
    .collect()
});

// ============================================================================
// Types
// ============================================================================

/// Deterministic identity of a `TestError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFingerprint {
    /// Hex SHA-256 of the `|`-joined features.
    pub hash: String,
    pub short_hash: String,
    pub features: Vec<String>,
    pub category: Category,
    pub normalized_message: String,
}

/// Errors sharing one fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorGroup {
    pub fingerprint: ErrorFingerprint,
    pub errors: Vec<TestError>,
    pub count: usize,
    /// Titles of the tests that produced the errors, when known.
    pub test_names: Vec<String>,
}

/// Output of [`Fingerprinter::deduplicate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationResult {
    /// First occurrence of each fingerprint, in input order.
    pub unique: Vec<TestError>,
    /// Groups sorted by descending count.
    pub groups: Vec<ErrorGroup>,
    pub total_count: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
    /// `duplicate_count / total_count`, two decimals.
    pub deduplication_ratio: f64,
}

// ============================================================================
// Fingerprinter
// ============================================================================

/// Computes fingerprints and groups errors by them.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    stack: StackParser,
}

impl Fingerprinter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: StackParser::new(),
        }
    }

    /// Strip volatile substrings and collapse whitespace.
    #[must_use]
    pub fn normalize_message(&self, message: &str) -> String {
        let normalized = NORMALIZERS
            .iter()
            .fold(message.to_string(), |text, (regex, rewrite)| match *rewrite {
                Rewrite::Template(template) => regex.replace_all(&text, template).into_owned(),
                Rewrite::With(f) => regex.replace_all(&text, f).into_owned(),
            });
        normalized.trim().to_string()
    }

    /// `function@basename` for one stack line; `None` if it is not a frame.
    #[must_use]
    pub fn normalize_frame(&self, line: &str) -> Option<String> {
        self.stack.parse_frame(line).map(|f| f.normalized())
    }

    /// The feature vector that gets hashed.
    #[must_use]
    pub fn features(&self, error: &TestError) -> Vec<String> {
        let mut features = vec![
            error.category.as_str().to_string(),
            self.normalize_message(&error.message),
        ];
        if let Some(name) = error.file_basename() {
            features.push(name);
        }
        if let Some(ref stack) = error.stack {
            features.extend(
                stack
                    .lines()
                    .filter_map(|l| self.normalize_frame(l))
                    .take(MAX_FRAMES),
            );
        }
        features
    }

    #[must_use]
    pub fn fingerprint(&self, error: &TestError) -> ErrorFingerprint {
        let features = self.features(error);
        let mut hasher = Sha256::new();
        hasher.update(features.join("|").as_bytes());
        let hash = hex::encode(hasher.finalize());

        ErrorFingerprint {
            short_hash: hash[..SHORT_HASH_LEN].to_string(),
            hash,
            normalized_message: features[1].clone(),
            category: error.category,
            features,
        }
    }

    /// Partition errors by hash, groups in first-seen order.
    ///
    /// `test_names[i]` is recorded against `errors[i]` when present.
    #[must_use]
    pub fn group_by_fingerprint(
        &self,
        errors: &[TestError],
        test_names: Option<&[String]>,
    ) -> Vec<ErrorGroup> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<ErrorGroup> = Vec::new();

        for (i, error) in errors.iter().enumerate() {
            let fingerprint = self.fingerprint(error);
            let name = test_names.and_then(|names| names.get(i)).cloned();

            let slot = match index.get(&fingerprint.hash) {
                Some(&slot) => slot,
                None => {
                    index.insert(fingerprint.hash.clone(), groups.len());
                    groups.push(ErrorGroup {
                        fingerprint,
                        errors: Vec::new(),
                        count: 0,
                        test_names: Vec::new(),
                    });
                    groups.len() - 1
                }
            };

            let group = &mut groups[slot];
            group.errors.push(error.clone());
            group.count += 1;
            if let Some(name) = name {
                group.test_names.push(name);
            }
        }
        groups
    }

    /// Keep the first error of each fingerprint group.
    #[must_use]
    pub fn deduplicate(
        &self,
        errors: &[TestError],
        test_names: Option<&[String]>,
    ) -> DeduplicationResult {
        let mut groups = self.group_by_fingerprint(errors, test_names);
        let unique: Vec<TestError> = groups
            .iter()
            .filter_map(|g| g.errors.first().cloned())
            .collect();
        groups.sort_by(|a, b| b.count.cmp(&a.count));

        let total_count = errors.len();
        let unique_count = unique.len();
        let duplicate_count = total_count - unique_count;
        let deduplication_ratio = if total_count == 0 {
            0.0
        } else {
            round2(duplicate_count as f64 / total_count as f64)
        };

        debug!(
            "Deduplicated {} errors into {} unique ({} duplicates)",
            total_count, unique_count, duplicate_count
        );

        DeduplicationResult {
            unique,
            groups,
            total_count,
            unique_count,
            duplicate_count,
            deduplication_ratio,
        }
    }

    /// Exact fingerprint equality.
    #[must_use]
    pub fn are_similar(&self, a: &TestError, b: &TestError) -> bool {
        self.fingerprint(a).hash == self.fingerprint(b).hash
    }

    /// Jaccard index of the two feature sets.
    #[must_use]
    pub fn similarity_score(&self, a: &TestError, b: &TestError) -> f64 {
        jaccard(
            &self.features(a).into_iter().collect(),
            &self.features(b).into_iter().collect(),
        )
    }

    /// Greedy clustering: each unassigned error seeds a cluster and absorbs
    /// every later unassigned error whose similarity *to the seed* is at
    /// least `threshold`. Clusters are sorted by size, largest first.
    #[must_use]
    pub fn find_clusters(&self, errors: &[TestError], threshold: f64) -> Vec<Vec<TestError>> {
        let feature_sets: Vec<HashSet<String>> = errors
            .iter()
            .map(|e| self.features(e).into_iter().collect())
            .collect();
        let mut assigned = vec![false; errors.len()];
        let mut clusters = Vec::new();

        for seed in 0..errors.len() {
            if assigned[seed] {
                continue;
            }
            assigned[seed] = true;
            let mut cluster = vec![errors[seed].clone()];

            for other in (seed + 1)..errors.len() {
                if assigned[other] {
                    continue;
                }
                if jaccard(&feature_sets[seed], &feature_sets[other]) >= threshold {
                    assigned[other] = true;
                    cluster.push(errors[other].clone());
                }
            }
            clusters.push(cluster);
        }

        clusters.sort_by(|a, b| b.len().cmp(&a.len()));
        clusters
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_error(message: &str) -> TestError {
        TestError::new(message).with_category(Category::Timeout)
    }

    #[test]
    fn test_normalize_timeout_message() {
        let fp = Fingerprinter::new();
        assert_eq!(
            fp.normalize_message("Timeout 5000ms exceeded"),
            "Timeout Xms exceeded"
        );
        assert_eq!(
            fp.normalize_message("Test timeout of 30000 ms exceeded."),
            "Test Timeout Xms exceeded."
        );
    }

    #[test]
    fn test_normalize_volatile_values() {
        let fp = Fingerprinter::new();
        assert_eq!(
            fp.normalize_message("at login.spec.ts:12:5"),
            "at login.spec.ts:L:C"
        );
        assert_eq!(
            fp.normalize_message("order 3f2b8c1e-9a4d-4e2f-8b7a-1c2d3e4f5a6b missing"),
            "order <UUID> missing"
        );
        assert_eq!(
            fp.normalize_message("failed at 2024-05-01T10:20:30.123Z"),
            "failed at <TIMESTAMP>"
        );
        assert_eq!(
            fp.normalize_message("connect ECONNREFUSED 127.0.0.1:5432"),
            "connect ECONNREFUSED <HOST>:<PORT>"
        );
        assert_eq!(
            fp.normalize_message("GET http://localhost:3000/api?id=42"),
            "GET http://<HOST>:<PORT>/api?id=<ID>"
        );
        assert_eq!(
            fp.normalize_message("segfault at 0x7ffee4b2   in   worker"),
            "segfault at <ADDR> in worker"
        );
    }

    #[test]
    fn test_normalize_bare_line_col() {
        let fp = Fingerprinter::new();
        let a = TestError::new("SyntaxError: Unexpected token at 12:5");
        let b = TestError::new("SyntaxError: Unexpected token at 48:17");

        assert_eq!(
            fp.normalize_message(&a.message),
            "SyntaxError: Unexpected token at L:C"
        );
        assert_eq!(fp.fingerprint(&a).hash, fp.fingerprint(&b).hash);
        assert_eq!(fp.normalize_message("parse error (3:14)"), "parse error (L:C)");
        // clock times keep all three parts
        assert_eq!(
            fp.normalize_message("job started 10:20:30 and stalled"),
            "job started 10:20:30 and stalled"
        );
    }

    #[test]
    fn test_normalize_file_line() {
        let fp = Fingerprinter::new();
        assert_eq!(
            fp.normalize_message("see cart.ts:42 for details"),
            "see cart.ts:L for details"
        );
        assert_eq!(
            fp.normalize_message("see cart.ts:42 for details"),
            fp.normalize_message("see cart.ts:7 for details")
        );
    }

    #[test]
    fn test_normalize_service_host_port() {
        let fp = Fingerprinter::new();
        assert_eq!(
            fp.normalize_message("connect ECONNREFUSED redis:6379"),
            "connect ECONNREFUSED <HOST>:<PORT>"
        );
        assert_eq!(
            fp.normalize_message("GET http://api:8080/orders"),
            "GET http://<HOST>:<PORT>/orders"
        );
    }

    #[test]
    fn test_normalization_equivalence() {
        let fp = Fingerprinter::new();
        let a = timeout_error(
            "request 3f2b8c1e-9a4d-4e2f-8b7a-1c2d3e4f5a6b to localhost:3000 took 120ms at 2024-05-01T10:20:30Z",
        );
        let b = timeout_error(
            "request 00000000-1111-2222-3333-444444444444 to localhost:4173 took 87ms at 2025-01-09T23:59:01Z",
        );
        assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
        assert!(fp.are_similar(&a, &b));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let fp = Fingerprinter::new();
        let error = timeout_error("Timeout 5000ms exceeded").with_location("tests/a.spec.ts", 4);
        let first = fp.fingerprint(&error);
        let second = fp.fingerprint(&error);
        assert_eq!(first, second);
        assert_eq!(first.hash.len(), 64);
        assert_eq!(first.short_hash, first.hash[..8]);
        assert_eq!(first.normalized_message, "Timeout Xms exceeded");
        assert_eq!(
            first.features,
            vec!["timeout", "Timeout Xms exceeded", "a.spec.ts"]
        );
    }

    #[test]
    fn test_features_use_three_frames() {
        let fp = Fingerprinter::new();
        let error = TestError::new("boom").with_stack(
            "at a (/app/one.ts:1:1)\nat /app/two.ts:2:2\nat c (/app/three.ts:3:3)\nat d (/app/four.ts:4:4)",
        );
        let features = fp.features(&error);
        assert_eq!(
            features[2..],
            ["a@one.ts", "anonymous@two.ts", "c@three.ts"]
        );
    }

    #[test]
    fn test_stacks_differing_in_line_numbers_group_together() {
        let fp = Fingerprinter::new();
        let base = TestError::new("TypeError: x is undefined")
            .with_category(Category::Runtime)
            .with_location("src/cart.ts", 10);
        let a = base
            .clone()
            .with_stack("at addItem (/app/src/cart.ts:10:5)\nat /app/tests/cart.spec.ts:8:3");
        let b = base.with_stack("at addItem (/app/src/cart.ts:11:5)\nat /app/tests/cart.spec.ts:8:3");

        let groups = fp.group_by_fingerprint(&[a, b], None);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn test_deduplicate_counts_and_order() {
        let fp = Fingerprinter::new();
        let errors = vec![
            timeout_error("Timeout 100ms exceeded"),
            TestError::new("boom").with_category(Category::Runtime),
            timeout_error("Timeout 200ms exceeded"),
            timeout_error("Timeout 300ms exceeded"),
        ];
        let names: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let result = fp.deduplicate(&errors, Some(&names));

        assert_eq!(result.total_count, 4);
        assert_eq!(result.unique_count, 2);
        assert_eq!(result.duplicate_count, 2);
        assert_eq!(result.unique_count + result.duplicate_count, result.total_count);
        assert_eq!(result.deduplication_ratio, 0.5);
        assert_eq!(result.unique[0].message, "Timeout 100ms exceeded");
        assert_eq!(result.unique[1].message, "boom");

        assert_eq!(result.groups[0].count, 3);
        assert_eq!(result.groups[0].test_names, vec!["a", "c", "d"]);
        let grouped: usize = result.groups.iter().map(|g| g.count).sum();
        assert_eq!(grouped, result.total_count);
    }

    #[test]
    fn test_deduplicate_empty() {
        let fp = Fingerprinter::new();
        let result = fp.deduplicate(&[], None);
        assert_eq!(result.total_count, 0);
        assert_eq!(result.deduplication_ratio, 0.0);
        assert!(result.groups.is_empty());
    }

    #[test]
    fn test_similarity_score() {
        let fp = Fingerprinter::new();
        let a = timeout_error("Timeout 100ms exceeded").with_location("a.spec.ts", 1);
        let b = timeout_error("Timeout 900ms exceeded").with_location("b.spec.ts", 1);
        // {timeout, msg, a.spec.ts} vs {timeout, msg, b.spec.ts}
        assert!((fp.similarity_score(&a, &b) - 0.5).abs() < f64::EPSILON);
        assert_eq!(fp.similarity_score(&a, &a), 1.0);
        assert!(!fp.are_similar(&a, &b));
    }

    #[test]
    fn test_find_clusters_compares_against_seed_only() {
        let fp = Fingerprinter::new();
        // seed {t, m, x}, second {t, m, x, y} is 0.75 to the seed.
        // third {t, m, y, z} is 0.6 to second but only 0.4 to the seed.
        let seed = TestError::new("m")
            .with_category(Category::Timeout)
            .with_location("x", 1);
        let second = seed.clone().with_stack("at y (/y:1:1)");
        let third = TestError::new("m")
            .with_category(Category::Timeout)
            .with_location("z", 1)
            .with_stack("at y (/y:1:1)");

        let clusters = fp.find_clusters(&[seed, second, third], 0.5);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 2);
        assert_eq!(clusters[1].len(), 1);
        assert_eq!(clusters[1][0].file.as_deref(), Some("z"));
    }

    #[test]
    fn test_find_clusters_sorted_by_size() {
        let fp = Fingerprinter::new();
        let errors = vec![
            TestError::new("lonely").with_category(Category::Runtime),
            timeout_error("Timeout 1ms exceeded"),
            timeout_error("Timeout 2ms exceeded"),
        ];
        let clusters = fp.find_clusters(&errors, DEFAULT_CLUSTER_THRESHOLD);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 2);
        assert_eq!(clusters[1][0].message, "lonely");
    }
}
