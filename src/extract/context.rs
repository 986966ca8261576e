//! Companion context lookup (DOM snapshots and screenshots).
//!
//! Runners write per-test artifact directories whose names are derived
//! from the test title, e.g. `login-logs-in-with-valid-user-chromium/`.
//! The locator slugifies a test title and fuzzy-substring matches it
//! against the directory listing. Similarly named tests can be mis-paired;
//! the first match in lexicographic order wins.
//!
//! Every lookup is best-effort: a missing directory or unreadable file is
//! logged at debug level and simply omitted.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, TriageError};
use crate::types::TestError;

/// Default file name globs for DOM snapshots.
pub const DEFAULT_SNAPSHOT_GLOBS: &[&str] = &["error-context.md", "*.html"];

/// Default file name globs for screenshots.
pub const DEFAULT_SCREENSHOT_GLOBS: &[&str] = &["*.png"];

/// Runners truncate long titles in directory names; match on a prefix.
const MAX_SLUG_LEN: usize = 40;

/// Lower-case `text` and collapse every run of non-alphanumerics into `-`.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn build_globset(field: &str, globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        let glob = Glob::new(glob)
            .map_err(|e| TriageError::invalid_config(field, format!("{}: {}", glob, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| TriageError::invalid_config(field, e.to_string()))
}

/// Finds per-test artifact directories and attaches their contents.
#[derive(Debug, Clone)]
pub struct ContextLocator {
    dir: PathBuf,
    snapshot_globs: GlobSet,
    screenshot_globs: GlobSet,
}

impl ContextLocator {
    /// Create a locator over `dir` with the default globs.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in globs; the `Result` mirrors
    /// [`ContextLocator::with_globs`].
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let to_owned = |g: &[&str]| g.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self::with_globs(
            dir,
            &to_owned(DEFAULT_SNAPSHOT_GLOBS),
            &to_owned(DEFAULT_SCREENSHOT_GLOBS),
        )
    }

    /// Create a locator with custom file name globs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a glob does not compile.
    pub fn with_globs(
        dir: impl Into<PathBuf>,
        snapshot_globs: &[String],
        screenshot_globs: &[String],
    ) -> Result<Self> {
        Ok(Self {
            dir: dir.into(),
            snapshot_globs: build_globset("snapshotGlobs", snapshot_globs)?,
            screenshot_globs: build_globset("screenshotGlobs", screenshot_globs)?,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The artifact directory whose name contains the slugified title.
    #[must_use]
    pub fn find_dir(&self, title: &str) -> Option<PathBuf> {
        let slug = slugify(title);
        let needle = slug
            .get(..MAX_SLUG_LEN.min(slug.len()))
            .unwrap_or(&slug)
            .trim_end_matches('-');
        if needle.is_empty() {
            return None;
        }

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Context directory {} unavailable: {}", self.dir.display(), e);
                return None;
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| slugify(n).contains(needle))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    fn first_file(dir: &Path, globs: &GlobSet) -> Option<PathBuf> {
        WalkDir::new(dir)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .find(|e| e.file_name().to_str().is_some_and(|n| globs.is_match(n)))
            .map(|e| e.into_path())
    }

    /// Attach the DOM snapshot and screenshot for `title`, when present.
    ///
    /// Fields the error already carries are left untouched.
    #[must_use]
    pub fn enrich(&self, title: &str, error: TestError) -> TestError {
        let Some(dir) = self.find_dir(title) else {
            debug!("No context directory for test {:?}", title);
            return error;
        };

        let mut error = error;
        if error.dom_snapshot.is_none() {
            if let Some(path) = Self::first_file(&dir, &self.snapshot_globs) {
                match std::fs::read_to_string(&path) {
                    Ok(snapshot) => error = error.with_dom_snapshot(snapshot),
                    Err(e) => debug!("Skipping snapshot {}: {}", path.display(), e),
                }
            }
        }
        if error.screenshot_path.is_none() {
            if let Some(path) = Self::first_file(&dir, &self.screenshot_globs) {
                error = error.with_screenshot(path);
            }
        }
        error
    }
}
