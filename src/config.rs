//! Configuration for e2e-triage.
//!
//! Configuration is layered, later layers overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. User config (`~/.config/e2e-triage/config.json`)
//! 3. Project config (`<project>/.e2e-triage/config.json`)
//! 4. An explicit `--config` file
//! 5. CLI flags (applied by the caller)
//!
//! Objects are deep-merged; arrays and scalars are replaced.
//!
//! ```json
//! {
//!   "patternsPath": "e2e/patterns.json",
//!   "contextDir": "test-results",
//!   "clusterThreshold": 0.8,
//!   "fixCommand": "pnpm e2e:fix"
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::aggregate::DEFAULT_FIX_COMMAND;
use crate::error::{IntoTriageError, Result, TriageError};
use crate::extract::context::{
    ContextLocator, DEFAULT_SCREENSHOT_GLOBS, DEFAULT_SNAPSHOT_GLOBS,
};
use crate::fingerprint::DEFAULT_CLUSTER_THRESHOLD;

/// Directory holding the project-level config file.
pub const PROJECT_CONFIG_DIR: &str = ".e2e-triage";

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "e2e-triage";

// ============================================================================
// Triage Config
// ============================================================================

/// Resolved settings for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriageConfig {
    /// Pattern database file; the built-in database when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns_path: Option<PathBuf>,
    /// Directory of per-test artifact folders used for enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<PathBuf>,
    /// Jaccard threshold for clustering, within `[0, 1]`.
    pub cluster_threshold: f64,
    /// Command prefix for `auto_fix` action items.
    pub fix_command: String,
    pub snapshot_globs: Vec<String>,
    pub screenshot_globs: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            patterns_path: None,
            context_dir: None,
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
            fix_command: DEFAULT_FIX_COMMAND.to_string(),
            snapshot_globs: DEFAULT_SNAPSHOT_GLOBS.iter().map(|s| s.to_string()).collect(),
            screenshot_globs: DEFAULT_SCREENSHOT_GLOBS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TriageConfig {
    /// Path of the project config file.
    pub fn project_path(project_dir: &Path) -> PathBuf {
        project_dir.join(PROJECT_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Check value ranges and that the globs compile.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cluster_threshold) {
            return Err(TriageError::invalid_config(
                "clusterThreshold",
                format!("{} is outside [0, 1]", self.cluster_threshold),
            ));
        }
        if self.fix_command.trim().is_empty() {
            return Err(TriageError::invalid_config(
                "fixCommand",
                "must not be empty",
            ));
        }
        // Compiling the locator checks both glob lists.
        ContextLocator::with_globs(
            self.context_dir.clone().unwrap_or_default(),
            &self.snapshot_globs,
            &self.screenshot_globs,
        )?;
        Ok(())
    }

    /// The enrichment locator, when a context directory is configured.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a glob does not compile.
    pub fn context_locator(&self) -> Result<Option<ContextLocator>> {
        self.context_dir
            .as_ref()
            .map(|dir| ContextLocator::with_globs(dir, &self.snapshot_globs, &self.screenshot_globs))
            .transpose()
    }
}

// ============================================================================
// Config Level & Inheritance Chain
// ============================================================================

/// Where a config layer came from, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigLevel {
    User,
    Project,
    /// A file passed with `--config`.
    Explicit,
}

impl std::fmt::Display for ConfigLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

/// A config file that was (or could have been) loaded.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub level: ConfigLevel,
    pub path: PathBuf,
    pub loaded: bool,
}

/// The layers considered while resolving a config.
#[derive(Debug, Clone, Default)]
pub struct InheritanceChain {
    pub sources: Vec<ConfigSource>,
}

impl InheritanceChain {
    fn add_source(&mut self, level: ConfigLevel, path: PathBuf, loaded: bool) {
        self.sources.push(ConfigSource {
            level,
            path,
            loaded,
        });
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.sources.iter().filter(|s| s.loaded).count()
    }

    /// One line per layer, `+` for loaded and `-` for absent.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut lines = vec!["Configuration layers:".to_string()];
        for source in &self.sources {
            let status = if source.loaded { "+" } else { "-" };
            lines.push(format!(
                "  {} [{}] {}",
                status,
                source.level,
                source.path.display()
            ));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Config Loader
// ============================================================================

/// Resolves a [`TriageConfig`] from its layers.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    explicit_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_config_path: Self::default_user_path(),
            explicit_path: None,
        }
    }

    /// `<config dir>/e2e-triage/config.json` for the current platform.
    #[must_use]
    pub fn default_user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Override (or with `None`, skip) the user layer.
    #[must_use]
    pub fn with_user_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.user_config_path = path;
        self
    }

    /// Add a file that overrides every other layer.
    #[must_use]
    pub fn with_explicit_path(mut self, path: PathBuf) -> Self {
        self.explicit_path = Some(path);
        self
    }

    /// Resolve and validate the config for `project_dir`.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load_with_chain`].
    pub fn load(&self, project_dir: &Path) -> Result<TriageConfig> {
        let (config, chain) = self.load_with_chain(project_dir)?;
        debug!("{}", chain.describe());
        Ok(config)
    }

    /// Resolve the config and report which layers were found.
    ///
    /// A malformed user config is skipped with a warning. A malformed
    /// project or explicit config is an error, as is a missing explicit
    /// file.
    ///
    /// # Errors
    ///
    /// Returns `Config`, `MissingFile` or `InvalidConfig`.
    pub fn load_with_chain(&self, project_dir: &Path) -> Result<(TriageConfig, InheritanceChain)> {
        let mut chain = InheritanceChain::default();
        let mut merged = serde_json::to_value(TriageConfig::default())?;

        if let Some(ref user_path) = self.user_config_path {
            let loaded = match read_layer(user_path) {
                Ok(Some(mut layer)) => {
                    resolve_layer_paths(&mut layer, parent_dir(user_path));
                    deep_merge(&mut merged, layer);
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!("Ignoring user config {}: {}", user_path.display(), e);
                    false
                }
            };
            chain.add_source(ConfigLevel::User, user_path.clone(), loaded);
        }

        let project_path = TriageConfig::project_path(project_dir);
        let loaded = match read_layer(&project_path)? {
            Some(mut layer) => {
                resolve_layer_paths(&mut layer, project_dir);
                deep_merge(&mut merged, layer);
                true
            }
            None => false,
        };
        chain.add_source(ConfigLevel::Project, project_path, loaded);

        if let Some(ref explicit) = self.explicit_path {
            let mut layer = read_layer(explicit)?.ok_or_else(|| TriageError::MissingFile {
                path: explicit.clone(),
            })?;
            resolve_layer_paths(&mut layer, parent_dir(explicit));
            deep_merge(&mut merged, layer);
            chain.add_source(ConfigLevel::Explicit, explicit.clone(), true);
        }

        let config: TriageConfig = serde_json::from_value(merged).into_triage_config()?;
        config.validate()?;
        Ok((config, chain))
    }
}

/// Read one layer; `None` if the file does not exist.
fn read_layer(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| TriageError::config_with_path(e.to_string(), path.to_path_buf()))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| TriageError::config_with_path(e.to_string(), path.to_path_buf()))?;
    if !value.is_object() {
        return Err(TriageError::config_with_path(
            "config file must contain a JSON object",
            path.to_path_buf(),
        ));
    }
    Ok(Some(value))
}

/// The directory holding `file`; relative paths in it resolve from here.
fn parent_dir(file: &Path) -> &Path {
    file.parent().unwrap_or_else(|| Path::new("."))
}

/// Make relative `patternsPath` / `contextDir` absolute against `base`.
///
/// The project file resolves against the project root, user and explicit
/// files against their own directory.
fn resolve_layer_paths(layer: &mut Value, base: &Path) {
    for key in ["patternsPath", "contextDir"] {
        if let Some(Value::String(raw)) = layer.get(key) {
            let path = Path::new(raw);
            if path.is_relative() {
                let resolved = base.join(path).to_string_lossy().into_owned();
                layer[key] = Value::String(resolved);
            }
        }
    }
}

/// Deep merge, child overriding parent. Arrays are replaced.
fn deep_merge(parent: &mut Value, child: Value) {
    match (parent, child) {
        (Value::Object(parent_map), Value::Object(child_map)) => {
            for (key, child_value) in child_map {
                match parent_map.get_mut(&key) {
                    Some(parent_value) => deep_merge(parent_value, child_value),
                    None => {
                        parent_map.insert(key, child_value);
                    }
                }
            }
        }
        (parent, child) => *parent = child,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_project_config(project: &Path, json: &str) {
        let dir = project.join(PROJECT_CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE_NAME), json).unwrap();
    }

    fn isolated_loader() -> ConfigLoader {
        ConfigLoader::new().with_user_config_path(None)
    }

    #[test]
    fn test_defaults() {
        let config = TriageConfig::default();
        assert_eq!(config.cluster_threshold, 0.7);
        assert_eq!(config.fix_command, "npx e2e-fix");
        assert_eq!(config.snapshot_globs, vec!["error-context.md", "*.html"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_files_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let (config, chain) = isolated_loader().load_with_chain(temp.path()).unwrap();
        assert_eq!(config, TriageConfig::default());
        assert_eq!(chain.loaded_count(), 0);
    }

    #[test]
    fn test_layers_override_in_order() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user.json");
        std::fs::write(&user, r#"{"clusterThreshold": 0.5, "fixCommand": "user-fix"}"#).unwrap();

        let project = temp.path().join("project");
        write_project_config(&project, r#"{"fixCommand": "project-fix", "contextDir": "test-results"}"#);

        let explicit = temp.path().join("explicit.json");
        std::fs::write(&explicit, r#"{"screenshotGlobs": ["*.jpg"]}"#).unwrap();

        let loader = ConfigLoader::new()
            .with_user_config_path(Some(user))
            .with_explicit_path(explicit);
        let (config, chain) = loader.load_with_chain(&project).unwrap();

        assert_eq!(config.cluster_threshold, 0.5);
        assert_eq!(config.fix_command, "project-fix");
        assert_eq!(config.context_dir, Some(project.join("test-results")));
        assert_eq!(config.screenshot_globs, vec!["*.jpg"]);
        // untouched arrays keep their defaults
        assert_eq!(config.snapshot_globs.len(), 2);
        assert_eq!(chain.loaded_count(), 3);
        assert!(chain.describe().contains("[project]"));
    }

    #[test]
    fn test_project_relative_patterns_path() {
        let temp = TempDir::new().unwrap();
        write_project_config(temp.path(), r#"{"patternsPath": "e2e/patterns.json"}"#);
        let config = isolated_loader().load(temp.path()).unwrap();
        assert_eq!(
            config.patterns_path,
            Some(temp.path().join("e2e/patterns.json"))
        );
    }

    #[test]
    fn test_user_and_explicit_paths_resolve_against_their_file() {
        let temp = TempDir::new().unwrap();
        let user_dir = temp.path().join("home").join("e2e-triage");
        std::fs::create_dir_all(&user_dir).unwrap();
        let user = user_dir.join("config.json");
        std::fs::write(&user, r#"{"patternsPath": "patterns.json"}"#).unwrap();

        let shared = temp.path().join("shared");
        std::fs::create_dir_all(&shared).unwrap();
        let explicit = shared.join("ci.json");
        std::fs::write(&explicit, r#"{"contextDir": "artifacts"}"#).unwrap();

        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();

        let config = ConfigLoader::new()
            .with_user_config_path(Some(user))
            .with_explicit_path(explicit)
            .load(&project)
            .unwrap();
        assert_eq!(config.patterns_path, Some(user_dir.join("patterns.json")));
        assert_eq!(config.context_dir, Some(shared.join("artifacts")));
    }

    #[test]
    fn test_malformed_user_config_is_ignored() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user.json");
        std::fs::write(&user, "{ nope").unwrap();
        let loader = ConfigLoader::new().with_user_config_path(Some(user));
        let config = loader.load(temp.path()).unwrap();
        assert_eq!(config, TriageConfig::default());
    }

    #[test]
    fn test_malformed_project_config_is_error() {
        let temp = TempDir::new().unwrap();
        write_project_config(temp.path(), "[1, 2]");
        let err = isolated_loader().load(temp.path()).unwrap_err();
        assert!(matches!(err, TriageError::Config { path: Some(_), .. }));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let temp = TempDir::new().unwrap();
        let err = isolated_loader()
            .with_explicit_path(temp.path().join("missing.json"))
            .load(temp.path())
            .unwrap_err();
        assert!(matches!(err, TriageError::MissingFile { .. }));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_validation() {
        let config = TriageConfig {
            cluster_threshold: 1.5,
            ..TriageConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TriageError::InvalidConfig { ref field, .. }) if field == "clusterThreshold"
        ));

        let config = TriageConfig {
            fix_command: "  ".to_string(),
            ..TriageConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TriageConfig {
            snapshot_globs: vec!["[".to_string()],
            ..TriageConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TriageError::InvalidConfig { ref field, .. }) if field == "snapshotGlobs"
        ));
    }

    #[test]
    fn test_context_locator_only_with_dir() {
        let config = TriageConfig::default();
        assert!(config.context_locator().unwrap().is_none());

        let config = TriageConfig {
            context_dir: Some(PathBuf::from("/tmp/results")),
            ..TriageConfig::default()
        };
        let locator = config.context_locator().unwrap().unwrap();
        assert_eq!(locator.dir(), Path::new("/tmp/results"));
    }
}
