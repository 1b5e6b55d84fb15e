//! Configuration layering.
//!
//! Files are loaded lowest priority first and deep-merged as JSON values,
//! so a layer only needs the keys it changes:
//!
//! 1. **User** - `{config_dir}/qreport/config.json`
//! 2. **Project** - `<project>/qreport.json`
//! 3. **Explicit** - the file passed with `--config`
//!
//! Objects merge key by key; any other value (arrays included) replaces the
//! lower layer's value.

use std::path::{Path, PathBuf};

use super::{Settings, PROJECT_CONFIG_FILE};
use crate::error::{QualityError, Result};

// ============================================================================
// Configuration Level
// ============================================================================

/// Configuration level, ordered by priority.
///
/// ```rust
/// use qreport::config::ConfigLevel;
///
/// assert!(ConfigLevel::User < ConfigLevel::Project);
/// assert!(ConfigLevel::Project < ConfigLevel::Explicit);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLevel {
    User,
    Project,
    /// Passed on the command line.
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

// ============================================================================
// Configuration Source
// ============================================================================

/// A file that was (or could have been) loaded.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub level: ConfigLevel,
    pub path: PathBuf,
    /// `false` when the file does not exist.
    pub loaded: bool,
}

impl ConfigSource {
    #[must_use]
    pub fn new(level: ConfigLevel, path: PathBuf, loaded: bool) -> Self {
        Self {
            level,
            path,
            loaded,
        }
    }
}

// ============================================================================
// Inheritance Chain
// ============================================================================

/// The files considered during resolution, in load order.
#[derive(Debug, Clone, Default)]
pub struct InheritanceChain {
    pub sources: Vec<ConfigSource>,
}

impl InheritanceChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, level: ConfigLevel, path: PathBuf, loaded: bool) {
        self.sources.push(ConfigSource::new(level, path, loaded));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of files that existed and were merged.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.sources.iter().filter(|s| s.loaded).count()
    }

    /// Multi-line description, `+` for loaded and `-` for absent files.
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
// Config Locations
// ============================================================================

/// Platform locations of the configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLocations {
    user: Option<PathBuf>,
}

impl Default for ConfigLocations {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLocations {
    #[must_use]
    pub fn new() -> Self {
        Self {
            user: Self::default_user_path(),
        }
    }

    /// `{config_dir}/qreport/config.json`, via the `dirs` crate.
    #[must_use]
    pub fn default_user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("qreport").join("config.json"))
    }

    #[must_use]
    pub fn user_path(&self) -> Option<&PathBuf> {
        self.user.as_ref()
    }

    /// Path of the project file inside `project_dir`.
    #[must_use]
    pub fn project_path(project_dir: &Path) -> PathBuf {
        project_dir.join(PROJECT_CONFIG_FILE)
    }

    #[must_use]
    pub fn with_user_path(mut self, path: Option<PathBuf>) -> Self {
        self.user = path;
        self
    }
}

// ============================================================================
// Config Loader
// ============================================================================

/// Loads and merges the configuration files.
///
/// ```rust,ignore
/// let (settings, chain) = ConfigLoader::new().load_with_chain(Path::new("."), None)?;
/// tracing::debug!("{}", chain.describe());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    locations: ConfigLocations,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override (or disable with `None`) the user config path.
    #[must_use]
    pub fn with_user_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.locations = self.locations.with_user_path(path);
        self
    }

    /// Merge every layer and deserialize the result.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a present file is not valid JSON,
    /// the merged value does not fit [`Settings`], or `explicit` is missing.
    pub fn load_with_chain(
        &self,
        project_dir: &Path,
        explicit: Option<&Path>,
    ) -> Result<(Settings, InheritanceChain)> {
        let mut chain = InheritanceChain::new();
        let mut merged = serde_json::Value::Object(serde_json::Map::new());

        if let Some(user_path) = self.locations.user_path() {
            let loaded = load_and_merge(&mut merged, user_path)?;
            chain.add_source(ConfigLevel::User, user_path.clone(), loaded);
        }

        let project_path = ConfigLocations::project_path(project_dir);
        let loaded = load_and_merge(&mut merged, &project_path)?;
        chain.add_source(ConfigLevel::Project, project_path, loaded);

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(QualityError::config_with_path(
                    "configuration file not found",
                    path.to_path_buf(),
                ));
            }
            load_and_merge(&mut merged, path)?;
            chain.add_source(ConfigLevel::Explicit, path.to_path_buf(), true);
        }

        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| QualityError::config(format!("merged configuration is invalid: {e}")))?;
        Ok((settings, chain))
    }
}

/// Merge `path` into `accumulated`. `Ok(false)` when the file is absent.
fn load_and_merge(accumulated: &mut serde_json::Value, path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| QualityError::config_with_path(format!("cannot read: {e}"), path.to_path_buf()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| QualityError::config_with_path(format!("invalid JSON: {e}"), path.to_path_buf()))?;
    deep_merge(accumulated, value);
    Ok(true)
}

/// Deep merge two JSON values, with `child` overriding `parent`.
pub fn deep_merge(parent: &mut serde_json::Value, child: serde_json::Value) {
    match (parent, child) {
        (serde_json::Value::Object(parent_map), serde_json::Value::Object(child_map)) => {
            for (key, child_value) in child_map {
                match parent_map.get_mut(&key) {
                    Some(parent_value) => deep_merge(parent_value, child_value),
                    None => {
                        parent_map.insert(key, child_value);
                    }
                }
            }
        }
        (parent, child) => {
            *parent = child;
        }
    }
}
