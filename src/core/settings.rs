//! Sync settings
//!
//! Settings are passed explicitly into every operation that needs them. Hosts
//! plug their own settings store in through `SettingsProvider`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::backends::exclude::ExcludeSet;
use crate::core::error::{Result, SyncError};
use crate::core::model::ReplaceRule;
use crate::core::replace::Replacer;

/// Default batch size for streamed content and token estimation
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Patterns excluded when no settings are supplied
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", "node_modules", "target", ".DS_Store"];

/// User-facing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub exclude_patterns: Vec<String>,
    pub replace_rules: Vec<ReplaceRule>,
    pub include_ignore_file: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            exclude_patterns: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            replace_rules: Vec::new(),
            include_ignore_file: false,
        }
    }
}

impl SyncSettings {
    /// Load settings from a JSON file, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Using default settings: {}", e);
                Self::default()
            }
        }
    }

    /// Load settings from a JSON file
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| SyncError::fs(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| SyncError::Validation(format!("{}: {}", path.display(), e)))
    }

    /// Compile the settings for one root
    pub fn compile(&self, root: &Path) -> CompiledSettings {
        CompiledSettings {
            excludes: ExcludeSet::for_root(root, &self.exclude_patterns, self.include_ignore_file),
            replacer: Replacer::new(&self.replace_rules),
        }
    }
}

/// Host-supplied settings accessor
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> SyncSettings;
}

impl SettingsProvider for SyncSettings {
    fn settings(&self) -> SyncSettings {
        self.clone()
    }
}

/// Settings compiled against a root, ready for the hot paths
#[derive(Debug, Clone, Default)]
pub struct CompiledSettings {
    pub excludes: ExcludeSet,
    pub replacer: Replacer,
}

/// Batch sizing for streamed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub size: usize,
}

impl BatchOptions {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_valid_settings() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(
            &path,
            r#"{"excludePatterns":["*.log"],"replaceRules":[{"from":"a","to":"b"}],"includeIgnoreFile":true}"#,
        )
        .unwrap();

        let settings = SyncSettings::load(&path);
        assert_eq!(settings.exclude_patterns, vec!["*.log"]);
        assert_eq!(settings.replace_rules, vec![ReplaceRule::new("a", "b")]);
        assert!(settings.include_ignore_file);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, r#"{"includeIgnoreFile":true}"#).unwrap();

        let settings = SyncSettings::load(&path);
        assert_eq!(settings.exclude_patterns, SyncSettings::default().exclude_patterns);
        assert!(settings.include_ignore_file);
    }

    #[test]
    fn test_malformed_settings_fall_back() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            SyncSettings::try_load(&path),
            Err(SyncError::Validation(_))
        ));
        assert_eq!(SyncSettings::load(&path), SyncSettings::default());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let temp = tempdir().unwrap();
        let settings = SyncSettings::load(&temp.path().join("nope.json"));
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn test_batch_size_clamped() {
        assert_eq!(BatchOptions::new(0).size, 1);
        assert_eq!(BatchOptions::default().size, DEFAULT_BATCH_SIZE);
    }
}
