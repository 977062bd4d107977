//! Application settings
//!
//! Loaded from `settings.json` in the mailscope config directory. A missing
//! file yields the defaults; a malformed one is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{SortSpec, ViewPrefs};

/// Settings filename in the mailscope config directory
const SETTINGS_FILE: &str = "settings.json";

/// Environment variable overriding the preference database location
pub const DB_ENV_VAR: &str = "MAILSCOPE_DB";

/// User settings with defaults for views that have no stored preference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sort applied when a folder has no stored sort
    pub default_sort: SortSpec,
    /// Threading applied when a folder has no stored preference
    pub default_threaded: bool,
    /// Preference database, relative to the config directory
    pub database_file: String,
    /// How long the CLI waits for a view to load
    pub wait_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_sort: SortSpec::default(),
            default_threaded: false,
            database_file: "mailscope.sqlite".to_string(),
            wait_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load `~/.config/mailscope/settings.json`, falling back to defaults
    pub fn load() -> Result<Self> {
        config::load_json_or_default(SETTINGS_FILE)
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    pub fn save(&self) -> Result<()> {
        config::save_json(SETTINGS_FILE, self)
    }

    /// Preference database path
    ///
    /// `MAILSCOPE_DB` wins; otherwise `database_file` under the config
    /// directory (or the working directory if no home is available).
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = std::env::var_os(DB_ENV_VAR).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        config::config_path(&self.database_file)
            .unwrap_or_else(|| PathBuf::from(&self.database_file))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Fill unset preference values with the defaults
    pub fn resolve(&self, prefs: Option<ViewPrefs>) -> (SortSpec, bool) {
        let prefs = prefs.unwrap_or_default();
        (
            prefs.sort.unwrap_or(self.default_sort),
            prefs.threaded.unwrap_or(self.default_threaded),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortKey, SortOrder};
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.default_sort.key, SortKey::Date);
        assert_eq!(settings.default_sort.order, SortOrder::Descending);
        assert!(!settings.default_threaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "default_threaded": true }"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert!(settings.default_threaded);
        assert_eq!(settings.database_file, "mailscope.sqlite");
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Settings::from_file(&path).is_err());
    }

    #[test]
    fn test_resolve_prefers_stored_values() {
        let settings = Settings::default();
        let stored = ViewPrefs {
            sort: Some(SortSpec::new(SortKey::Subject, SortOrder::Ascending)),
            threaded: None,
        };
        let (sort, threaded) = settings.resolve(Some(stored));
        assert_eq!(sort.key, SortKey::Subject);
        assert!(!threaded);

        let (sort, _) = settings.resolve(None);
        assert_eq!(sort, settings.default_sort);
    }
}
