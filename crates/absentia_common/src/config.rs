//! Configuration - TOML file with per-field defaults.
//!
//! A missing file means all defaults; a malformed file is an error
//! rather than a silent fallback.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::AbsentiaError;

/// Runtime settings for the daemon and the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Certificate submission deadline, in hours.
    #[serde(default = "default_deadline_hours")]
    pub deadline_hours: i64,

    /// SQLite database path for employees and cases.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Log level for the tracing subscriber (error/warn/info/debug/trace).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_deadline_hours() -> i64 {
    48
}

fn default_database_path() -> String {
    "absentia.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            deadline_hours: default_deadline_hours(),
            database_path: default_database_path(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Settings, AbsentiaError> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| AbsentiaError::validation(format!("config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.deadline_hours, 48);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/absentia.toml")).unwrap();
        assert_eq!(settings.deadline_hours, 48);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "deadline_hours = 72\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.deadline_hours, 72);
        assert_eq!(settings.database_path, "absentia.db");
    }
}
