//! Runtime settings.

use std::path::PathBuf;

pub const DB_ENV: &str = "LABELSTORE_DB";
pub const METRICS_DIR_ENV: &str = "LABELSTORE_METRICS_DIR";

pub const DEFAULT_DB_FILE: &str = "labelstore.db";
pub const DEFAULT_METRICS_DIR: &str = "data/metrics";

/// Where the store and the metrics log live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Directory of `<project_id>_metrics.jsonl` files.
    pub metrics_dir: PathBuf,
}

impl Settings {
    pub fn new(db_path: impl Into<PathBuf>, metrics_dir: impl Into<PathBuf>) -> Self {
        Settings {
            db_path: db_path.into(),
            metrics_dir: metrics_dir.into(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new(DEFAULT_DB_FILE, DEFAULT_METRICS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.db_path, PathBuf::from("labelstore.db"));
        assert_eq!(settings.metrics_dir, PathBuf::from("data/metrics"));
    }

    #[test]
    fn test_new_keeps_paths() {
        let settings = Settings::new("/tmp/a.db", "/tmp/metrics");
        assert_eq!(settings.db_path, PathBuf::from("/tmp/a.db"));
        assert_eq!(settings.metrics_dir, PathBuf::from("/tmp/metrics"));
    }
}
