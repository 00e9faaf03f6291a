//! Engine configuration (TOML)
//!
//! ```toml
//! max_table_size = 100
//! parallel_rows = true
//! live_reload = true
//! query_timeout_ms = 5000
//! workspace_pool_size = 16
//! ```

use std::path::Path;
use std::time::Duration;

use butterfly_common::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// A table may hold at most `max_table_size²` cells
    pub max_table_size: usize,
    /// Compute table rows on the rayon pool
    pub parallel_rows: bool,
    /// Allow dataset replacement while serving; enables the query gate
    pub live_reload: bool,
    /// Per-request deadline, none when unset
    pub query_timeout_ms: Option<u64>,
    /// Idle workspaces kept between queries
    pub workspace_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_table_size: 100,
            parallel_rows: false,
            live_reload: false,
            query_timeout_ms: None,
            workspace_pool_size: 8,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_table_size == 0 {
            return Err(Error::Config("max_table_size must be at least 1".to_string()));
        }
        if self.query_timeout_ms == Some(0) {
            return Err(Error::Config(
                "query_timeout_ms must be positive (omit it to disable)".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest accepted `sources × destinations`
    pub fn max_table_entries(&self) -> usize {
        self.max_table_size.saturating_mul(self.max_table_size)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_table_entries(), 10_000);
        assert!(!config.live_reload);
        assert_eq!(config.query_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str("live_reload = true\nquery_timeout_ms = 250\n").unwrap();
        assert!(config.live_reload);
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_table_size, 100);
    }

    #[test]
    fn test_rejects_unknown_and_invalid_fields() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_locations = 5"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("max_table_size = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("query_timeout_ms = 0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_table_size = 3").unwrap();
        writeln!(file, "parallel_rows = true").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.max_table_entries(), 9);
        assert!(config.parallel_rows);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::load("/nonexistent/butterfly-query.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
