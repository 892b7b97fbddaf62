//! Runtime configuration
//!
//! The orchestrator receives per-device configuration already resolved by an
//! external config layer. It only owns its own runtime knobs.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fully-resolved configuration mapping for a single device
pub type DeviceConfig = serde_json::Map<String, serde_json::Value>;

/// Default bounded wait per device during shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Default rolling window size for pipeline throughput
pub const DEFAULT_STATS_WINDOW: usize = 30;

/// Orchestrator runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directories scanned for `*.module.json` blueprint manifests
    pub module_paths: Vec<PathBuf>,
    /// Bounded wait per device before teardown is forced
    pub shutdown_timeout_ms: u64,
    /// Number of recent frames used for rolling FPS
    pub stats_window: usize,
    /// `tracing` filter directive
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            module_paths: vec![PathBuf::from("modules")],
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            stats_window: DEFAULT_STATS_WINDOW,
            log_level: "info".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load settings from a JSON file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.stats_window < 2 {
            return Err(OrchestratorError::config(format!(
                "stats_window must be at least 2, got {}",
                self.stats_window
            )));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(OrchestratorError::config(
                "shutdown_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Shutdown wait as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Builder: set module search paths
    pub fn with_module_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.module_paths = paths;
        self
    }

    /// Builder: set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder: set rolling stats window
    pub fn with_stats_window(mut self, window: usize) -> Self {
        self.stats_window = window;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.stats_window, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"module_paths": ["/opt/modules"], "shutdown_timeout_ms": 250}}"#
        )
        .unwrap();

        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.module_paths, vec![PathBuf::from("/opt/modules")]);
        assert_eq!(config.shutdown_timeout_ms, 250);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_config_rejects_tiny_window() {
        let config = OrchestratorConfig::default().with_stats_window(1);
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::Config(_))
        ));
    }
}
