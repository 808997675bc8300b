//! Dispatcher configuration
//!
//! Loaded from TOML, every field optional:
//!
//! ```toml
//! wake_up_delay_ms = 0
//! max_flush_cycles = 1024
//! registry_sweep_threshold = 256
//! ```

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delay before a wake-up fires on timer-based hosts (0 = next turn)
    pub wake_up_delay_ms: u64,

    /// Upper bound on cycles run by one `flush`
    pub max_flush_cycles: usize,

    /// Registry size that triggers the first sweep of dropped handlers
    pub registry_sweep_threshold: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            wake_up_delay_ms: 0,
            max_flush_cycles: 1024,
            registry_sweep_threshold: 256,
        }
    }
}

impl DispatchConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(toml_str: &str) -> Result<Self, DispatchError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| DispatchError::invalid_config(format!("failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_flush_cycles == 0 {
            return Err(DispatchError::invalid_config(
                "max_flush_cycles must be greater than zero",
            ));
        }
        if self.registry_sweep_threshold == 0 {
            return Err(DispatchError::invalid_config(
                "registry_sweep_threshold must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn wake_up_delay(&self) -> Duration {
        Duration::from_millis(self.wake_up_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_missing_fields() {
        let config = DispatchConfig::from_toml("max_flush_cycles = 8").unwrap();
        assert_eq!(config.max_flush_cycles, 8);
        assert_eq!(config.wake_up_delay_ms, 0);
        assert_eq!(config.registry_sweep_threshold, 256);
        assert_eq!(config.wake_up_delay(), Duration::ZERO);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let err = DispatchConfig::from_toml("max_flush_cycles = 0").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));

        let err = DispatchConfig::from_toml("registry_sweep_threshold = 0").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));

        let err = DispatchConfig::from_toml("max_flush_cycles = \"many\"").unwrap_err();
        assert!(err.to_string().contains("failed to parse TOML"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wake_up_delay_ms = 16").unwrap();
        let config = DispatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.wake_up_delay(), Duration::from_millis(16));

        let missing = DispatchConfig::from_file("/nonexistent/dispatch.toml").unwrap_err();
        assert!(matches!(missing, DispatchError::Io(_)));
    }
}
