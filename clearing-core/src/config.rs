//! Configuration for the clearing cycle engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Clearing engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Cycle lifecycle configuration
    pub cycle: CycleConfig,

    /// External ledger dispatch configuration
    pub dispatch: DispatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "clearing-engine".to_string(),
            cycle: CycleConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Cycle lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Default duration of a cycle in minutes, used when the closure
    /// trigger does not specify one
    pub default_duration_minutes: i64,

    /// Delay for the imminent fallback closure when a scheduled deadline
    /// is already in the past (e.g. process restart after downtime)
    pub fallback_delay_seconds: u64,

    /// Tolerance for the zero-sum invariant, in currency units
    pub balance_tolerance: Decimal,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            default_duration_minutes: 10,
            fallback_delay_seconds: 5,
            balance_tolerance: Decimal::new(1, 2), // 0.01
        }
    }
}

/// External ledger dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Base URL of the external accounting system
    pub accounting_base_url: String,

    /// Bounded timeout for the dispatch call, so a hung downstream cannot
    /// hold the closure lock indefinitely
    pub timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            accounting_base_url: "http://accounting-core:8090".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::ClearingError::Config(format!("Failed to read config: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::ClearingError::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("ACCOUNTING_BASE_URL") {
            config.dispatch.accounting_base_url = url;
        }

        if let Ok(timeout) = std::env::var("LEDGER_DISPATCH_TIMEOUT_SECONDS") {
            config.dispatch.timeout_seconds = timeout.parse().map_err(|_| {
                crate::ClearingError::Config(format!("Invalid dispatch timeout: {}", timeout))
            })?;
        }

        if let Ok(minutes) = std::env::var("CYCLE_DURATION_MINUTES") {
            config.cycle.default_duration_minutes = minutes.parse().map_err(|_| {
                crate::ClearingError::Config(format!("Invalid cycle duration: {}", minutes))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cycle.default_duration_minutes, 10);
        assert_eq!(config.cycle.balance_tolerance, Decimal::new(1, 2));
        assert_eq!(config.dispatch.timeout_seconds, 10);
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            parsed.cycle.balance_tolerance,
            config.cycle.balance_tolerance
        );
    }
}
