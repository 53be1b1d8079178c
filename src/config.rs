//! Lab configuration using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults
//! 2. A TOML file (usually `lab.toml`)
//! 3. Environment variables prefixed with `LABFRAME_`, nested with `__`
//!    (e.g. `LABFRAME_LOGGING__LEVEL=debug`)
//!
//! # Example
//! ```
//! use labframe::config::LabConfig;
//!
//! let config = LabConfig::from_toml_str(r#"
//!     computer_name = "optics-1"
//!
//!     [devices.esa]
//!     driver = "keysight.KeysightEsa"
//!     address = "tcp://192.168.1.20:5025"
//! "#).unwrap();
//! assert_eq!(config.devices["esa"].driver, "keysight.KeysightEsa");
//! ```

use crate::error::{AppResult, LabError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LABFRAME_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Name of this lab computer, recorded with acquired data.
    pub computer_name: String,
    /// Log output settings
    pub logging: LoggingSection,
    /// Extra driver modules to trust
    pub drivers: DriversSection,
    /// Configured devices by id
    pub devices: IndexMap<String, DeviceConfig>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            computer_name: "localhost".to_string(),
            logging: LoggingSection::default(),
            drivers: DriversSection::default(),
            devices: IndexMap::new(),
        }
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// `[drivers]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriversSection {
    /// Driver modules registered in addition to the built-in ones.
    pub modules: Vec<String>,
}

/// One `[devices.<id>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Dotted driver path, e.g. `thorlabs.Pm100d`.
    pub driver: String,
    /// Every other key: settings handed to the driver (address, timeout_ms, ...).
    #[serde(flatten)]
    pub settings: toml::Table,
}

impl LabConfig {
    /// Load defaults, then `path`, then `LABFRAME_*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text (no environment overrides).
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(text))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> AppResult<()> {
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                LOG_FORMATS.join(", ")
            )));
        }
        for (id, device) in &self.devices {
            if id.contains('.') {
                return Err(LabError::Configuration(format!(
                    "Device id '{id}' may not contain '.'"
                )));
            }
            if device.driver.trim().is_empty() {
                return Err(LabError::Configuration(format!("Device '{id}' has no driver")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_sections() {
        let config = LabConfig::from_toml_str("").unwrap();
        assert_eq!(config, LabConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn device_settings_are_flattened() {
        let config = LabConfig::from_toml_str(
            r#"
            [drivers]
            modules = ["lab_extras"]

            [devices.meter]
            driver = "thorlabs.Pm100d"
            address = "mock://"
            timeout_ms = 500
            "#,
        )
        .unwrap();
        let meter = &config.devices["meter"];
        assert_eq!(meter.driver, "thorlabs.Pm100d");
        assert_eq!(meter.settings["address"].as_str(), Some("mock://"));
        assert_eq!(meter.settings["timeout_ms"].as_integer(), Some(500));
        assert!(!meter.settings.contains_key("driver"));
        assert_eq!(config.drivers.modules, ["lab_extras"]);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(matches!(
            LabConfig::from_toml_str("[logging]\nlevel = \"loud\""),
            Err(LabError::Configuration(_))
        ));
        assert!(matches!(
            LabConfig::from_toml_str("[logging]\nformat = \"xml\""),
            Err(LabError::Configuration(_))
        ));
        assert!(matches!(
            LabConfig::from_toml_str("[devices.\"a.b\"]\ndriver = \"scpi.ScpiInstrument\""),
            Err(LabError::Configuration(_))
        ));
    }

    #[test]
    fn missing_driver_is_an_extraction_error() {
        let err = LabConfig::from_toml_str("[devices.x]\naddress = \"mock://\"").unwrap_err();
        assert!(matches!(err, LabError::Config(_)));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "computer_name = \"bench\"\n[logging]\nformat = \"json\"").unwrap();
        let config = LabConfig::load(file.path()).unwrap();
        assert_eq!(config.computer_name, "bench");
        assert_eq!(config.logging.format, "json");
    }
}
