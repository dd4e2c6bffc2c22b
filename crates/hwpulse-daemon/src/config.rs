//! Configuration management.

use anyhow::{Context, Result};
use hwpulse_engine::{EngineConfig, LinuxHardware, LinuxNetwork};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sampling interval in milliseconds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Network adapter selection
    #[serde(default)]
    pub network: NetworkConfig,

    /// procfs/sysfs locations
    #[serde(default)]
    pub backend: BackendConfig,

    /// Sample reporting
    #[serde(default)]
    pub output: OutputConfig,
}

/// Network adapter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface to use instead of automatic selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Extra adapter name/description substrings to ignore
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// First enumeration sampling window in milliseconds
    #[serde(default = "default_probe")]
    pub probe_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            blacklist: Vec::new(),
            probe_ms: default_probe(),
        }
    }
}

/// Backend mount points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_proc_root")]
    pub proc_root: String,

    #[serde(default = "default_sys_root")]
    pub sys_root: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            proc_root: default_proc_root(),
            sys_root: default_sys_root(),
        }
    }
}

/// How published samples are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One tracing info line per sample
    #[default]
    Log,
    /// One JSON object per line on stdout
    Json,
}

/// Output configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

// Default value functions
fn default_interval() -> u64 {
    hwpulse_engine::DEFAULT_INTERVAL_MS
}

fn default_probe() -> u64 {
    250
}

fn default_proc_root() -> String {
    "/proc".to_string()
}

fn default_sys_root() -> String {
    "/sys".to_string()
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            anyhow::bail!("interval_ms must be greater than 0");
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            interval: Duration::from_millis(self.interval_ms),
            preferred_interface: self
                .network
                .interface
                .clone()
                .filter(|name| !name.trim().is_empty()),
            extra_blacklist: self.network.blacklist.clone(),
        }
    }

    pub fn hardware_backend(&self) -> LinuxHardware {
        LinuxHardware::with_roots(&self.backend.proc_root, &self.backend.sys_root)
    }

    pub fn network_backend(&self) -> LinuxNetwork {
        LinuxNetwork::with_root(
            &self.backend.sys_root,
            Duration::from_millis(self.network.probe_ms),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            network: NetworkConfig::default(),
            backend: BackendConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.interval_ms, 1000);
        assert_eq!(config.network.probe_ms, 250);
        assert_eq!(config.backend.proc_root, "/proc");
        assert_eq!(config.output.format, OutputFormat::Log);
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            interval_ms = 500

            [network]
            interface = "eth1"
            blacklist = ["wg", "tailscale"]

            [backend]
            sys_root = "/host/sys"

            [output]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.interval_ms, 500);
        assert_eq!(config.network.interface.as_deref(), Some("eth1"));
        assert_eq!(config.network.probe_ms, 250);
        assert_eq!(config.backend.proc_root, "/proc");
        assert_eq!(config.backend.sys_root, "/host/sys");
        assert_eq!(config.output.format, OutputFormat::Json);

        let engine = config.engine();
        assert_eq!(engine.interval, Duration::from_millis(500));
        assert_eq!(engine.preferred_interface.as_deref(), Some("eth1"));
        assert_eq!(engine.extra_blacklist, vec!["wg", "tailscale"]);
    }

    #[test]
    fn test_blank_interface_means_automatic() {
        let config: Config = toml::from_str("[network]\ninterface = \"\"\n").unwrap();
        assert_eq!(config.engine().preferred_interface, None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hwpulse.toml");

        let mut config = Config::default();
        config.interval_ms = 2000;
        config.network.blacklist = vec!["wg".into()];
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "interval_ms = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_shipped_default_config_parses() {
        let content = include_str!("../../../config/default.toml");
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.interval_ms, 1000);
    }
}
