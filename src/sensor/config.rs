//! Daemon configuration file and defaults
//!
//! A TOML file with every key optional; the defaults describe a sensor
//! listening on all interfaces for port 53 traffic with the stock plugin
//! set enabled. CLI switches in the binary override individual fields.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use derive_more::{Display, Error, From};
use serde::Deserialize;

#[derive(Debug, Display, From, Error)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_CONFIG_PATH: &str = "argos.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Capture interface, e.g. "any" or "eth0".
    pub device: String,
    /// Maximum bytes captured per frame.
    pub snaplen: i32,
    pub promisc: bool,
    /// Capture read timeout in milliseconds.
    pub timeout: i32,
    /// BPF filter expression applied kernel-side.
    pub filter: String,
    /// SQLite database path, or ":memory:".
    pub database: String,
    /// Seconds between statistics flushes.
    pub stats_interval: u64,
    /// Seconds to wait for the decode queue while shutting down.
    pub drain_timeout: u64,
    /// Seconds granted to plugins to finish after their inboxes close.
    pub plugin_grace: u64,
    /// Bounded inbox depth per plugin; overflow drops the newest event.
    pub inbox_capacity: usize,
    /// Per-plugin configuration tables keyed by plugin name. A plugin runs
    /// only when its table is present with `enable = 1`.
    pub plugins: BTreeMap<String, toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: "any".to_string(),
            snaplen: 1518,
            promisc: false,
            timeout: 100,
            filter: "(tcp or udp) and port 53".to_string(),
            database: "argos.db".to_string(),
            stats_interval: 60,
            drain_timeout: 5,
            plugin_grace: 10,
            inbox_capacity: 512,
            plugins: default_plugins(),
        }
    }
}

/// The stock plugin set, enabled out of the box.
fn default_plugins() -> BTreeMap<String, toml::Value> {
    const DEFAULTS: &str = r#"
        [plugins."packet::logger"]
        enable = 1
        keep_for = "30 days"

        [plugins."server::authorized"]
        enable = 1

        [plugins."server::stats"]
        enable = 1
        rrd = 1

        [plugins."client::stats"]
        enable = 1
        rrd = 1
    "#;

    #[derive(Deserialize)]
    struct Wrapper {
        plugins: BTreeMap<String, toml::Value>,
    }

    let wrapper: Wrapper =
        toml::from_str(DEFAULTS).expect("built-in plugin defaults are well-formed");
    wrapper.plugins
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let raw = fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Summarize the effective configuration once at startup.
    pub fn log_summary(&self) {
        log::info!(
            "capturing on {} (snaplen {}, promisc {}, filter {:?})",
            self.device,
            self.snaplen,
            self.promisc,
            self.filter
        );
        log::info!("database: {}", self.database);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!("any", config.device);
        assert_eq!(1518, config.snaplen);
        assert!(!config.promisc);
        assert_eq!(100, config.timeout);
        assert_eq!("(tcp or udp) and port 53", config.filter);
        assert_eq!(60, config.stats_interval);
        assert_eq!(4, config.plugins.len());

        let logger = config.plugins["packet::logger"].as_table().unwrap();
        assert_eq!(Some(1), logger.get("enable").and_then(|v| v.as_integer()));
        assert_eq!(
            Some("30 days"),
            logger.get("keep_for").and_then(|v| v.as_str())
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            device = "eth0"

            [plugins."server::stats"]
            enable = 0
            "#,
        )
        .unwrap();

        assert_eq!("eth0", config.device);
        assert_eq!(1518, config.snaplen);
        // A plugins table in the file replaces the default set entirely.
        assert_eq!(1, config.plugins.len());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<Config>("snap_len = 9000").is_err());
    }
}
