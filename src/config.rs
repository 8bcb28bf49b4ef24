//! Configuration structures
//!
//! Everything loads from TOML; every section has usable defaults so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::output::priority::ThreadPriority;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output: OutputConfig,
    pub pacer: PacerConfig,
    pub source: SourceConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.pacer.validate()?;
        if self.source.bitrate == 0 {
            return Err(Error::Config("source.bitrate must be positive".to_string()));
        }
        if self.source.packets_per_unit == 0 {
            return Err(Error::Config("source.packets_per_unit must be positive".to_string()));
        }
        Ok(())
    }
}

/// Where the output goes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Destination descriptor, e.g. `udp://239.1.1.1:5000?ttl=4`
    pub destination: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            destination: format!("udp://127.0.0.1:{}", DEFAULT_UDP_PORT),
        }
    }
}

/// Startup buffering policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// Wait for a couple of units before playout
    #[default]
    Normal,
    /// Start playout on the first unit
    Lowest,
}

/// Output pacer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    pub latency: LatencyMode,
    /// Units to accumulate before playout; overrides `latency` when set
    pub fill_threshold: Option<usize>,
    /// Tick rate shared by clock references and the wall clock
    pub ticks_per_second: u64,
    /// Transport-stream packets per RTP datagram
    pub packets_per_datagram: usize,
    pub priority: ThreadPriority,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            latency: LatencyMode::Normal,
            fill_threshold: None,
            ticks_per_second: MPEG_CLOCK_HZ,
            packets_per_datagram: 1,
            priority: ThreadPriority::default(),
        }
    }
}

impl PacerConfig {
    /// Units buffered before the first packet is released
    pub fn effective_fill_threshold(&self) -> usize {
        self.fill_threshold.unwrap_or(match self.latency {
            LatencyMode::Normal => DEFAULT_FILL_THRESHOLD,
            LatencyMode::Lowest => 0,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticks_per_second == 0 {
            return Err(Error::Config("pacer.ticks_per_second must be positive".to_string()));
        }
        if !(1..=MAX_TS_PACKETS_PER_DATAGRAM).contains(&self.packets_per_datagram) {
            return Err(Error::Config(format!(
                "pacer.packets_per_datagram must be 1..={}",
                MAX_TS_PACKETS_PER_DATAGRAM
            )));
        }
        Ok(())
    }
}

/// Test-pattern source used by the sender binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Transport stream bitrate in bits per second
    pub bitrate: u64,
    /// Packets per multiplexed unit
    pub packets_per_unit: usize,
    /// Run time in seconds (0 = forever)
    pub duration_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bitrate: 2_000_000,
            packets_per_unit: MAX_TS_PACKETS_PER_DATAGRAM,
            duration_secs: 10,
        }
    }
}

/// Receiver diagnostics used by the monitor binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Local address to listen on
    pub bind_address: String,
    /// Multicast group to join, if any
    pub multicast_group: Option<String>,
    /// Seconds between reports
    pub report_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_UDP_PORT),
            multicast_group: None,
            report_interval_secs: 5,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.pacer, PacerConfig::default());
        assert_eq!(config.pacer.effective_fill_threshold(), DEFAULT_FILL_THRESHOLD);
        assert_eq!(config.pacer.ticks_per_second, 27_000_000);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_parse_pacer_section() {
        let config = AppConfig::from_toml_str(
            r#"
            [output]
            destination = "udp://239.1.1.1:5000?ttl=4"

            [pacer]
            latency = "lowest"
            packets_per_datagram = 7
            priority = "normal"
            "#,
        )
        .unwrap();

        assert_eq!(config.output.destination, "udp://239.1.1.1:5000?ttl=4");
        assert_eq!(config.pacer.effective_fill_threshold(), 0);
        assert_eq!(config.pacer.packets_per_datagram, 7);
        assert_eq!(config.pacer.priority, ThreadPriority::Normal);
    }

    #[test]
    fn test_fill_threshold_override() {
        let pacer = PacerConfig {
            latency: LatencyMode::Lowest,
            fill_threshold: Some(5),
            ..Default::default()
        };
        assert_eq!(pacer.effective_fill_threshold(), 5);
    }

    #[test]
    fn test_validation() {
        assert!(AppConfig::from_toml_str("[pacer]\npackets_per_datagram = 8").is_err());
        assert!(AppConfig::from_toml_str("[pacer]\nticks_per_second = 0").is_err());
        assert!(AppConfig::from_toml_str("[source]\nbitrate = 0").is_err());
        assert!(AppConfig::from_toml_str("[pacer]\nlatency = \"fast\"").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.pacer, config.pacer);
        assert_eq!(parsed.output.destination, config.output.destination);
    }
}
