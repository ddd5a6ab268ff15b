use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the bluewatch sensor.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bluetooth adapter the probes target. Default: "hci0".
    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Pipeline queue and reporting configuration.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Merge engine and status sweep configuration.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Active probe scheduling configuration.
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Pipeline queue and reporting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the raw line queue. Default: 4096.
    #[serde(default = "default_line_queue_capacity")]
    pub line_queue_capacity: usize,

    /// Capacity of the chunk and attribute queues. Default: 512.
    #[serde(default = "default_chunk_queue_capacity")]
    pub chunk_queue_capacity: usize,

    /// How often to report throughput counters. Default: 60s.
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,
}

/// Merge engine and status sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    /// Interval between reconciliation sweeps. Default: 60s.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Silence timeout before a classic device goes offline. Default: 15m.
    #[serde(default = "default_classic_timeout", with = "humantime_serde")]
    pub classic_timeout: Duration,

    /// Silence timeout before an LE device goes offline. Default: 3m.
    #[serde(default = "default_le_timeout", with = "humantime_serde")]
    pub le_timeout: Duration,
}

/// Active probe scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Minimum interval between info probes of one address. Default: 15m.
    #[serde(default = "default_info_scan_interval", with = "humantime_serde")]
    pub info_scan_interval: Duration,

    /// Minimum interval between liveness pings of one address. Default: 5m.
    #[serde(default = "default_l2ping_interval", with = "humantime_serde")]
    pub l2ping_interval: Duration,

    /// Interval between classic re-ping sweeps. Default: 60s.
    #[serde(default = "default_l2ping_sweep_interval", with = "humantime_serde")]
    pub l2ping_sweep_interval: Duration,

    /// Timeout for a single hardware command. Default: 5s.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Timeout for a passive discovery pass. Default: 30s.
    #[serde(default = "default_discovery_timeout", with = "humantime_serde")]
    pub discovery_timeout: Duration,

    /// Pause between drain cycles when both queues are idle. Default: 1s.
    #[serde(default = "default_idle_delay", with = "humantime_serde")]
    pub idle_delay: Duration,

    /// Override for the passive discovery command; the default targets the
    /// configured adapter via btmgmt.
    #[serde(default)]
    pub discovery_command: Option<String>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_adapter() -> String {
    "hci0".to_string()
}

fn default_line_queue_capacity() -> usize {
    4096
}

fn default_chunk_queue_capacity() -> usize {
    512
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_classic_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_le_timeout() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_info_scan_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_l2ping_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_l2ping_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_discovery_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_delay() -> Duration {
    Duration::from_secs(1)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            adapter: default_adapter(),
            pipeline: PipelineConfig::default(),
            merge: MergeConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            line_queue_capacity: default_line_queue_capacity(),
            chunk_queue_capacity: default_chunk_queue_capacity(),
            stats_interval: default_stats_interval(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            classic_timeout: default_classic_timeout(),
            le_timeout: default_le_timeout(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            info_scan_interval: default_info_scan_interval(),
            l2ping_interval: default_l2ping_interval(),
            l2ping_sweep_interval: default_l2ping_sweep_interval(),
            command_timeout: default_command_timeout(),
            discovery_timeout: default_discovery_timeout(),
            idle_delay: default_idle_delay(),
            discovery_command: None,
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.adapter.is_empty() {
            bail!("adapter is required");
        }

        if self.pipeline.line_queue_capacity == 0 {
            bail!("pipeline.line_queue_capacity must be positive");
        }
        if self.pipeline.chunk_queue_capacity == 0 {
            bail!("pipeline.chunk_queue_capacity must be positive");
        }
        if self.pipeline.stats_interval.is_zero() {
            bail!("pipeline.stats_interval must be positive");
        }

        if self.merge.sweep_interval.is_zero() {
            bail!("merge.sweep_interval must be positive");
        }
        if self.merge.classic_timeout.is_zero() {
            bail!("merge.classic_timeout must be positive");
        }
        if self.merge.le_timeout.is_zero() {
            bail!("merge.le_timeout must be positive");
        }

        if self.probe.info_scan_interval.is_zero() {
            bail!("probe.info_scan_interval must be positive");
        }
        if self.probe.l2ping_interval.is_zero() {
            bail!("probe.l2ping_interval must be positive");
        }
        if self.probe.l2ping_sweep_interval.is_zero() {
            bail!("probe.l2ping_sweep_interval must be positive");
        }
        if self.probe.command_timeout.is_zero() {
            bail!("probe.command_timeout must be positive");
        }
        if self.probe.discovery_timeout.is_zero() {
            bail!("probe.discovery_timeout must be positive");
        }

        if let Some(cmd) = &self.probe.discovery_command {
            if cmd.trim().is_empty() {
                bail!("probe.discovery_command must not be blank when set");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.adapter, "hci0");
        assert_eq!(cfg.merge.classic_timeout, Duration::from_secs(900));
        assert_eq!(cfg.merge.le_timeout, Duration::from_secs(180));
        assert_eq!(cfg.probe.info_scan_interval, Duration::from_secs(900));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "adapter: hci1\nprobe:\n  command_timeout: 10s\n  info_scan_interval: 30m\n",
        )
        .expect("valid yaml");

        assert_eq!(cfg.adapter, "hci1");
        assert_eq!(cfg.probe.command_timeout, Duration::from_secs(10));
        assert_eq!(cfg.probe.info_scan_interval, Duration::from_secs(1800));
        // Untouched sections keep their defaults.
        assert_eq!(cfg.merge.le_timeout, Duration::from_secs(180));
        assert_eq!(cfg.pipeline.line_queue_capacity, 4096);
    }

    #[test]
    fn test_validation_rejects_empty_adapter() {
        let cfg = Config {
            adapter: String::new(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("adapter"));
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut cfg = Config::default();
        cfg.pipeline.line_queue_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("line_queue_capacity"));
    }

    #[test]
    fn test_validation_rejects_zero_timeouts() {
        let mut cfg = Config::default();
        cfg.merge.le_timeout = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("le_timeout"));

        let mut cfg = Config::default();
        cfg.probe.command_timeout = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("command_timeout"));
    }

    #[test]
    fn test_validation_rejects_blank_discovery_command() {
        let mut cfg = Config::default();
        cfg.probe.discovery_command = Some("   ".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("discovery_command"));
    }
}
