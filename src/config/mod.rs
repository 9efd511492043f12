//! Configuration types for the fusion pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for one acoustic channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name as it appears in export filenames (e.g. "38kHz")
    pub name: String,

    /// Nominal transducer frequency in kHz
    pub frequency_khz: f64,

    /// Layers whose nominal depth exceeds this cutoff are discarded
    #[serde(default = "default_max_depth_m")]
    pub max_depth_m: f64,
}

fn default_max_depth_m() -> f64 {
    f64::INFINITY
}

impl ChannelConfig {
    /// Create a channel with the default (unbounded) depth cutoff.
    pub fn new(name: &str, frequency_khz: f64) -> Self {
        Self {
            name: name.to_string(),
            frequency_khz,
            max_depth_m: default_max_depth_m(),
        }
    }
}

/// Quality gating and flagging thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Cells whose percent-good falls below this value are dropped;
    /// cells must exceed it to be flagged good
    #[serde(default = "default_min_percent_good")]
    pub min_percent_good: f64,

    /// A (channel, interval) column needs at least this many good cells
    /// to keep its good flags
    #[serde(default = "default_min_good_cells")]
    pub min_good_cells: usize,
}

fn default_min_percent_good() -> f64 {
    50.0
}

fn default_min_good_cells() -> usize {
    1
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_percent_good: default_min_percent_good(),
            min_good_cells: default_min_good_cells(),
        }
    }
}

/// Upstream export quirks: sentinel encodings and table strides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Payload values at or below this dB floor are treated as missing
    #[serde(default = "default_sentinel_floor_db")]
    pub sentinel_floor_db: f64,

    /// Exact dB value the exporter writes for "no data"
    #[serde(default = "default_sentinel_db")]
    pub sentinel_db: f64,

    /// Row stride when consuming the background-noise table
    #[serde(default = "default_noise_row_stride")]
    pub noise_row_stride: usize,
}

fn default_sentinel_floor_db() -> f64 {
    -999.0
}

fn default_sentinel_db() -> f64 {
    9999.0
}

fn default_noise_row_stride() -> usize {
    1
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sentinel_floor_db: default_sentinel_floor_db(),
            sentinel_db: default_sentinel_db(),
            noise_row_stride: default_noise_row_stride(),
        }
    }
}

/// Main fusion configuration combining all sub-configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Channels in fold order; the first channel of a batch establishes
    /// the time baseline that later channels extend
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub export: ExportConfig,

    /// Retain the higher-order statistic fields (skewness, kurtosis,
    /// standard deviation)
    #[serde(default)]
    pub extended: bool,
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new("38kHz", 38.0),
        ChannelConfig::new("120kHz", 120.0),
    ]
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            quality: QualityConfig::default(),
            export: ExportConfig::default(),
            extended: false,
        }
    }
}

impl FusionConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: FusionConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Index of a channel by its export name, if configured.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FusionConfig::default();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.quality.min_percent_good, 50.0);
        assert_eq!(config.export.noise_row_stride, 1);
        assert!(!config.extended);
    }

    #[test]
    fn test_channel_index() {
        let config = FusionConfig::default();
        assert_eq!(config.channel_index("38kHz"), Some(0));
        assert_eq!(config.channel_index("120kHz"), Some(1));
        assert_eq!(config.channel_index("200kHz"), None);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "channels:\n  - name: 70kHz\n    frequency_khz: 70.0\n";
        let config: FusionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.channels.len(), 1);
        assert!(config.channels[0].max_depth_m.is_infinite());
        assert_eq!(config.quality.min_good_cells, 1);
    }
}
