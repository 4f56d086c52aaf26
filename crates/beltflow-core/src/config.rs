//! Balancer configuration.
//!
//! [`BalancerConfig`] can be built in code or loaded from a RON, TOML or JSON
//! file, the format picked by extension. Missing fields take their defaults.
//!
//! ```toml
//! max_split = 3
//! max_merge = 3
//! bottleneck = { threshold = "120" }
//! strategy = "factorized"
//! ```

use crate::arith::FactorOrder;
use crate::ratio::Ratio;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be at least 2, got {value}")]
    FanTooSmall { field: &'static str, value: usize },

    #[error("max_outputs must be positive")]
    ZeroOutputLimit,

    #[error("bottleneck threshold must be positive, got {0}")]
    NonPositiveThreshold(Ratio),

    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Settings
// ===========================================================================

/// What to do about links that carry more than a root produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckPolicy {
    /// Leave loopback bottlenecks in place.
    Skip,
    /// Each root's own output is the per-link limit.
    #[default]
    Auto,
    /// A fixed per-link limit.
    Threshold(Ratio),
}

impl BottleneckPolicy {
    /// `None` to skip, otherwise the explicit limit (if any).
    pub fn threshold(&self) -> Option<Option<Ratio>> {
        match self {
            BottleneckPolicy::Skip => None,
            BottleneckPolicy::Auto => Some(None),
            BottleneckPolicy::Threshold(limit) => Some(Some(*limit)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Smallest-factor splitting with loopbacks for awkward counts.
    #[default]
    Even,
    /// Round up to a smooth count and feed the surplus back.
    Factorized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Most outputs a single splitter may have.
    pub max_split: usize,
    /// Most inputs a single merger may have.
    pub max_merge: usize,
    pub bottleneck: BottleneckPolicy,
    pub strategy: SplitStrategy,
    /// Factorized strategy only: split by smaller factors first.
    pub smaller_splits_first: bool,
    /// Factorized strategy only: deepest level at which surplus may still be
    /// divided before it is fed back.
    pub merge_level: Option<usize>,
    /// Upper bound on the leaves a single plan may create.
    pub max_outputs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_split: 3,
            max_merge: 3,
            bottleneck: BottleneckPolicy::Auto,
            strategy: SplitStrategy::Even,
            smaller_splits_first: true,
            merge_level: None,
            max_outputs: 10_000,
        }
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_split < 2 {
            return Err(ConfigError::FanTooSmall {
                field: "max_split",
                value: self.max_split,
            });
        }
        if self.max_merge < 2 {
            return Err(ConfigError::FanTooSmall {
                field: "max_merge",
                value: self.max_merge,
            });
        }
        if self.max_outputs == 0 {
            return Err(ConfigError::ZeroOutputLimit);
        }
        if let BottleneckPolicy::Threshold(limit) = self.bottleneck
            && !limit.is_positive()
        {
            return Err(ConfigError::NonPositiveThreshold(limit));
        }
        Ok(())
    }

    pub fn factor_order(&self) -> FactorOrder {
        if self.smaller_splits_first {
            FactorOrder::Ascending
        } else {
            FactorOrder::Descending
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = deserialize_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

// ===========================================================================
// File loading
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(ConfigError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

/// Parse `content` in the given format.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, ConfigError> {
    let parse_error = |detail: String| ConfigError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}
