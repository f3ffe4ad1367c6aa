//! Extraction engine configuration.
//!
//! All knobs that change extraction output or resource use live here. The
//! defaults reproduce the classic behavior: no statistics, coordinates
//! converted to BD09, no rule ids in the attribute map.

use crate::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};

/// Default upper bound for decompressed content (16 MiB).
pub const DEFAULT_MAX_INFLATE_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for [`crate::Extractor`].
///
/// # Presets
///
/// | Preset | Stats | Coordinates | Rule ids |
/// |--------|-------|-------------|----------|
/// | `default()` | off | BD09 | off |
/// | `with_stats()` | on | BD09 | off |
/// | `diagnostic()` | on | BD09 | on |
///
/// # Examples
///
/// ```rust
/// use pie_extractor::ExtractorConfig;
///
/// let config = ExtractorConfig {
///     collect_stats: true,
///     ..ExtractorConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Merge a per-rule appear/hit/fail record into the statistics table
    /// after every rule evaluation.
    ///
    /// **Default**: false
    pub collect_stats: bool,

    /// Keep longitude/latitude values in the coordinate system the rule
    /// declares instead of converting them to BD09.
    ///
    /// **Default**: false
    pub output_origin_lbs: bool,

    /// Add a `RULE_ID` attribute listing the ids of every rule that produced
    /// output, joined with `|`.
    ///
    /// **Default**: false
    pub output_rule_id: bool,

    /// Largest decompressed body a GZIP/ZLIB/DEFLATE codec may produce.
    /// Larger outputs fail the codec step.
    ///
    /// **Default**: 16 MiB
    pub max_inflate_size: usize,

    /// Minimum number of inputs before [`crate::Extractor::extract_batch`]
    /// spreads work over the rayon pool.
    ///
    /// **Default**: 16
    pub parallel_batch_threshold: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            collect_stats: false,
            output_origin_lbs: false,
            output_rule_id: false,
            max_inflate_size: DEFAULT_MAX_INFLATE_SIZE,
            parallel_batch_threshold: 16,
        }
    }
}

impl ExtractorConfig {
    /// Default configuration with statistics collection enabled.
    pub fn with_stats() -> Self {
        Self {
            collect_stats: true,
            ..Self::default()
        }
    }

    /// Statistics plus rule ids in the attribute map.
    pub fn diagnostic() -> Self {
        Self {
            collect_stats: true,
            output_rule_id: true,
            ..Self::default()
        }
    }

    /// Load a configuration from YAML. Missing fields take their defaults.
    ///
    /// ```rust
    /// use pie_extractor::ExtractorConfig;
    ///
    /// let config = ExtractorConfig::from_yaml_str("collect_stats: true\n").unwrap();
    /// assert!(config.collect_stats);
    /// assert!(!config.output_origin_lbs);
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ExtractError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot extract anything.
    pub fn validate(&self) -> Result<()> {
        if self.max_inflate_size == 0 {
            return Err(ExtractError::Config(
                "max_inflate_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
