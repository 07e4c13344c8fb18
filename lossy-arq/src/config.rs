//! Channel configuration: impairment probabilities plus ARQ window/timer.
//!
//! The configuration is a flat JSON document with camelCase keys:
//!
//! ```json
//! {
//!   "eliminateProbability": 10,
//!   "cutProbability": 0,
//!   "cutBytes": 1024,
//!   "delayProbability": 5,
//!   "delayMS": 200,
//!   "corruptProbability": 5,
//!   "duplicateProbability": 5,
//!   "windowSize": 4,
//!   "timeoutMS": 500
//! }
//! ```
//!
//! Missing keys take the values of [`ImpairmentConfig::default`] (a clean
//! channel).  `timeout` is accepted as a legacy spelling of `timeoutMS`.
//! Once loaded the record is immutable and shared through an `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::segment::MAX_DATAGRAM;

/// Impairment and protocol parameters.  Probabilities are percentages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImpairmentConfig {
    pub eliminate_probability: u32,
    pub cut_probability: u32,
    /// Length a cut datagram is truncated to.
    pub cut_bytes: u32,
    pub delay_probability: u32,
    #[serde(rename = "delayMS")]
    pub delay_ms: u64,
    pub corrupt_probability: u32,
    pub duplicate_probability: u32,
    /// Go-Back-N window (segments in flight).
    pub window_size: u32,
    #[serde(rename = "timeoutMS", alias = "timeout")]
    pub timeout_ms: u64,
    /// Abort a send session after this many timeouts without progress.
    /// `0` retransmits forever.
    pub max_consecutive_timeouts: u32,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        Self {
            eliminate_probability: 0,
            cut_probability: 0,
            cut_bytes: MAX_DATAGRAM as u32,
            delay_probability: 0,
            delay_ms: 0,
            corrupt_probability: 0,
            duplicate_probability: 0,
            window_size: 4,
            timeout_ms: 1000,
            max_consecutive_timeouts: 0,
        }
    }
}

impl ImpairmentConfig {
    /// A channel that never impairs anything.
    pub fn lossless(window_size: u32, timeout_ms: u64) -> Self {
        Self {
            window_size,
            timeout_ms,
            ..Self::default()
        }
    }

    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let probabilities = [
            ("eliminateProbability", self.eliminate_probability),
            ("cutProbability", self.cut_probability),
            ("delayProbability", self.delay_probability),
            ("corruptProbability", self.corrupt_probability),
            ("duplicateProbability", self.duplicate_probability),
        ];
        for (field, value) in probabilities {
            if value > 100 {
                return Err(ConfigError::ProbabilityOutOfRange { field, value });
            }
        }
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be within 0..=100, got {value}")]
    ProbabilityOutOfRange { field: &'static str, value: u32 },
    #[error("windowSize must be at least 1")]
    ZeroWindow,
    #[error("timeoutMS must be at least 1")]
    ZeroTimeout,
}
