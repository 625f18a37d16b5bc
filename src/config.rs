//! Engine configuration inputs
//!
//! Consumers select a persistence window for the event engine and a noise
//! filter level for zone aggregation. Calibration thresholds live as named
//! constants at the top of the module that uses them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How long the event engine keeps a tracked zone alive, measured from
/// first detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistenceWindow {
    #[serde(rename = "15M")]
    Min15,
    #[serde(rename = "30M")]
    Min30,
    #[serde(rename = "60M")]
    Min60,
    /// Full-session tracking (8 hours).
    Session,
}

impl PersistenceWindow {
    /// Window length in milliseconds.
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Min15 => 15 * 60_000,
            Self::Min30 => 30 * 60_000,
            Self::Min60 => 60 * 60_000,
            Self::Session => 480 * 60_000,
        }
    }
}

impl Default for PersistenceWindow {
    fn default() -> Self {
        Self::Min30
    }
}

/// Noise filter strictness for smart zone aggregation.
///
/// Maps to a noise-score cutoff: a zone survives only if its noise score is
/// below the cutoff, so stricter settings keep fewer zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoiseLevel {
    Low,
    Medium,
    High,
    /// Volatility-aware cutoff: strict in volatile tape, relaxed otherwise.
    Auto,
}

impl NoiseLevel {
    /// Noise-score cutoff for this level. `volatility` is the grouping
    /// engine's rolling price stdev, consulted only by `Auto`.
    pub fn cutoff(self, volatility: f64) -> f64 {
        match self {
            Self::Low => 80.0,
            Self::Medium => 60.0,
            Self::High => 40.0,
            Self::Auto => {
                if volatility > 20.0 {
                    30.0
                } else {
                    60.0
                }
            }
        }
    }
}

impl Default for NoiseLevel {
    fn default() -> Self {
        Self::Medium
    }
}
