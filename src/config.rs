//! Engine Configuration Module
//!
//! Defines the frozen configuration object constructed once at
//! initialization and passed by reference into every component.
//! Nothing here is mutated at request time.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Thresholds for the five general confidence bands.
/// Lower bounds are inclusive: a calibrated confidence exactly at a
/// threshold maps to the higher band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BandThresholds {
    pub very_high: f32,
    pub high: f32,
    pub medium: f32,
    pub low: f32,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            very_high: 0.85,
            high: 0.70,
            medium: 0.50,
            low: 0.30,
        }
    }
}

/// Separate thresholds for "is this healthy" decisions. A false "healthy"
/// call is more harmful than a false disease alarm, so healthy claims need
/// a stricter table than the general bands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthyThresholds {
    /// Can say "healthy" outright
    pub confident: f32,
    /// Can say "likely healthy", shown with a caveat
    pub likely: f32,
}

impl Default for HealthyThresholds {
    fn default() -> Self {
        Self {
            confident: 0.80,
            likely: 0.60,
        }
    }
}

/// Engine-wide configuration, immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model input size (square, pixels)
    pub input_size: u32,

    /// Number of ranked predictions to include in reports
    pub top_k: usize,

    /// General confidence bands
    pub bands: BandThresholds,

    /// Healthy-specific thresholds
    pub healthy: HealthyThresholds,

    /// Global calibrated-confidence floor below which results are escalated
    pub confidence_floor: f32,

    /// Quality score (0-100) below which an image is flagged unsuitable
    pub quality_threshold: f32,

    /// Whether test-time augmentation is enabled by default
    pub use_tta: bool,

    /// Default number of TTA variants
    pub tta_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            top_k: 5,
            bands: BandThresholds::default(),
            healthy: HealthyThresholds::default(),
            confidence_floor: 0.60,
            quality_threshold: 50.0,
            use_tta: true,
            tta_size: 5,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(CoreError::Config(
                "input_size must be greater than 0".to_string(),
            ));
        }

        if self.top_k == 0 {
            return Err(CoreError::Config("top_k must be at least 1".to_string()));
        }

        let b = &self.bands;
        if !(b.low < b.medium && b.medium < b.high && b.high < b.very_high) {
            return Err(CoreError::Config(
                "band thresholds must be strictly increasing".to_string(),
            ));
        }
        if b.low < 0.0 || b.very_high > 1.0 {
            return Err(CoreError::Config(
                "band thresholds must lie in [0, 1]".to_string(),
            ));
        }

        if self.healthy.likely >= self.healthy.confident {
            return Err(CoreError::Config(
                "healthy 'likely' threshold must be below 'confident'".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(CoreError::Config(
                "confidence_floor must lie in [0, 1]".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.quality_threshold) {
            return Err(CoreError::Config(
                "quality_threshold must lie in [0, 100]".to_string(),
            ));
        }

        if self.tta_size == 0 {
            return Err(CoreError::Config(
                "tta_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
