//! Confidence Calibration Module
//!
//! Maps the raw softmax top probability to a calibrated confidence using a
//! pre-fit curve (softmax scores from deep classifiers are known to be
//! overconfident), and computes an independent uncertainty scalar from the
//! aggregate distribution's entropy and the ensemble disagreement.
//!
//! Curve parameters are static configuration fit offline; nothing is fit
//! at request time. Both supported curve forms are monotonic
//! non-decreasing, so calibration never inverts the ranking of raw scores.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassProbabilityVector;
use crate::config::{BandThresholds, HealthyThresholds};
use crate::error::{CoreError, Result};

/// Clamp bound keeping logits finite
const PROB_EPS: f32 = 1e-6;

/// Discrete confidence band derived from calibrated confidence.
/// Lower bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    /// Highest band whose lower bound is <= the calibrated confidence.
    pub fn from_confidence(calibrated: f32, bands: &BandThresholds) -> Self {
        if calibrated >= bands.very_high {
            Self::VeryHigh
        } else if calibrated >= bands.high {
            Self::High
        } else if calibrated >= bands.medium {
            Self::Medium
        } else if calibrated >= bands.low {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::VeryHigh => "very_high",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very_low",
        };
        write!(f, "{}", label)
    }
}

/// Healthy-specific confidence band. Separate from the general bands
/// because a false "healthy" call is worse than a false disease alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthyBand {
    Confident,
    Likely,
    Uncertain,
}

impl HealthyBand {
    pub fn from_confidence(calibrated: f32, thresholds: &HealthyThresholds) -> Self {
        if calibrated >= thresholds.confident {
            Self::Confident
        } else if calibrated >= thresholds.likely {
            Self::Likely
        } else {
            Self::Uncertain
        }
    }
}

/// Pre-fit calibration curve form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalibrationCurve {
    /// `sigmoid(logit(p) / T)`. T > 1 softens overconfident scores.
    Temperature { temperature: f32 },
    /// Monotone piecewise-linear lookup fit offline; `points` are
    /// `[raw, calibrated]` pairs sorted by raw confidence.
    Isotonic { points: Vec<[f32; 2]> },
}

impl Default for CalibrationCurve {
    fn default() -> Self {
        Self::Temperature { temperature: 1.5 }
    }
}

/// Static calibration configuration, loaded once at initialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationConfig {
    #[serde(flatten)]
    pub curve: CalibrationCurve,

    /// Weight of normalized entropy in the uncertainty combination
    pub entropy_weight: f32,

    /// Weight of (1 - ensemble agreement) in the uncertainty combination
    pub disagreement_weight: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            curve: CalibrationCurve::default(),
            entropy_weight: 0.6,
            disagreement_weight: 0.4,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        match &self.curve {
            CalibrationCurve::Temperature { temperature } => {
                if *temperature <= 0.0 || !temperature.is_finite() {
                    return Err(CoreError::Config(
                        "calibration temperature must be positive".to_string(),
                    ));
                }
            }
            CalibrationCurve::Isotonic { points } => {
                if points.len() < 2 {
                    return Err(CoreError::Config(
                        "isotonic curve needs at least two points".to_string(),
                    ));
                }
                for pair in points.windows(2) {
                    if pair[1][0] < pair[0][0] || pair[1][1] < pair[0][1] {
                        return Err(CoreError::Config(
                            "isotonic curve points must be monotonic non-decreasing".to_string(),
                        ));
                    }
                }
                if points
                    .iter()
                    .any(|p| !(0.0..=1.0).contains(&p[0]) || !(0.0..=1.0).contains(&p[1]))
                {
                    return Err(CoreError::Config(
                        "isotonic curve points must lie in [0, 1]".to_string(),
                    ));
                }
            }
        }

        if self.entropy_weight < 0.0 || self.disagreement_weight < 0.0 {
            return Err(CoreError::Config(
                "uncertainty weights must be non-negative".to_string(),
            ));
        }
        if self.entropy_weight + self.disagreement_weight <= 0.0 {
            return Err(CoreError::Config(
                "uncertainty weights must not both be zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Applies the pre-fit curve and computes uncertainty.
#[derive(Debug, Clone)]
pub struct ConfidenceCalibrator {
    config: CalibrationConfig,
}

impl ConfidenceCalibrator {
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Map a raw top probability to a calibrated confidence in [0, 1].
    pub fn calibrate(&self, raw: f32) -> f32 {
        let raw = raw.clamp(0.0, 1.0);
        let calibrated = match &self.config.curve {
            CalibrationCurve::Temperature { temperature } => {
                let p = raw.clamp(PROB_EPS, 1.0 - PROB_EPS);
                let logit = (p / (1.0 - p)).ln();
                sigmoid(logit / temperature)
            }
            CalibrationCurve::Isotonic { points } => interpolate(points, raw),
        };
        calibrated.clamp(0.0, 1.0)
    }

    /// Single uncertainty scalar in [0, 1]: a fixed weighted average of
    /// the aggregate distribution's normalized entropy and the ensemble
    /// disagreement.
    pub fn uncertainty(&self, aggregate: &ClassProbabilityVector, agreement: f32) -> f32 {
        let entropy = aggregate.normalized_entropy();
        let disagreement = (1.0 - agreement).clamp(0.0, 1.0);
        let w_sum = self.config.entropy_weight + self.config.disagreement_weight;
        let combined = (self.config.entropy_weight * entropy
            + self.config.disagreement_weight * disagreement)
            / w_sum;
        combined.clamp(0.0, 1.0)
    }
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Piecewise-linear interpolation over sorted `[x, y]` points, clamped to
/// the endpoint values outside the fitted range.
fn interpolate(points: &[[f32; 2]], x: f32) -> f32 {
    let first = points[0];
    let last = points[points.len() - 1];
    if x <= first[0] {
        return first[1];
    }
    if x >= last[0] {
        return last[1];
    }

    let mut lo = 0;
    let mut hi = points.len() - 1;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if points[mid][0] <= x {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let [x0, y0] = points[lo];
    let [x1, y1] = points[hi];
    if (x1 - x0).abs() < PROB_EPS {
        return y0;
    }
    let t = (x - x0) / (x1 - x0);
    y0 + t * (y1 - y0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn calibrator() -> ConfidenceCalibrator {
        ConfidenceCalibrator::new(CalibrationConfig::default()).unwrap()
    }

    #[test]
    fn test_temperature_is_monotonic() {
        let cal = calibrator();
        let mut prev = -1.0;
        for i in 0..=100 {
            let raw = i as f32 / 100.0;
            let c = cal.calibrate(raw);
            assert!(c >= prev, "calibration inverted ranking at raw={}", raw);
            assert!((0.0..=1.0).contains(&c));
            prev = c;
        }
    }

    #[test]
    fn test_temperature_softens_overconfidence() {
        let cal = calibrator();
        // T = 1.5 pulls high raw confidences toward 0.5
        assert!(cal.calibrate(0.95) < 0.95);
        assert!(cal.calibrate(0.05) > 0.05);
    }

    #[test]
    fn test_isotonic_curve() {
        let config = CalibrationConfig {
            curve: CalibrationCurve::Isotonic {
                points: vec![[0.0, 0.0], [0.5, 0.3], [1.0, 1.0]],
            },
            ..Default::default()
        };
        let cal = ConfidenceCalibrator::new(config).unwrap();

        assert!((cal.calibrate(0.5) - 0.3).abs() < 1e-6);
        assert!((cal.calibrate(0.75) - 0.65).abs() < 1e-6); // midway up the top segment
        assert_eq!(cal.calibrate(0.0), 0.0);
        assert_eq!(cal.calibrate(1.0), 1.0);

        let mut prev = -1.0;
        for i in 0..=50 {
            let c = cal.calibrate(i as f32 / 50.0);
            assert!(c >= prev);
            prev = c;
        }
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let config = CalibrationConfig {
            curve: CalibrationCurve::Temperature { temperature: -1.0 },
            ..Default::default()
        };
        assert!(ConfidenceCalibrator::new(config).is_err());

        let config = CalibrationConfig {
            curve: CalibrationCurve::Isotonic {
                points: vec![[0.0, 0.5], [1.0, 0.2]], // decreasing
            },
            ..Default::default()
        };
        assert!(ConfidenceCalibrator::new(config).is_err());
    }

    #[test]
    fn test_band_lower_bounds_inclusive() {
        let bands = BandThresholds::default();
        assert_eq!(
            ConfidenceLevel::from_confidence(0.85, &bands),
            ConfidenceLevel::VeryHigh
        );
        assert_eq!(
            ConfidenceLevel::from_confidence(0.70, &bands),
            ConfidenceLevel::High
        );
        assert_eq!(
            ConfidenceLevel::from_confidence(0.699, &bands),
            ConfidenceLevel::Medium
        );
        assert_eq!(
            ConfidenceLevel::from_confidence(0.50, &bands),
            ConfidenceLevel::Medium
        );
        assert_eq!(
            ConfidenceLevel::from_confidence(0.30, &bands),
            ConfidenceLevel::Low
        );
        assert_eq!(
            ConfidenceLevel::from_confidence(0.1, &bands),
            ConfidenceLevel::VeryLow
        );
    }

    #[test]
    fn test_healthy_bands() {
        let t = HealthyThresholds::default();
        assert_eq!(HealthyBand::from_confidence(0.80, &t), HealthyBand::Confident);
        assert_eq!(HealthyBand::from_confidence(0.65, &t), HealthyBand::Likely);
        assert_eq!(HealthyBand::from_confidence(0.59, &t), HealthyBand::Uncertain);
    }

    #[test]
    fn test_uncertainty_bounds_and_ordering() {
        let cal = calibrator();

        let uniform = ClassProbabilityVector::new(Array1::from_elem(5, 0.2)).unwrap();
        let peaked = ClassProbabilityVector::new(array![0.96, 0.01, 0.01, 0.01, 0.01]).unwrap();

        let u_uniform = cal.uncertainty(&uniform, 0.4);
        let u_peaked = cal.uncertainty(&peaked, 1.0);

        assert!((0.0..=1.0).contains(&u_uniform));
        assert!((0.0..=1.0).contains(&u_peaked));
        assert!(u_uniform > u_peaked);

        // Full agreement and zero entropy: uncertainty at its floor
        let certain = ClassProbabilityVector::new(array![1.0, 0.0, 0.0]).unwrap();
        assert!(cal.uncertainty(&certain, 1.0) < 1e-5);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");

        let config = CalibrationConfig::default();
        config.save(&path).unwrap();
        let loaded = CalibrationConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
