//! Image Quality Gate Module
//!
//! Pre-inference check that scores an image's usability for disease
//! detection and produces remediation hints for unusable captures.
//! The gate is advisory: it never hard-blocks, it only informs the
//! decision policy and the caller, who may force inference anyway.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Weight of each metric in the overall 0-100 quality score.
pub const WEIGHT_SHARPNESS: f32 = 0.25;
pub const WEIGHT_BRIGHTNESS: f32 = 0.15;
pub const WEIGHT_CONTRAST: f32 = 0.15;
pub const WEIGHT_NOISE: f32 = 0.15;
pub const WEIGHT_COLOR_BALANCE: f32 = 0.15;
pub const WEIGHT_RESOLUTION: f32 = 0.15;

/// Default score below which an image is flagged unsuitable.
pub const DEFAULT_QUALITY_THRESHOLD: f32 = 50.0;

/// Discrete quality description derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityDescription {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

impl QualityDescription {
    fn from_score(score: f32) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 60.0 {
            Self::Good
        } else if score >= 40.0 {
            Self::Fair
        } else if score >= 20.0 {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }
}

impl std::fmt::Display for QualityDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
            Self::VeryPoor => "Very Poor",
        };
        write!(f, "{}", s)
    }
}

/// Full quality assessment of one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Mean gray level (0-255)
    pub brightness: f32,
    /// Standard deviation of gray levels
    pub contrast: f32,
    /// Laplacian variance; higher is sharper
    pub sharpness: f32,
    /// Noise estimate in (0, 1]; lower is cleaner
    pub noise_level: f32,
    /// Channel balance (0-100); 100 is perfectly balanced
    pub color_balance: f32,
    /// Width and height in pixels
    pub resolution: (u32, u32),
    /// Overall weighted score (0-100)
    pub quality_score: f32,
    /// Discrete description band
    pub description: QualityDescription,
    /// Human-readable remediation hints
    pub recommendations: Vec<String>,
}

impl QualityAssessment {
    /// Whether the image clears the given suitability threshold.
    pub fn is_suitable(&self, threshold: f32) -> bool {
        self.quality_score >= threshold
    }
}

/// Computes quality assessments. Stateless and pure.
#[derive(Debug, Clone)]
pub struct QualityGate {
    threshold: f32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_QUALITY_THRESHOLD,
        }
    }
}

impl QualityGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Assess an already-decoded image.
    pub fn assess(&self, image: &DynamicImage) -> Result<QualityAssessment> {
        let gray = image.to_luma8();
        let rgb = image.to_rgb8();
        let (width, height) = (image.width(), image.height());

        let gray_f: Vec<f32> = gray.pixels().map(|p| p.0[0] as f32).collect();

        let brightness = mean(&gray_f);
        let contrast = std_dev(&gray_f, brightness);

        let laplacian = laplacian_response(&gray_f, width as usize, height as usize);
        let lap_mean = mean(&laplacian);
        let sharpness = variance(&laplacian, lap_mean);
        let lap_std = sharpness.sqrt();
        // Flat images have zero Laplacian response; treat them as maximally noisy
        let noise_level = 1.0 / (1.0 + lap_std);

        let color_balance = color_balance(&rgb);

        let quality_score = overall_score(
            brightness,
            contrast,
            sharpness,
            noise_level,
            color_balance,
            (width, height),
        );

        let recommendations =
            recommendations(brightness, contrast, sharpness, noise_level, color_balance);

        Ok(QualityAssessment {
            brightness,
            contrast,
            sharpness,
            noise_level,
            color_balance,
            resolution: (width, height),
            quality_score,
            description: QualityDescription::from_score(quality_score),
            recommendations,
        })
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn variance(values: &[f32], mean: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
}

fn std_dev(values: &[f32], mean: f32) -> f32 {
    variance(values, mean).sqrt()
}

/// 4-neighbor Laplacian response over the image interior.
fn laplacian_response(gray: &[f32], width: usize, height: usize) -> Vec<f32> {
    if width < 3 || height < 3 {
        return vec![0.0];
    }
    let mut out = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = gray[y * width + x];
            let response = gray[(y - 1) * width + x]
                + gray[(y + 1) * width + x]
                + gray[y * width + x - 1]
                + gray[y * width + x + 1]
                - 4.0 * center;
            out.push(response);
        }
    }
    out
}

/// Channel balance: 100 minus the summed pairwise channel-mean differences.
fn color_balance(rgb: &image::RgbImage) -> f32 {
    let n = (rgb.width() * rgb.height()) as f32;
    if n == 0.0 {
        return 0.0;
    }
    let (mut r, mut g, mut b) = (0.0f32, 0.0f32, 0.0f32);
    for p in rgb.pixels() {
        r += p.0[0] as f32;
        g += p.0[1] as f32;
        b += p.0[2] as f32;
    }
    let (r, g, b) = (r / n, g / n, b / n);
    let diff = (r - g).abs() + (g - b).abs() + (r - b).abs();
    (100.0 - diff).clamp(0.0, 100.0)
}

fn overall_score(
    brightness: f32,
    contrast: f32,
    sharpness: f32,
    noise_level: f32,
    color_balance: f32,
    resolution: (u32, u32),
) -> f32 {
    let brightness_norm = ((brightness - 50.0) * 100.0 / 155.0).clamp(0.0, 100.0);
    let contrast_norm = contrast.min(100.0);
    let sharpness_norm = (sharpness * 100.0 / 1000.0).min(100.0);
    let noise_norm = (100.0 - noise_level * 100.0).max(0.0);
    let color_balance_norm = color_balance;
    let pixels = resolution.0 as f32 * resolution.1 as f32;
    let resolution_norm = (pixels / 1_000_000.0 * 100.0).min(100.0);

    let score = brightness_norm * WEIGHT_BRIGHTNESS
        + contrast_norm * WEIGHT_CONTRAST
        + sharpness_norm * WEIGHT_SHARPNESS
        + noise_norm * WEIGHT_NOISE
        + color_balance_norm * WEIGHT_COLOR_BALANCE
        + resolution_norm * WEIGHT_RESOLUTION;

    (score * 100.0).round() / 100.0
}

fn recommendations(
    brightness: f32,
    contrast: f32,
    sharpness: f32,
    noise_level: f32,
    color_balance: f32,
) -> Vec<String> {
    let mut recs = Vec::new();

    if brightness < 50.0 {
        recs.push("Image is too dark. Increase lighting or use flash.".to_string());
    } else if brightness > 200.0 {
        recs.push("Image is too bright. Reduce lighting or avoid direct sunlight.".to_string());
    }

    if contrast < 20.0 {
        recs.push("Low contrast detected. Image may appear flat.".to_string());
    }

    if sharpness < 100.0 {
        recs.push("Image appears blurry. Hold camera steady or use tripod.".to_string());
    }

    if noise_level > 0.8 {
        recs.push(
            "High noise detected. Use better lighting to avoid high ISO settings.".to_string(),
        );
    }

    if color_balance < 60.0 {
        recs.push("Color balance could be improved. Avoid mixed lighting conditions.".to_string());
    }

    if recs.is_empty() {
        recs.push("Image quality is good for disease detection.".to_string());
    }

    recs
}
