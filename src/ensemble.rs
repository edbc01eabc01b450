//! Augmentation Ensemble Module (Test-Time Augmentation)
//!
//! Runs the classifier over a fixed set of deterministic image variants
//! and aggregates the resulting distributions by element-wise arithmetic
//! mean. Every transform is parameterless, so repeated runs on one image
//! are reproducible.
//!
//! Individual variant failures are excluded from the aggregate; the whole
//! call fails with `EnsembleDegraded` only when fewer than half of the
//! attempted variants succeed.

use image::{imageops, DynamicImage};
use ndarray::Array1;
use tracing::{debug, warn};

use crate::classifier::{ClassProbabilityVector, Classifier};
use crate::error::{CoreError, Result};
use crate::preprocess::ImagePreprocessor;

/// Deterministic test-time transforms, applied before preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtaTransform {
    Identity,
    HorizontalFlip,
    VerticalFlip,
    Rotate90,
    /// Center crop to 87.5% of each dimension; the preprocessor resizes
    /// back to the model resolution.
    CenterCrop,
}

/// The fixed transform list, in application order. `tta_size` selects a
/// prefix of this list.
pub const TTA_TRANSFORMS: [TtaTransform; 5] = [
    TtaTransform::Identity,
    TtaTransform::HorizontalFlip,
    TtaTransform::VerticalFlip,
    TtaTransform::Rotate90,
    TtaTransform::CenterCrop,
];

impl TtaTransform {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::HorizontalFlip => "horizontal_flip",
            Self::VerticalFlip => "vertical_flip",
            Self::Rotate90 => "rotate_90",
            Self::CenterCrop => "center_crop",
        }
    }

    /// Apply the transform. Pure: no randomness, no shared state.
    pub fn apply(&self, image: &DynamicImage) -> DynamicImage {
        match self {
            Self::Identity => image.clone(),
            Self::HorizontalFlip => image.fliph(),
            Self::VerticalFlip => image.flipv(),
            Self::Rotate90 => image.rotate90(),
            Self::CenterCrop => {
                let (w, h) = (image.width(), image.height());
                let (cw, ch) = ((w * 7 / 8).max(1), (h * 7 / 8).max(1));
                let (x, y) = ((w - cw) / 2, (h - ch) / 2);
                DynamicImage::ImageRgba8(imageops::crop_imm(image, x, y, cw, ch).to_image())
            }
        }
    }
}

/// Result of one ensemble evaluation.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    /// Arithmetic mean of the successful variants' distributions
    pub aggregate: ClassProbabilityVector,
    /// Fraction of successful variants whose argmax matches the
    /// aggregate's argmax, in [0, 1]
    pub agreement: f32,
    /// Variants that produced a valid forward pass
    pub succeeded: usize,
    /// Variants attempted
    pub attempted: usize,
}

/// Evaluates the classifier over deterministic variants of one image.
#[derive(Debug, Clone)]
pub struct AugmentationEnsemble {
    use_tta: bool,
    tta_size: usize,
}

impl Default for AugmentationEnsemble {
    fn default() -> Self {
        Self {
            use_tta: true,
            tta_size: TTA_TRANSFORMS.len(),
        }
    }
}

impl AugmentationEnsemble {
    /// `tta_size` is clamped to the fixed transform list length.
    /// With `use_tta` false this is an identity ensemble of size 1.
    pub fn new(use_tta: bool, tta_size: usize) -> Self {
        Self {
            use_tta,
            tta_size: tta_size.clamp(1, TTA_TRANSFORMS.len()),
        }
    }

    /// The transforms this configuration evaluates.
    pub fn transforms(&self) -> &'static [TtaTransform] {
        if self.use_tta {
            &TTA_TRANSFORMS[..self.tta_size]
        } else {
            &TTA_TRANSFORMS[..1]
        }
    }

    /// Run the classifier over every variant and aggregate.
    pub fn run(
        &self,
        image: &DynamicImage,
        preprocessor: &ImagePreprocessor,
        classifier: &dyn Classifier,
    ) -> Result<EnsembleOutcome> {
        let transforms = self.transforms();
        let attempted = transforms.len();

        let mut variant_probs: Vec<ClassProbabilityVector> = Vec::with_capacity(attempted);

        for transform in transforms {
            let variant = transform.apply(image);
            let result = preprocessor
                .to_tensor(&variant)
                .and_then(|tensor| classifier.forward(&tensor));
            match result {
                Ok(probs) => variant_probs.push(probs),
                Err(e) => {
                    warn!(transform = transform.name(), error = %e, "TTA variant failed");
                }
            }
        }

        let succeeded = variant_probs.len();
        if succeeded * 2 < attempted {
            return Err(CoreError::EnsembleDegraded {
                succeeded,
                attempted,
            });
        }

        let aggregate = Self::aggregate(&variant_probs)?;
        let (agg_argmax, _) = aggregate.argmax();
        let matching = variant_probs
            .iter()
            .filter(|p| p.argmax().0 == agg_argmax)
            .count();
        let agreement = matching as f32 / succeeded as f32;

        debug!(
            succeeded,
            attempted,
            agreement,
            "ensemble aggregation complete"
        );

        Ok(EnsembleOutcome {
            aggregate,
            agreement,
            succeeded,
            attempted,
        })
    }

    /// Element-wise arithmetic mean, renormalized against float drift.
    fn aggregate(variants: &[ClassProbabilityVector]) -> Result<ClassProbabilityVector> {
        let first = variants
            .first()
            .ok_or_else(|| CoreError::Inference("no variants to aggregate".to_string()))?;

        let mut sum: Array1<f32> = Array1::zeros(first.len());
        for probs in variants {
            if probs.len() != first.len() {
                return Err(CoreError::Inference(
                    "variant distributions disagree on class count".to_string(),
                ));
            }
            sum += probs.as_array();
        }
        sum /= variants.len() as f32;
        let total = sum.sum();
        ClassProbabilityVector::new(sum / total)
    }
}
