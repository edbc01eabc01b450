//! Stub Classifier
//!
//! Deterministic stand-in for deployments without trained weights and for
//! tests. Distributions are derived from an xxh3 digest of the input
//! tensor bits, so identical inputs always produce identical outputs and
//! no per-request entropy exists anywhere in the pipeline.

use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use xxhash_rust::xxh3::xxh3_64;

use crate::classifier::{softmax, ClassProbabilityVector, Classifier};
use crate::error::{CoreError, Result};
use crate::preprocess::ImageTensor;

#[derive(Debug, Clone)]
enum StubMode {
    /// Distribution seeded from the input tensor digest
    Seeded,
    /// Always return the same distribution, regardless of input
    Fixed(Array1<f32>),
    /// One class holds `confidence`, the rest share the remainder
    Biased { class: usize, confidence: f32 },
}

/// Deterministic classifier stub.
#[derive(Debug, Clone)]
pub struct StubClassifier {
    num_classes: usize,
    mode: StubMode,
}

impl StubClassifier {
    /// Input-seeded stub: plausible peaked distributions that vary with
    /// the input but never between repeated calls.
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            mode: StubMode::Seeded,
        }
    }

    /// Stub that always returns `probs`.
    pub fn fixed(probs: Array1<f32>) -> Result<Self> {
        let validated = ClassProbabilityVector::new(probs)?;
        Ok(Self {
            num_classes: validated.len(),
            mode: StubMode::Fixed(validated.as_array().clone()),
        })
    }

    /// Stub that always predicts `class` with the given confidence.
    pub fn biased(num_classes: usize, class: usize, confidence: f32) -> Result<Self> {
        if class >= num_classes {
            return Err(CoreError::Config(format!(
                "biased class {} out of range for {} classes",
                class, num_classes
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::Config(
                "biased confidence must lie in [0, 1]".to_string(),
            ));
        }
        Ok(Self {
            num_classes,
            mode: StubMode::Biased { class, confidence },
        })
    }

    fn seeded_distribution(&self, tensor: &ImageTensor) -> Result<ClassProbabilityVector> {
        let seed = xxh3_64(&tensor.to_bits());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut logits = Array1::<f32>::zeros(self.num_classes);
        for v in logits.iter_mut() {
            *v = rng.gen_range(0.0..2.0);
        }
        // Boost one digest-chosen class so the stub looks confidently peaked
        let winner = (seed % self.num_classes as u64) as usize;
        logits[winner] += 3.0;

        softmax(&logits)
    }
}

impl Classifier for StubClassifier {
    fn class_count(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, tensor: &ImageTensor) -> Result<ClassProbabilityVector> {
        match &self.mode {
            StubMode::Seeded => self.seeded_distribution(tensor),
            StubMode::Fixed(probs) => ClassProbabilityVector::new(probs.clone()),
            StubMode::Biased { class, confidence } => {
                let k = self.num_classes;
                let rest = if k > 1 {
                    (1.0 - confidence) / (k as f32 - 1.0)
                } else {
                    0.0
                };
                let mut probs = Array1::<f32>::from_elem(k, rest);
                probs[*class] = *confidence;
                ClassProbabilityVector::new(probs)
            }
        }
    }
}
