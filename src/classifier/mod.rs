//! Classifier Module
//!
//! The polymorphic classifier seam: a single deterministic forward pass
//! from an `ImageTensor` to a `ClassProbabilityVector`. Two variants are
//! provided, selected at initialization and never branched on ad hoc:
//! - [`TrainedClassifier`]: runs a compact CNN over loaded weights.
//! - [`StubClassifier`]: deterministic distributions for testing and
//!   deployments without trained weights.

pub mod stub;
pub mod trained;

pub use stub::StubClassifier;
pub use trained::{ModelRecord, TrainedClassifier};

use ndarray::Array1;

use crate::error::{CoreError, Result};
use crate::preprocess::ImageTensor;

/// Tolerance for the probability-sum invariant
const SUM_TOLERANCE: f32 = 1e-3;

/// Ordered per-class probability distribution.
///
/// Invariants: length equals the class-table size and the entries sum to
/// 1.0 within floating tolerance. Constructed only through [`softmax`] or
/// validated aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilityVector {
    probs: Array1<f32>,
}

impl ClassProbabilityVector {
    /// Validate and wrap a probability array.
    pub fn new(probs: Array1<f32>) -> Result<Self> {
        if probs.is_empty() {
            return Err(CoreError::Inference(
                "probability vector is empty".to_string(),
            ));
        }
        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(CoreError::Inference(
                "probability vector contains negative or non-finite values".to_string(),
            ));
        }
        let sum: f32 = probs.sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(CoreError::Inference(format!(
                "probability vector sums to {}, expected 1.0",
                sum
            )));
        }
        Ok(Self { probs })
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn as_array(&self) -> &Array1<f32> {
        &self.probs
    }

    /// Probability of one class
    pub fn prob(&self, label: usize) -> f32 {
        self.probs[label]
    }

    /// Index and probability of the most likely class
    pub fn argmax(&self) -> (usize, f32) {
        let mut best = (0, f32::NEG_INFINITY);
        for (i, &p) in self.probs.iter().enumerate() {
            if p > best.1 {
                best = (i, p);
            }
        }
        best
    }

    /// Top-k class indices and probabilities, highest first.
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> =
            self.probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed.truncate(k);
        indexed
    }

    /// Shannon entropy of the distribution (nats)
    pub fn entropy(&self) -> f32 {
        self.probs
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| -p * p.ln())
            .sum()
    }

    /// Entropy normalized to [0, 1] by the maximum (uniform) entropy.
    pub fn normalized_entropy(&self) -> f32 {
        let k = self.probs.len();
        if k <= 1 {
            return 0.0;
        }
        (self.entropy() / (k as f32).ln()).clamp(0.0, 1.0)
    }

    /// Margin between the top-1 and top-2 probabilities
    pub fn margin(&self) -> f32 {
        let top = self.top_k(2);
        match top.as_slice() {
            [(_, p1), (_, p2)] => p1 - p2,
            [(_, p1)] => *p1,
            _ => 0.0,
        }
    }
}

/// Numerically stable softmax over raw logits.
pub fn softmax(logits: &Array1<f32>) -> Result<ClassProbabilityVector> {
    if logits.is_empty() {
        return Err(CoreError::Inference("empty logits".to_string()));
    }
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(CoreError::Inference(
            "non-finite value in logits".to_string(),
        ));
    }
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Array1<f32> = logits.mapv(|v| (v - max).exp());
    let sum = exps.sum();
    ClassProbabilityVector::new(exps / sum)
}

/// A single deterministic forward pass over one image variant.
///
/// Implementations must be pure with respect to the input tensor: repeated
/// calls on identical inputs return identical distributions, and `&self`
/// access is safe from concurrent threads.
pub trait Classifier: Send + Sync {
    /// Number of classes in the output distribution
    fn class_count(&self) -> usize;

    /// Run one forward pass
    fn forward(&self, tensor: &ImageTensor) -> Result<ClassProbabilityVector>;
}
