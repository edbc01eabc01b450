//! Diagnosis Engine Module
//!
//! The single public boundary: wires the preprocessor, quality gate,
//! classifier, augmentation ensemble, calibrator, decision policy and
//! treatment lookup into one `predict` call from raw image bytes to an
//! `AnalysisReport`.
//!
//! The engine is immutable after construction; `predict` takes `&self`
//! and every component is safe for concurrent use from multiple threads.

use std::path::PathBuf;
use std::time::Instant;

use image::DynamicImage;
use tracing::{info, instrument, warn};

use crate::calibration::{CalibrationConfig, ConfidenceCalibrator, ConfidenceLevel};
use crate::classes::ClassTable;
use crate::classifier::{Classifier, TrainedClassifier};
use crate::config::EngineConfig;
use crate::ensemble::{AugmentationEnsemble, EnsembleOutcome};
use crate::error::{CoreError, Result};
use crate::policy::{Decision, DecisionPolicy, PolicyInput, PolicyOutcome};
use crate::preprocess::ImagePreprocessor;
use crate::quality::{QualityAssessment, QualityGate};
use crate::report::{crop_consensus, disease_consensus, AnalysisReport, ReportMetadata};
use crate::treatment::TreatmentLookup;

/// Filesystem locations of the engine's static assets. Only the model
/// weights are mandatory; everything else falls back to built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct EnginePaths {
    pub model: PathBuf,
    pub class_names: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub calibration: Option<PathBuf>,
    pub treatments: Option<PathBuf>,
}

/// Per-request options. Defaults match the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct PredictOptions {
    /// Override TTA on or off for this request
    pub use_tta: Option<bool>,
    /// Override the number of TTA variants for this request
    pub tta_size: Option<usize>,
    /// Run inference even when the quality gate flags the image
    pub force_inference: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            use_tta: None,
            tta_size: None,
            force_inference: false,
        }
    }
}

/// Immutable inference engine.
pub struct DiagnosisEngine {
    config: EngineConfig,
    classes: ClassTable,
    preprocessor: ImagePreprocessor,
    quality_gate: QualityGate,
    classifier: Box<dyn Classifier>,
    calibrator: ConfidenceCalibrator,
    policy: DecisionPolicy,
    treatments: TreatmentLookup,
}

impl std::fmt::Debug for DiagnosisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosisEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DiagnosisEngine {
    /// Load all static assets and construct the engine. Any failure here
    /// is fatal; a half-initialized engine is never returned.
    pub fn initialize(paths: &EnginePaths) -> Result<Self> {
        let config = match &paths.config {
            Some(p) => EngineConfig::load(p)?,
            None => EngineConfig::default(),
        };

        let classes = match &paths.class_names {
            Some(p) => ClassTable::load(p)?,
            None => ClassTable::default(),
        };

        let classifier = TrainedClassifier::load(&paths.model)?;
        info!(model = %paths.model.display(), classes = classes.len(), "model loaded");

        Self::build(config, classes, Box::new(classifier), paths)
    }

    /// Construct the engine around a caller-supplied classifier. Used for
    /// stub deployments and tests; everything else loads as in
    /// [`initialize`](Self::initialize).
    pub fn with_classifier(
        config: EngineConfig,
        classes: ClassTable,
        classifier: Box<dyn Classifier>,
        paths: &EnginePaths,
    ) -> Result<Self> {
        Self::build(config, classes, classifier, paths)
    }

    fn build(
        config: EngineConfig,
        classes: ClassTable,
        classifier: Box<dyn Classifier>,
        paths: &EnginePaths,
    ) -> Result<Self> {
        config.validate()?;

        if classifier.class_count() != classes.len() {
            return Err(CoreError::Initialization(format!(
                "classifier outputs {} classes but the class table has {}",
                classifier.class_count(),
                classes.len()
            )));
        }

        let calibration = match &paths.calibration {
            Some(p) => CalibrationConfig::load(p)?,
            None => CalibrationConfig::default(),
        };
        let calibrator = ConfidenceCalibrator::new(calibration)?;

        let treatments = match &paths.treatments {
            Some(p) => TreatmentLookup::load(p)?,
            None => TreatmentLookup::builtin(),
        };

        Ok(Self {
            preprocessor: ImagePreprocessor::new(config.input_size),
            quality_gate: QualityGate::new(config.quality_threshold),
            policy: DecisionPolicy::new(&config),
            config,
            classes,
            classifier,
            calibrator,
            treatments,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Analyze one image. Identical bytes and options produce identical
    /// reports apart from the timestamp and timing metadata.
    ///
    /// Returns `Err(EnsembleDegraded)` when a majority of ensemble
    /// variants fail even after one retry; use
    /// [`predict_or_escalate`](Self::predict_or_escalate) to receive an
    /// escalation report instead.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn predict(&self, bytes: &[u8], options: &PredictOptions) -> Result<AnalysisReport> {
        let started = Instant::now();

        let image = self.preprocessor.decode(bytes)?;
        let quality = self.quality_gate.assess(&image)?;

        if !quality.is_suitable(self.config.quality_threshold) && !options.force_inference {
            info!(score = quality.quality_score, "quality gate rejected image");
            return Ok(self.quality_rejected_report(quality, started));
        }

        let ensemble = AugmentationEnsemble::new(
            options.use_tta.unwrap_or(self.config.use_tta),
            options.tta_size.unwrap_or(self.config.tta_size),
        );

        let outcome = match ensemble.run(&image, &self.preprocessor, self.classifier.as_ref()) {
            Ok(outcome) => outcome,
            Err(CoreError::EnsembleDegraded { succeeded, attempted }) => {
                warn!(succeeded, attempted, "ensemble degraded, retrying once");
                ensemble.run(&image, &self.preprocessor, self.classifier.as_ref())?
            }
            Err(e) => return Err(e),
        };

        Ok(self.assemble_report(&outcome, quality, options.force_inference, started))
    }

    /// Like [`predict`](Self::predict), but converts a degraded ensemble
    /// into an escalation report instead of an error. Bad-input and
    /// initialization errors still propagate.
    pub fn predict_or_escalate(
        &self,
        bytes: &[u8],
        options: &PredictOptions,
    ) -> Result<AnalysisReport> {
        let started = Instant::now();
        match self.predict(bytes, options) {
            Ok(report) => Ok(report),
            Err(CoreError::EnsembleDegraded { succeeded, attempted }) => {
                warn!(succeeded, attempted, "degraded inference escalated");
                let image = self.preprocessor.decode(bytes)?;
                let quality = self.quality_gate.assess(&image)?;
                Ok(self.degraded_report(
                    quality,
                    options.force_inference,
                    succeeded,
                    attempted,
                    started,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Assess image quality without running inference.
    pub fn assess_quality(&self, bytes: &[u8]) -> Result<(DynamicImage, QualityAssessment)> {
        let image = self.preprocessor.decode(bytes)?;
        let quality = self.quality_gate.assess(&image)?;
        Ok((image, quality))
    }

    fn assemble_report(
        &self,
        outcome: &EnsembleOutcome,
        quality: QualityAssessment,
        forced: bool,
        started: Instant,
    ) -> AnalysisReport {
        let (top_label, raw_top) = outcome.aggregate.argmax();
        let calibrated = self.calibrator.calibrate(raw_top);
        let uncertainty = self
            .calibrator
            .uncertainty(&outcome.aggregate, outcome.agreement);
        let is_healthy = self.classes.is_healthy(top_label);

        // The policy runs exactly once per analysis.
        let policy_outcome = self.policy.evaluate(&PolicyInput {
            calibrated_confidence: calibrated,
            quality_suitable: quality.is_suitable(self.config.quality_threshold),
            forced,
            degraded: false,
            is_healthy,
        });

        let top_k_predictions = AnalysisReport::ranked_predictions(
            &outcome.aggregate,
            &self.classes,
            calibrated,
            outcome.agreement,
            uncertainty,
            self.config.top_k,
        );
        let primary = top_k_predictions.first().cloned();

        let ranked = outcome.aggregate.top_k(self.config.top_k);
        let treatment = primary
            .as_ref()
            .map(|p| self.treatments.advisory_for(&p.class_name));

        let recommendation = match (&policy_outcome, &treatment) {
            (
                PolicyOutcome {
                    decision: Decision::Escalate,
                    ..
                },
                _,
            ) => "Result is not reliable enough to act on. \
                  Have the plant inspected by a local expert."
                .to_string(),
            (_, Some(t)) => t.advisory.clone(),
            (_, None) => "No guidance available.".to_string(),
        };

        let metadata = ReportMetadata::new(
            outcome.attempted,
            outcome.succeeded,
            quality.quality_score,
            outcome.aggregate.margin(),
            started.elapsed().as_millis() as u64,
        );

        AnalysisReport {
            primary_prediction: primary,
            top_k_predictions,
            confidence_level: Some(ConfidenceLevel::from_confidence(
                calibrated,
                &self.config.bands,
            )),
            crop_consensus: crop_consensus(&ranked, &self.classes),
            disease_consensus: disease_consensus(&ranked, &self.classes),
            quality,
            treatment,
            recommendation,
            requires_expert_review: policy_outcome.requires_expert_review(),
            decision: policy_outcome.decision,
            decision_reason: policy_outcome.reason,
            metadata,
        }
    }

    /// Report for an image the quality gate rejected before inference.
    fn quality_rejected_report(
        &self,
        quality: QualityAssessment,
        started: Instant,
    ) -> AnalysisReport {
        // Same rule table as the full pipeline; rule 1 fires.
        let policy_outcome = self.policy.evaluate(&PolicyInput {
            calibrated_confidence: 0.0,
            quality_suitable: false,
            forced: false,
            degraded: false,
            is_healthy: false,
        });

        let recommendation = if quality.recommendations.is_empty() {
            "Retake the photo and try again.".to_string()
        } else {
            quality.recommendations.join(" ")
        };

        let metadata = ReportMetadata::new(
            0,
            0,
            quality.quality_score,
            0.0,
            started.elapsed().as_millis() as u64,
        );

        AnalysisReport {
            primary_prediction: None,
            top_k_predictions: Vec::new(),
            confidence_level: None,
            crop_consensus: None,
            disease_consensus: None,
            quality,
            treatment: None,
            recommendation,
            requires_expert_review: policy_outcome.requires_expert_review(),
            decision: policy_outcome.decision,
            decision_reason: policy_outcome.reason,
            metadata,
        }
    }

    /// Report for an analysis whose ensemble stayed degraded after retry.
    fn degraded_report(
        &self,
        quality: QualityAssessment,
        forced: bool,
        succeeded: usize,
        attempted: usize,
        started: Instant,
    ) -> AnalysisReport {
        // Rule 2 fires; a forced request skips rule 1 as in the full path.
        let policy_outcome = self.policy.evaluate(&PolicyInput {
            calibrated_confidence: 0.0,
            quality_suitable: quality.is_suitable(self.config.quality_threshold),
            forced,
            degraded: true,
            is_healthy: false,
        });

        let metadata = ReportMetadata::new(
            attempted,
            succeeded,
            quality.quality_score,
            0.0,
            started.elapsed().as_millis() as u64,
        );

        AnalysisReport {
            primary_prediction: None,
            top_k_predictions: Vec::new(),
            confidence_level: None,
            crop_consensus: None,
            disease_consensus: None,
            quality,
            treatment: None,
            recommendation: "Inference could not complete reliably. \
                             Retake the photo or consult a local expert."
                .to_string(),
            requires_expert_review: policy_outcome.requires_expert_review(),
            decision: policy_outcome.decision,
            decision_reason: policy_outcome.reason,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::StubClassifier;
    use crate::policy::REASON_QUALITY;
    use image::RgbImage;
    use ndarray::Array1;
    use std::io::Cursor;

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn good_image_bytes() -> Vec<u8> {
        let mut img = RgbImage::new(256, 256);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let v = (((x + y) % 2) * 200 + 30) as u8;
            p.0 = [v, v, v];
        }
        encode_png(&img)
    }

    fn stub_engine(probs: Array1<f32>) -> DiagnosisEngine {
        let classifier = StubClassifier::fixed(probs).unwrap();
        DiagnosisEngine::with_classifier(
            EngineConfig::default(),
            ClassTable::default(),
            Box::new(classifier),
            &EnginePaths::default(),
        )
        .unwrap()
    }

    fn peaked_probs(class: usize, confidence: f32) -> Array1<f32> {
        let rest = (1.0 - confidence) / 8.0;
        let mut probs = Array1::from_elem(9, rest);
        probs[class] = confidence;
        probs
    }

    #[test]
    fn test_class_count_mismatch_rejected() {
        let classifier = StubClassifier::new(4); // table has 9
        let err = DiagnosisEngine::with_classifier(
            EngineConfig::default(),
            ClassTable::default(),
            Box::new(classifier),
            &EnginePaths::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Initialization(_)));
    }

    #[test]
    fn test_predict_produces_full_report() {
        let engine = stub_engine(peaked_probs(1, 0.97));
        let report = engine
            .predict(&good_image_bytes(), &PredictOptions::default())
            .unwrap();

        let primary = report.primary_prediction.unwrap();
        assert_eq!(primary.class_name, "tomato___early_blight");
        assert!(primary.calibrated_confidence > 0.0 && primary.calibrated_confidence <= 1.0);
        assert_eq!(report.top_k_predictions.len(), 5);
        assert_eq!(report.crop_consensus.as_deref(), Some("tomato"));
        assert!(report.treatment.is_some());
        assert_eq!(report.metadata.tta_variants_attempted, 5);
    }

    #[test]
    fn test_decode_failure_is_bad_input() {
        let engine = stub_engine(peaked_probs(0, 0.9));
        let err = engine
            .predict(b"not an image", &PredictOptions::default())
            .unwrap_err();
        assert!(err.is_bad_input());
    }

    #[test]
    fn test_quality_rejection_skips_inference() {
        let engine = stub_engine(peaked_probs(0, 0.99));
        let dark = encode_png(&RgbImage::from_pixel(64, 64, image::Rgb([30, 30, 30])));

        let report = engine.predict(&dark, &PredictOptions::default()).unwrap();
        assert!(report.primary_prediction.is_none());
        assert_eq!(report.decision, Decision::Escalate);
        assert_eq!(
            report.decision_reason.as_deref(),
            Some(REASON_QUALITY)
        );
        assert!(report.requires_expert_review);
        assert_eq!(report.metadata.tta_variants_attempted, 0);
    }

    #[test]
    fn test_force_inference_overrides_quality_gate() {
        let engine = stub_engine(peaked_probs(2, 0.97));
        let dark = encode_png(&RgbImage::from_pixel(64, 64, image::Rgb([30, 30, 30])));

        let options = PredictOptions {
            force_inference: true,
            ..Default::default()
        };
        let report = engine.predict(&dark, &options).unwrap();
        assert!(report.primary_prediction.is_some());
        // Forcing skips the quality rule; the confident result is accepted
        assert_eq!(report.decision, Decision::Accept);
        assert!(report.decision_reason.is_none());
        assert!(!report.requires_expert_review);
    }

    #[test]
    fn test_forced_low_confidence_still_escalates() {
        let engine = stub_engine(peaked_probs(2, 0.55));
        let dark = encode_png(&RgbImage::from_pixel(64, 64, image::Rgb([30, 30, 30])));

        let options = PredictOptions {
            force_inference: true,
            ..Default::default()
        };
        let report = engine.predict(&dark, &options).unwrap();
        assert_eq!(report.decision, Decision::Escalate);
        assert_eq!(report.decision_reason.as_deref(), Some("low confidence"));
    }

    #[test]
    fn test_identical_bytes_identical_reports() {
        let engine = stub_engine(peaked_probs(1, 0.9));
        let bytes = good_image_bytes();
        let opts = PredictOptions::default();

        let a = engine.predict(&bytes, &opts).unwrap();
        let b = engine.predict(&bytes, &opts).unwrap();
        assert_eq!(a.primary_prediction, b.primary_prediction);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.top_k_predictions, b.top_k_predictions);
    }

    #[test]
    fn test_tta_overrides() {
        let engine = stub_engine(peaked_probs(1, 0.9));
        let options = PredictOptions {
            use_tta: Some(false),
            ..Default::default()
        };
        let report = engine.predict(&good_image_bytes(), &options).unwrap();
        assert_eq!(report.metadata.tta_variants_attempted, 1);
    }
}
