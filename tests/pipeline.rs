//! End-to-end pipeline tests: raw image bytes through quality gating,
//! ensemble inference, calibration and routing to a finished report.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, RgbImage};
use ndarray::Array1;

use kropscan_core::classifier::softmax;
use kropscan_core::{
    ClassProbabilityVector, ClassTable, Classifier, CoreError, Decision, DiagnosisEngine,
    EngineConfig, EnginePaths, ImageTensor, PredictOptions, Severity, StubClassifier,
};

fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Bright, sharp checkerboard that clears the quality gate.
fn leaf_photo() -> Vec<u8> {
    let mut img = RgbImage::new(256, 256);
    for (x, y, p) in img.enumerate_pixels_mut() {
        let v = (((x + y) % 2) * 200 + 30) as u8;
        p.0 = [v / 2, v, v / 3];
    }
    encode_png(&img)
}

/// Flat, dark frame the quality gate rejects.
fn dark_photo() -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(64, 64, image::Rgb([30, 30, 30])))
}

fn peaked_probs(class: usize, confidence: f32) -> Array1<f32> {
    let rest = (1.0 - confidence) / 8.0;
    let mut probs = Array1::from_elem(9, rest);
    probs[class] = confidence;
    probs
}

fn engine_with(probs: Array1<f32>) -> DiagnosisEngine {
    DiagnosisEngine::with_classifier(
        EngineConfig::default(),
        ClassTable::default(),
        Box::new(StubClassifier::fixed(probs).unwrap()),
        &EnginePaths::default(),
    )
    .unwrap()
}

#[test]
fn confident_healthy_tomato_is_accepted() {
    // Raw 0.97 calibrates above the very-high band under the default curve
    let engine = engine_with(peaked_probs(0, 0.97));
    let report = engine
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();

    let primary = report.primary_prediction.expect("prediction expected");
    assert_eq!(primary.class_name, "tomato___healthy");
    assert!(primary.is_healthy);
    assert!(primary.calibrated_confidence >= 0.85);
    assert_eq!(primary.ensemble_agreement, 1.0);

    assert_eq!(report.decision, Decision::Accept);
    assert!(report.decision_reason.is_none());
    assert!(!report.requires_expert_review);
    assert_eq!(report.crop_consensus.as_deref(), Some("tomato"));
    assert_eq!(
        report.treatment.as_ref().map(|t| t.severity),
        Some(Severity::None)
    );
}

#[test]
fn healthy_in_the_high_band_is_accepted_outright() {
    // Raw 0.85 calibrates to roughly 0.76: inside the general `high`
    // band and above the healthy `likely` threshold, so a healthy call
    // routes the same as a disease call.
    let disease = engine_with(peaked_probs(1, 0.85));
    let report = disease
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();
    assert_eq!(report.decision, Decision::Accept);

    let healthy = engine_with(peaked_probs(0, 0.85));
    let report = healthy
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();
    assert_eq!(report.decision, Decision::Accept);
    assert!(report.decision_reason.is_none());
}

#[test]
fn strict_healthy_thresholds_caveat_a_high_band_healthy_call() {
    // With the healthy `likely` threshold raised above the general `high`
    // band, the same calibrated 0.76 earns a caveat on a healthy class
    // while a disease class is still accepted.
    let mut config = EngineConfig::default();
    config.healthy.likely = 0.80;
    config.healthy.confident = 0.90;

    let healthy = DiagnosisEngine::with_classifier(
        config.clone(),
        ClassTable::default(),
        Box::new(StubClassifier::fixed(peaked_probs(0, 0.85)).unwrap()),
        &EnginePaths::default(),
    )
    .unwrap();
    let report = healthy
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();
    assert_eq!(report.decision, Decision::AcceptWithCaveat);
    assert_eq!(report.decision_reason.as_deref(), Some("low confidence"));

    let disease = DiagnosisEngine::with_classifier(
        config,
        ClassTable::default(),
        Box::new(StubClassifier::fixed(peaked_probs(1, 0.85)).unwrap()),
        &EnginePaths::default(),
    )
    .unwrap();
    let report = disease
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();
    assert_eq!(report.decision, Decision::Accept);
}

#[test]
fn forced_inference_on_a_poor_photo_can_still_accept() {
    // A confident disease call on a forced low-quality image falls
    // through to the confidence rules instead of escalating on quality.
    let engine = engine_with(peaked_probs(2, 0.97));
    let options = PredictOptions {
        force_inference: true,
        ..Default::default()
    };
    let report = engine.predict(&dark_photo(), &options).unwrap();

    assert!(report.primary_prediction.is_some());
    assert_eq!(report.decision, Decision::Accept);
    assert!(report.decision_reason.is_none());
    assert!(!report.requires_expert_review);
}

#[test]
fn low_quality_image_escalates_without_inference() {
    let engine = engine_with(peaked_probs(2, 0.99));
    let report = engine
        .predict(&dark_photo(), &PredictOptions::default())
        .unwrap();

    assert!(report.primary_prediction.is_none());
    assert!(report.top_k_predictions.is_empty());
    assert_eq!(report.decision, Decision::Escalate);
    assert_eq!(
        report.decision_reason.as_deref(),
        Some("image quality insufficient")
    );
    assert!(report.requires_expert_review);
    assert_eq!(report.metadata.tta_variants_attempted, 0);
    assert!(!report.quality.recommendations.is_empty());
}

#[test]
fn garbage_bytes_are_rejected_as_bad_input() {
    let engine = engine_with(peaked_probs(0, 0.9));
    let err = engine
        .predict(b"\xff\xfe not an image", &PredictOptions::default())
        .unwrap_err();
    assert!(err.is_bad_input());
}

#[test]
fn identical_bytes_produce_identical_reports() {
    let engine = DiagnosisEngine::with_classifier(
        EngineConfig::default(),
        ClassTable::default(),
        Box::new(StubClassifier::new(9)),
        &EnginePaths::default(),
    )
    .unwrap();

    let bytes = leaf_photo();
    let opts = PredictOptions::default();
    let a = engine.predict(&bytes, &opts).unwrap();
    let b = engine.predict(&bytes, &opts).unwrap();

    assert_eq!(a.primary_prediction, b.primary_prediction);
    assert_eq!(a.top_k_predictions, b.top_k_predictions);
    assert_eq!(a.decision, b.decision);
    assert_eq!(a.crop_consensus, b.crop_consensus);
}

/// Fails a fixed majority of the calls in every ensemble run, so the
/// retry degrades as well.
struct MostlyBroken {
    calls: AtomicUsize,
}

impl Classifier for MostlyBroken {
    fn class_count(&self) -> usize {
        9
    }

    fn forward(&self, tensor: &ImageTensor) -> kropscan_core::Result<ClassProbabilityVector> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call % 5 < 3 {
            return Err(CoreError::Inference("synthetic failure".to_string()));
        }
        let _ = tensor;
        softmax(&Array1::from_elem(9, 0.0))
    }
}

#[test]
fn persistent_degradation_surfaces_after_one_retry() {
    let engine = DiagnosisEngine::with_classifier(
        EngineConfig::default(),
        ClassTable::default(),
        Box::new(MostlyBroken {
            calls: AtomicUsize::new(0),
        }),
        &EnginePaths::default(),
    )
    .unwrap();

    let err = engine
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap_err();
    match err {
        CoreError::EnsembleDegraded {
            succeeded,
            attempted,
        } => {
            assert_eq!(succeeded, 2);
            assert_eq!(attempted, 5);
        }
        other => panic!("expected EnsembleDegraded, got {:?}", other),
    }
}

#[test]
fn predict_or_escalate_turns_degradation_into_a_report() {
    let engine = DiagnosisEngine::with_classifier(
        EngineConfig::default(),
        ClassTable::default(),
        Box::new(MostlyBroken {
            calls: AtomicUsize::new(0),
        }),
        &EnginePaths::default(),
    )
    .unwrap();

    let report = engine
        .predict_or_escalate(&leaf_photo(), &PredictOptions::default())
        .unwrap();
    assert!(report.primary_prediction.is_none());
    assert_eq!(report.decision, Decision::Escalate);
    assert_eq!(report.decision_reason.as_deref(), Some("inference degraded"));
    assert!(report.requires_expert_review);
}

#[test]
fn unknown_class_gets_fallback_advisory() {
    let table = ClassTable::new(vec![
        "grape___black_rot".to_string(),
        "grape___healthy".to_string(),
        "apple___scab".to_string(),
    ])
    .unwrap();
    let engine = DiagnosisEngine::with_classifier(
        EngineConfig::default(),
        table,
        Box::new(StubClassifier::fixed(Array1::from(vec![0.97, 0.02, 0.01])).unwrap()),
        &EnginePaths::default(),
    )
    .unwrap();

    let report = engine
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();
    let treatment = report.treatment.expect("advisory expected");
    assert_eq!(treatment.severity, Severity::Unknown);
    assert_eq!(treatment.disease_key, "grape___black_rot");
    // A missing advisory entry never blocks the diagnosis itself
    assert_eq!(report.decision, Decision::Accept);
}

#[test]
fn engine_loads_assets_from_disk() {
    let paths = EnginePaths {
        model: "data/model.json".into(),
        class_names: Some("data/class_names.json".into()),
        config: Some("data/engine.json".into()),
        calibration: Some("data/calibration.json".into()),
        treatments: Some("data/treatments.json".into()),
    };

    let classes = ClassTable::load(paths.class_names.as_ref().unwrap()).unwrap();
    assert_eq!(classes.len(), 9);

    let config = EngineConfig::load(paths.config.as_ref().unwrap()).unwrap();
    let engine = DiagnosisEngine::with_classifier(
        config,
        classes,
        Box::new(StubClassifier::fixed(peaked_probs(8, 0.95)).unwrap()),
        &paths,
    )
    .unwrap();

    let report = engine
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();
    let primary = report.primary_prediction.unwrap();
    assert_eq!(primary.class_name, "corn___northern_leaf_blight");
    assert_eq!(
        report.treatment.as_ref().map(|t| t.severity),
        Some(Severity::High)
    );
}

#[test]
fn report_serializes_to_json() {
    let engine = engine_with(peaked_probs(1, 0.9));
    let report = engine
        .predict(&leaf_photo(), &PredictOptions::default())
        .unwrap();

    let json = report.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(
        value["primary_prediction"]["class_name"],
        "tomato___early_blight"
    );
    assert!(value["metadata"]["analyzed_at"].is_string());
    assert_eq!(value["decision"], "accept");
}

#[test]
fn missing_model_file_is_fatal() {
    let paths = EnginePaths {
        model: "/nonexistent/model.json".into(),
        ..Default::default()
    };
    let err = DiagnosisEngine::initialize(&paths).unwrap_err();
    assert!(err.is_fatal() || matches!(err, CoreError::PathNotFound(_)));
}
