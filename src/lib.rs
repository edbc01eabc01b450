//! # KropScan Inference Core
//!
//! Deterministic crop-disease diagnosis from raw image bytes: quality
//! gating, a CNN classifier behind a polymorphic seam, test-time
//! augmentation, confidence calibration, expert-routing policy and
//! treatment advisories, assembled into one serializable report.
//!
//! The single entry point is [`DiagnosisEngine`]: construct it once,
//! then call [`DiagnosisEngine::predict`] from any number of threads.
//!
//! ```no_run
//! use kropscan_core::{DiagnosisEngine, EnginePaths, PredictOptions};
//!
//! # fn main() -> kropscan_core::Result<()> {
//! let paths = EnginePaths {
//!     model: "data/model.json".into(),
//!     ..Default::default()
//! };
//! let engine = DiagnosisEngine::initialize(&paths)?;
//! let bytes = std::fs::read("leaf.jpg")?;
//! let report = engine.predict(&bytes, &PredictOptions::default())?;
//! println!("{}", report.to_json()?);
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod classes;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod logging;
pub mod policy;
pub mod preprocess;
pub mod quality;
pub mod report;
pub mod treatment;

pub use calibration::{CalibrationConfig, ConfidenceCalibrator, ConfidenceLevel, HealthyBand};
pub use classes::ClassTable;
pub use classifier::{ClassProbabilityVector, Classifier, StubClassifier, TrainedClassifier};
pub use config::EngineConfig;
pub use engine::{DiagnosisEngine, EnginePaths, PredictOptions};
pub use ensemble::{AugmentationEnsemble, EnsembleOutcome};
pub use error::{CoreError, Result};
pub use policy::{Decision, DecisionPolicy, PolicyInput, PolicyOutcome};
pub use preprocess::{ImagePreprocessor, ImageTensor};
pub use quality::{QualityAssessment, QualityGate};
pub use report::{AnalysisReport, PredictionResult};
pub use treatment::{Severity, TreatmentLookup, TreatmentRecord};
