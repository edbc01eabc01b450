//! Analysis Report Module
//!
//! Serializable output structures for one completed analysis: the primary
//! prediction, the ranked top-k list, crop/disease consensus over the
//! top-k, the routing decision and the treatment advisory, plus run
//! metadata for audit trails.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::calibration::ConfidenceLevel;
use crate::classes::ClassTable;
use crate::classifier::ClassProbabilityVector;
use crate::policy::Decision;
use crate::quality::QualityAssessment;
use crate::treatment::TreatmentRecord;

/// One ranked prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub class_name: String,
    /// Top probability straight from the ensemble aggregate
    pub raw_confidence: f32,
    /// Confidence after the calibration curve
    pub calibrated_confidence: f32,
    pub crop_type: String,
    pub disease_type: String,
    pub is_healthy: bool,
    /// Fraction of ensemble variants agreeing with the aggregate argmax
    pub ensemble_agreement: f32,
    /// Combined entropy/disagreement uncertainty in [0, 1]
    pub uncertainty: f32,
}

/// Run metadata attached to every report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub engine_version: String,
    /// RFC 3339 timestamp of report creation
    pub analyzed_at: String,
    pub tta_variants_attempted: usize,
    pub tta_variants_succeeded: usize,
    pub quality_score: f32,
    /// Gap between the top-1 and top-2 aggregate probabilities
    pub margin: f32,
    pub inference_time_ms: u64,
}

/// The complete result of one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// `None` when the quality gate rejected the image before inference
    pub primary_prediction: Option<PredictionResult>,
    pub top_k_predictions: Vec<PredictionResult>,
    pub confidence_level: Option<ConfidenceLevel>,
    /// Probability-weighted crop vote over the top-k
    pub crop_consensus: Option<String>,
    /// Probability-weighted disease vote over the top-k
    pub disease_consensus: Option<String>,
    pub quality: QualityAssessment,
    pub treatment: Option<TreatmentRecord>,
    /// Combined advisory text shown to the user
    pub recommendation: String,
    pub decision: Decision,
    pub decision_reason: Option<String>,
    pub requires_expert_review: bool,
    pub metadata: ReportMetadata,
}

/// Probability-weighted majority vote over one field of the top-k list.
///
/// Each candidate contributes its raw confidence to its field value's
/// tally; the heaviest value wins. Ties break toward the higher-ranked
/// candidate because it is tallied first.
fn weighted_vote<'a, F>(
    top_k: &[(usize, f32)],
    table: &'a ClassTable,
    field: F,
) -> Option<String>
where
    F: Fn(&'a ClassTable, usize) -> Option<&'a str>,
{
    let mut tallies: Vec<(&str, f32)> = Vec::new();
    for &(label, prob) in top_k {
        let value = field(table, label)?;
        match tallies.iter_mut().find(|(v, _)| *v == value) {
            Some((_, weight)) => *weight += prob,
            None => tallies.push((value, prob)),
        }
    }
    tallies
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(v, _)| v.to_string())
}

/// Crop consensus over the ranked candidates.
pub fn crop_consensus(top_k: &[(usize, f32)], table: &ClassTable) -> Option<String> {
    weighted_vote(top_k, table, ClassTable::crop_name)
}

/// Disease consensus over the ranked candidates.
pub fn disease_consensus(top_k: &[(usize, f32)], table: &ClassTable) -> Option<String> {
    weighted_vote(top_k, table, ClassTable::disease_name)
}

impl ReportMetadata {
    pub fn new(
        tta_attempted: usize,
        tta_succeeded: usize,
        quality_score: f32,
        margin: f32,
        inference_time_ms: u64,
    ) -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            analyzed_at: Utc::now().to_rfc3339(),
            tta_variants_attempted: tta_attempted,
            tta_variants_succeeded: tta_succeeded,
            quality_score,
            margin,
            inference_time_ms,
        }
    }
}

impl AnalysisReport {
    /// Build the ranked prediction list from an aggregate distribution.
    pub fn ranked_predictions(
        aggregate: &ClassProbabilityVector,
        table: &ClassTable,
        calibrated_top: f32,
        agreement: f32,
        uncertainty: f32,
        k: usize,
    ) -> Vec<PredictionResult> {
        aggregate
            .top_k(k)
            .into_iter()
            .enumerate()
            .filter_map(|(rank, (label, raw))| {
                let class_name = table.class_name(label)?.to_string();
                Some(PredictionResult {
                    crop_type: table.crop_name(label)?.to_string(),
                    disease_type: table.disease_name(label)?.to_string(),
                    is_healthy: table.is_healthy(label),
                    class_name,
                    raw_confidence: raw,
                    // Only the primary candidate carries a calibrated score
                    calibrated_confidence: if rank == 0 { calibrated_top } else { raw },
                    ensemble_agreement: agreement,
                    uncertainty,
                })
            })
            .collect()
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
