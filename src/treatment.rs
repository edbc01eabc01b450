//! Treatment Advisory Module
//!
//! Static lookup from disease label to a treatment advisory. Unknown
//! labels resolve to a generic "consult an expert" advisory rather than
//! an error; a missing table entry must never fail an analysis.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};

/// How urgently a diagnosis needs intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// One advisory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRecord {
    /// Class label the entry is keyed on, e.g. "tomato___early_blight"
    pub disease_key: String,
    /// Human-readable disease name
    pub display_name: String,
    pub severity: Severity,
    /// Actionable guidance shown to the user
    pub advisory: String,
}

/// Keyed advisory table, loaded once at initialization.
#[derive(Debug, Clone, Default)]
pub struct TreatmentLookup {
    records: HashMap<String, TreatmentRecord>,
}

impl TreatmentLookup {
    pub fn new(records: Vec<TreatmentRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.disease_key.clone(), r))
            .collect();
        Self { records }
    }

    /// Load a JSON array of records.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let records: Vec<TreatmentRecord> = serde_json::from_str(&json)?;
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up an advisory by class label. Total: unknown labels get a
    /// generic escalation advisory.
    pub fn advisory_for(&self, class_name: &str) -> TreatmentRecord {
        match self.records.get(class_name) {
            Some(record) => record.clone(),
            None => {
                warn!(class = class_name, "no treatment entry, using fallback");
                Self::fallback(class_name)
            }
        }
    }

    fn fallback(class_name: &str) -> TreatmentRecord {
        TreatmentRecord {
            disease_key: class_name.to_string(),
            display_name: "Uncertain diagnosis".to_string(),
            severity: Severity::Unknown,
            advisory: "No specific guidance is available for this result. \
                       Consult a local agricultural expert before treating."
                .to_string(),
        }
    }

    /// Built-in advisories covering the default class table.
    pub fn builtin() -> Self {
        let entry = |key: &str, name: &str, severity: Severity, advisory: &str| TreatmentRecord {
            disease_key: key.to_string(),
            display_name: name.to_string(),
            severity,
            advisory: advisory.to_string(),
        };

        Self::new(vec![
            entry(
                "tomato___healthy",
                "Healthy Tomato",
                Severity::None,
                "No disease detected. Maintain the current watering and fertilization schedule.",
            ),
            entry(
                "tomato___early_blight",
                "Tomato Early Blight",
                Severity::Medium,
                "Remove affected lower leaves, improve air circulation, and apply a \
                 copper-based fungicide every 7-10 days.",
            ),
            entry(
                "tomato___late_blight",
                "Tomato Late Blight",
                Severity::Critical,
                "Destroy infected plants immediately to stop spread. Apply a protectant \
                 fungicide to remaining plants and avoid overhead watering.",
            ),
            entry(
                "potato___healthy",
                "Healthy Potato",
                Severity::None,
                "No disease detected. Continue regular hilling and monitor foliage weekly.",
            ),
            entry(
                "potato___early_blight",
                "Potato Early Blight",
                Severity::Medium,
                "Apply a chlorothalonil or copper fungicide at first sign and rotate crops \
                 next season.",
            ),
            entry(
                "potato___late_blight",
                "Potato Late Blight",
                Severity::Critical,
                "Remove and destroy infected foliage. Apply a systemic fungicide and \
                 harvest tubers only after vines have fully died back.",
            ),
            entry(
                "corn___healthy",
                "Healthy Corn",
                Severity::None,
                "No disease detected. Keep nitrogen levels adequate and scout for rust weekly.",
            ),
            entry(
                "corn___common_rust",
                "Corn Common Rust",
                Severity::Low,
                "Usually minor on resistant hybrids. Apply a foliar fungicide only if \
                 pustules appear before tasseling.",
            ),
            entry(
                "corn___northern_leaf_blight",
                "Corn Northern Leaf Blight",
                Severity::High,
                "Apply a foliar fungicide at first lesions, plant resistant hybrids next \
                 season, and till infected residue after harvest.",
            ),
        ])
    }
}
