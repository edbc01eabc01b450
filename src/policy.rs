//! Decision Policy Module
//!
//! Pure routing logic: given calibrated confidence, quality suitability,
//! ensemble degradation and the healthy flag, decide whether the result is
//! accepted or escalated to a human expert. The rules form a fixed
//! priority list; the first matching rule wins and evaluation happens
//! exactly once per analysis.

use serde::{Deserialize, Serialize};

use crate::calibration::HealthyBand;
use crate::config::{EngineConfig, HealthyThresholds};

pub const REASON_QUALITY: &str = "image quality insufficient";
pub const REASON_LOW_CONFIDENCE: &str = "low confidence";
pub const REASON_DEGRADED: &str = "inference degraded";

/// Routing outcome for one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    AcceptWithCaveat,
    Escalate,
}

/// Inputs the policy looks at. Everything is computed upstream; the
/// policy itself touches no image data and holds no state.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput {
    pub calibrated_confidence: f32,
    pub quality_suitable: bool,
    /// Caller asked to run inference despite a failed quality gate
    pub forced: bool,
    pub degraded: bool,
    pub is_healthy: bool,
}

/// Decision plus the reason recorded in the report when it is not a
/// plain accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub decision: Decision,
    pub reason: Option<String>,
}

impl PolicyOutcome {
    fn accept() -> Self {
        Self {
            decision: Decision::Accept,
            reason: None,
        }
    }

    fn caveat(reason: &str) -> Self {
        Self {
            decision: Decision::AcceptWithCaveat,
            reason: Some(reason.to_string()),
        }
    }

    fn escalate(reason: &str) -> Self {
        Self {
            decision: Decision::Escalate,
            reason: Some(reason.to_string()),
        }
    }

    /// Expert review is required exactly when the decision escalates.
    pub fn requires_expert_review(&self) -> bool {
        self.decision == Decision::Escalate
    }
}

/// First-match rule evaluation over the configured thresholds.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    confidence_floor: f32,
    high: f32,
    healthy: HealthyThresholds,
}

impl DecisionPolicy {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            confidence_floor: config.confidence_floor,
            high: config.bands.high,
            healthy: config.healthy,
        }
    }

    /// Evaluate the rule list, highest priority first.
    pub fn evaluate(&self, input: &PolicyInput) -> PolicyOutcome {
        // 1. Unsuitable quality escalates, unless the caller forced
        //    inference past the gate.
        if !input.quality_suitable && !input.forced {
            return PolicyOutcome::escalate(REASON_QUALITY);
        }

        // 2. Degraded inference is never trusted outright.
        if input.degraded {
            return PolicyOutcome::escalate(REASON_DEGRADED);
        }

        // 3. Below the floor nothing is actionable.
        if input.calibrated_confidence < self.confidence_floor {
            return PolicyOutcome::escalate(REASON_LOW_CONFIDENCE);
        }

        let c = input.calibrated_confidence;

        // 4. A healthy call in the uncertain band is never claimed
        //    silently: declaring a diseased plant healthy sends the
        //    farmer away untreated.
        if input.is_healthy
            && HealthyBand::from_confidence(c, &self.healthy) == HealthyBand::Uncertain
        {
            return PolicyOutcome::caveat(REASON_LOW_CONFIDENCE);
        }

        // 5. Route by the general bands.
        if c >= self.high {
            PolicyOutcome::accept()
        } else {
            PolicyOutcome::caveat(REASON_LOW_CONFIDENCE)
        }
    }
}
