//! Judge run, verdict, and remediation types.
//!
//! A judge run is created once and never mutated; a re-attempt after a FAIL
//! creates a new planner/judge pair so judged artifacts remain immutable
//! history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five deterministic scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    SchemaCompliance,
    ObjectiveSuccess,
    HeuristicFidelity,
    ProvenanceCompleteness,
    RiskDisclosure,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::SchemaCompliance => "schema_compliance",
            Dimension::ObjectiveSuccess => "objective_success",
            Dimension::HeuristicFidelity => "heuristic_fidelity",
            Dimension::ProvenanceCompleteness => "provenance_completeness",
            Dimension::RiskDisclosure => "risk_disclosure",
        }
    }

    pub const ALL: [Dimension; 5] = [
        Dimension::SchemaCompliance,
        Dimension::ObjectiveSuccess,
        Dimension::HeuristicFidelity,
        Dimension::ProvenanceCompleteness,
        Dimension::RiskDisclosure,
    ];
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dimension scores, each 0..1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub schema_compliance: f64,
    pub objective_success: f64,
    pub heuristic_fidelity: f64,
    pub provenance_completeness: f64,
    pub risk_disclosure: f64,
}

impl DimensionScores {
    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::SchemaCompliance => self.schema_compliance,
            Dimension::ObjectiveSuccess => self.objective_success,
            Dimension::HeuristicFidelity => self.heuristic_fidelity,
            Dimension::ProvenanceCompleteness => self.provenance_completeness,
            Dimension::RiskDisclosure => self.risk_disclosure,
        }
    }
}

/// PASS or FAIL. Both are terminal for the planner run they score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failing dimension with actionable detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionFailure {
    pub dimension: Dimension,
    pub score: f64,
    pub threshold: f64,
    /// What specifically failed (objective name, claim id, reason code) —
    /// never a generic "analysis failed".
    pub detail: String,
}

/// Structured guidance produced on FAIL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    pub failed_dimensions: Vec<DimensionFailure>,
}

impl Remediation {
    pub fn names_dimension(&self, dim: Dimension) -> bool {
        self.failed_dimensions.iter().any(|f| f.dimension == dim)
    }
}

/// One judge evaluation of one planner run. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRun {
    pub id: Uuid,
    pub planner_run_id: Uuid,
    pub scores: DimensionScores,
    pub verdict: Verdict,
    /// Populated only on FAIL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
    pub created_at: DateTime<Utc>,
}

/// Audit record written when persistence is blocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionArtifact {
    pub id: Uuid,
    pub planner_run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_run_id: Option<Uuid>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
    pub created_at: DateTime<Utc>,
}
