//! Planner run and strategy payload types.
//!
//! A strategy is a structured claim set composed from validated extraction
//! output. Planner runs are immutable after creation except for the single
//! Drafted -> Scored status transition written by the judge step; a corrected
//! attempt is a new run, never a mutation of a failed one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::ProvenanceRecord;

/// Lifecycle status of a planner run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Composed, not yet evaluated
    Drafted,
    /// Evaluated by a judge run (terminal)
    Scored,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Drafted => "drafted",
            RunStatus::Scored => "scored",
        }
    }
}

/// A single claim backed by verifiable provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// Deterministic claim id
    pub id: String,

    /// Human-readable statement of the claim
    pub statement: String,

    /// Validated entities this claim references
    #[serde(default)]
    pub entity_ids: Vec<String>,

    /// Validated relationships this claim references
    #[serde(default)]
    pub relationship_ids: Vec<String>,

    /// Confidence inherited from the backing extraction
    pub confidence: f64,

    /// Evidence envelope tying the claim to canonical text
    pub provenance: ProvenanceRecord,
}

/// An objective the strategy is meant to satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub success_criteria: String,
    /// Claims that evidence this objective. An objective with no resolvable
    /// evidence links fails the objective_success dimension.
    #[serde(default)]
    pub evidence_claim_ids: Vec<String>,
}

/// The structured claim set a planner composes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPayload {
    /// Document this strategy was derived from
    pub document_id: String,

    pub objectives: Vec<Objective>,

    /// Names of heuristics applied during composition
    #[serde(default)]
    pub heuristics_applied: Vec<String>,

    pub claims: Vec<Claim>,

    /// Disclosed risks (low-confidence claims, single-method extraction)
    #[serde(default)]
    pub risk_notes: Vec<String>,
}

/// One planner execution. Owns its judge run's lifecycle: a judge only ever
/// evaluates its own planner run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerRun {
    pub id: Uuid,
    pub strategy: StrategyPayload,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

impl PlannerRun {
    pub fn new(strategy: StrategyPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy,
            status: RunStatus::Drafted,
            created_at: Utc::now(),
        }
    }

    /// Mark the run as scored. The only permitted mutation.
    pub fn mark_scored(&mut self) {
        self.status = RunStatus::Scored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_starts_drafted() {
        let run = PlannerRun::new(StrategyPayload {
            document_id: "doc-1".to_string(),
            objectives: vec![],
            heuristics_applied: vec![],
            claims: vec![],
            risk_notes: vec![],
        });
        assert_eq!(run.status, RunStatus::Drafted);
    }
}
