//! Deterministic judge.
//!
//! Scores a planner run's strategy against five dimensions and emits a
//! PASS/FAIL verdict. Given the same strategy payload and the same
//! provenance state the verdict is always the same: no randomness, no
//! time-dependent scoring. FAIL produces remediation naming exactly which
//! dimensions failed and why.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    Dimension, DimensionFailure, DimensionScores, JudgeRun, PlannerRun, Remediation, Verdict,
};
use crate::evidence::{ArtifactIndex, ProvenanceGate, ProvenanceGateError};

use super::planner::{KNOWN_HEURISTICS, RISK_CONFIDENCE_FLOOR};

/// Verdict thresholds per dimension.
///
/// provenance_completeness is not configurable: partial provenance is never
/// acceptable, matching the gate's all-or-nothing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_schema_threshold")]
    pub schema_compliance_threshold: f64,
    #[serde(default = "default_objective_threshold")]
    pub objective_success_threshold: f64,
    #[serde(default = "default_heuristic_threshold")]
    pub heuristic_fidelity_threshold: f64,
    #[serde(default = "default_risk_threshold")]
    pub risk_disclosure_threshold: f64,
}

fn default_schema_threshold() -> f64 {
    0.9
}
fn default_objective_threshold() -> f64 {
    0.7
}
fn default_heuristic_threshold() -> f64 {
    0.7
}
fn default_risk_threshold() -> f64 {
    0.5
}

/// Partial provenance is never acceptable.
pub const PROVENANCE_COMPLETENESS_THRESHOLD: f64 = 1.0;

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            schema_compliance_threshold: default_schema_threshold(),
            objective_success_threshold: default_objective_threshold(),
            heuristic_fidelity_threshold: default_heuristic_threshold(),
            risk_disclosure_threshold: default_risk_threshold(),
        }
    }
}

impl JudgeConfig {
    pub fn threshold(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::SchemaCompliance => self.schema_compliance_threshold,
            Dimension::ObjectiveSuccess => self.objective_success_threshold,
            Dimension::HeuristicFidelity => self.heuristic_fidelity_threshold,
            Dimension::ProvenanceCompleteness => PROVENANCE_COMPLETENESS_THRESHOLD,
            Dimension::RiskDisclosure => self.risk_disclosure_threshold,
        }
    }
}

pub struct Judge {
    config: JudgeConfig,
}

impl Default for Judge {
    fn default() -> Self {
        Self::new(JudgeConfig::default())
    }
}

/// One scored dimension with the details of what failed.
struct Scored {
    score: f64,
    problems: Vec<String>,
}

impl Judge {
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Evaluate a planner run and record the Drafted -> Scored transition.
    ///
    /// Both PASS and FAIL are terminal for this run; a corrected attempt is
    /// a new planner/judge pair.
    #[instrument(skip_all, fields(planner_run_id = %run.id))]
    pub fn evaluate(&self, run: &mut PlannerRun, index: &dyn ArtifactIndex) -> JudgeRun {
        let strategy = &run.strategy;

        let scored = [
            (Dimension::SchemaCompliance, score_schema(strategy)),
            (Dimension::ObjectiveSuccess, score_objectives(strategy)),
            (Dimension::HeuristicFidelity, score_heuristics(strategy)),
            (
                Dimension::ProvenanceCompleteness,
                score_provenance(strategy, index),
            ),
            (Dimension::RiskDisclosure, score_risk(strategy)),
        ];

        let scores = DimensionScores {
            schema_compliance: scored[0].1.score,
            objective_success: scored[1].1.score,
            heuristic_fidelity: scored[2].1.score,
            provenance_completeness: scored[3].1.score,
            risk_disclosure: scored[4].1.score,
        };

        let mut failures: Vec<DimensionFailure> = Vec::new();
        for (dimension, outcome) in scored {
            let threshold = self.config.threshold(dimension);
            if outcome.score < threshold {
                failures.push(DimensionFailure {
                    dimension,
                    score: outcome.score,
                    threshold,
                    detail: if outcome.problems.is_empty() {
                        format!("score {:.2} below threshold {:.2}", outcome.score, threshold)
                    } else {
                        outcome.problems.join("; ")
                    },
                });
            }
        }

        let verdict = if failures.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        run.mark_scored();

        info!(%verdict, failed = failures.len(), "judge verdict");
        JudgeRun {
            id: Uuid::new_v4(),
            planner_run_id: run.id,
            scores,
            verdict,
            remediation: (!failures.is_empty()).then_some(Remediation {
                failed_dimensions: failures,
            }),
            created_at: Utc::now(),
        }
    }
}

/// Structural checks: non-empty claim set, unique claim ids, claims that
/// reference at least one entity, a non-empty document id.
fn score_schema(strategy: &crate::domain::StrategyPayload) -> Scored {
    let mut problems = Vec::new();
    let mut passed = 0usize;
    let mut total = 0usize;

    total += 1;
    if strategy.document_id.trim().is_empty() {
        problems.push("strategy has no document_id".to_string());
    } else {
        passed += 1;
    }

    total += 1;
    if strategy.claims.is_empty() {
        problems.push("strategy contains no claims".to_string());
    } else {
        passed += 1;
    }

    total += 1;
    let ids: BTreeSet<&str> = strategy.claims.iter().map(|c| c.id.as_str()).collect();
    if ids.len() != strategy.claims.len() {
        problems.push("duplicate claim ids".to_string());
    } else {
        passed += 1;
    }

    total += 1;
    let unreferenced: Vec<&str> = strategy
        .claims
        .iter()
        .filter(|c| c.entity_ids.is_empty())
        .map(|c| c.id.as_str())
        .collect();
    if unreferenced.is_empty() {
        passed += 1;
    } else {
        problems.push(format!(
            "claims reference no entities: {}",
            unreferenced.join(", ")
        ));
    }

    Scored {
        score: passed as f64 / total as f64,
        problems,
    }
}

/// Fraction of objectives with at least one evidence link that resolves to
/// an existing claim.
fn score_objectives(strategy: &crate::domain::StrategyPayload) -> Scored {
    if strategy.objectives.is_empty() {
        return Scored {
            score: 0.0,
            problems: vec!["strategy declares no objectives".to_string()],
        };
    }

    let claim_ids: BTreeSet<&str> = strategy.claims.iter().map(|c| c.id.as_str()).collect();
    let mut problems = Vec::new();
    let mut satisfied = 0usize;

    for objective in &strategy.objectives {
        let resolved = objective
            .evidence_claim_ids
            .iter()
            .filter(|id| claim_ids.contains(id.as_str()))
            .count();
        if objective.evidence_claim_ids.is_empty() {
            problems.push(format!(
                "objective '{}' has no evidence links",
                objective.name
            ));
        } else if resolved == 0 {
            problems.push(format!(
                "objective '{}' evidence links resolve to no known claim",
                objective.name
            ));
        } else {
            satisfied += 1;
        }
    }

    Scored {
        score: satisfied as f64 / strategy.objectives.len() as f64,
        problems,
    }
}

/// Fraction of applied heuristics present in the known registry.
fn score_heuristics(strategy: &crate::domain::StrategyPayload) -> Scored {
    if strategy.heuristics_applied.is_empty() {
        return Scored {
            score: 0.0,
            problems: vec!["no heuristics declared".to_string()],
        };
    }

    let mut problems = Vec::new();
    let mut known = 0usize;
    for heuristic in &strategy.heuristics_applied {
        if KNOWN_HEURISTICS.contains(&heuristic.as_str()) {
            known += 1;
        } else {
            problems.push(format!("unknown heuristic '{heuristic}'"));
        }
    }

    Scored {
        score: known as f64 / strategy.heuristics_applied.len() as f64,
        problems,
    }
}

/// Fraction of claims whose provenance passes the gate against the current
/// canonical state. The threshold for this dimension is fixed at 1.0.
fn score_provenance(strategy: &crate::domain::StrategyPayload, index: &dyn ArtifactIndex) -> Scored {
    if strategy.claims.is_empty() {
        return Scored {
            score: 0.0,
            problems: vec!["no claims to verify".to_string()],
        };
    }

    let gate = ProvenanceGate::new(index);
    let mut problems = Vec::new();
    let mut verified = 0usize;

    for claim in &strategy.claims {
        match gate.validate(&claim.provenance) {
            Ok(()) => verified += 1,
            Err(ProvenanceGateError::Rejected { reason, detail }) => {
                problems.push(format!("claim {}: {} ({})", claim.id, reason, detail));
            }
            Err(ProvenanceGateError::Lookup(err)) => {
                problems.push(format!("claim {}: provenance lookup failed: {err}", claim.id));
            }
        }
    }

    Scored {
        score: verified as f64 / strategy.claims.len() as f64,
        problems,
    }
}

/// Low-confidence claims must be disclosed in risk notes.
fn score_risk(strategy: &crate::domain::StrategyPayload) -> Scored {
    let risky = strategy
        .claims
        .iter()
        .filter(|c| c.confidence <= RISK_CONFIDENCE_FLOOR)
        .count();

    if risky > 0 && strategy.risk_notes.is_empty() {
        Scored {
            score: 0.0,
            problems: vec![format!(
                "{risky} low-confidence claim(s) with no risk disclosure"
            )],
        }
    } else {
        Scored {
            score: 1.0,
            problems: Vec::new(),
        }
    }
}
