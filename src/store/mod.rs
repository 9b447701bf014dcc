//! Durable store and transactional persistence gate.
//!
//! Backed by SQLite. Canonical artifacts are append-only and
//! content-hash-unique; every governed artifact class is writable only
//! through `GovernedTx`, whose write methods take a provenance record and
//! re-run the provenance gate inside the live transaction. Persistence of
//! planner output is gated on the judge verdict: FAIL (or a missing or
//! mismatched judge run) writes a rejection artifact and nothing else.

mod schema;

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{JudgeRun, PlannerRun, RejectionArtifact, Remediation, Verdict};
use crate::evidence::{
    ArtifactIndex, CanonicalArtifact, ProvenanceGate, ProvenanceGateError, ProvenanceRecord,
};

pub use schema::SCHEMA;

/// Governed artifact classes. Every one of these write paths goes through
/// the provenance gate; there is no ungated variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernedTarget {
    OrganizationProposal,
    KnowledgeRecord,
    MemoryClaim,
    AnalysisVersion,
    HeuristicPromotion,
}

impl GovernedTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernedTarget::OrganizationProposal => "organization_proposal",
            GovernedTarget::KnowledgeRecord => "knowledge_record",
            GovernedTarget::MemoryClaim => "memory_claim",
            GovernedTarget::AnalysisVersion => "analysis_version",
            GovernedTarget::HeuristicPromotion => "heuristic_promotion",
        }
    }

    pub const ALL: [GovernedTarget; 5] = [
        GovernedTarget::OrganizationProposal,
        GovernedTarget::KnowledgeRecord,
        GovernedTarget::MemoryClaim,
        GovernedTarget::AnalysisVersion,
        GovernedTarget::HeuristicPromotion,
    ];
}

impl fmt::Display for GovernedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected, handled outcome when the judge verdict blocks persistence.
/// Distinguishable from infrastructure errors so callers can render
/// "rejected, here's why" instead of a generic failure.
#[derive(Debug, Error)]
#[error("persistence blocked for planner run {planner_run_id}: {detail}")]
pub struct PersistenceBlockedError {
    pub planner_run_id: Uuid,
    pub detail: String,
    pub remediation: Option<Remediation>,
}

/// Store failure taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Blocked(#[from] PersistenceBlockedError),

    #[error(transparent)]
    Gate(#[from] ProvenanceGateError),

    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of a committed `persist_if_passed`.
#[derive(Debug)]
pub struct CommitResult<T> {
    /// Value returned by the write closure
    pub output: T,
    /// Governed artifact rows written in the transaction
    pub rows_written: u64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (and migrate) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)
            .context("failed to apply store schema")?;
        Ok(Self { conn })
    }

    /// Record a canonical artifact version. Append-only: the
    /// `(artifact_id, sha256)` pair is unique, re-inserting the same
    /// version is a no-op, and prior versions are never touched.
    pub fn put_canonical_artifact(&self, artifact: &CanonicalArtifact) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO canonical_artifacts
                 (artifact_id, sha256, text, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                artifact.artifact_id,
                artifact.sha256,
                artifact.text,
                artifact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Provenance readback for audit and visualization.
    pub fn get_provenance(
        &self,
        target_type: &str,
        target_id: &str,
    ) -> Result<Option<ProvenanceRecord>, StoreError> {
        read_provenance(&self.conn, target_type, target_id)
    }

    pub fn get_rejections(&self, planner_run_id: Uuid) -> Result<Vec<RejectionArtifact>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, planner_run_id, judge_run_id, reason, remediation, created_at
               FROM rejection_artifacts WHERE planner_run_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![planner_run_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let planner: String = row.get(1)?;
            let judge: Option<String> = row.get(2)?;
            let reason: String = row.get(3)?;
            let remediation: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok((id, planner, judge, reason, remediation, created_at))
        })?;

        let mut rejections = Vec::new();
        for row in rows {
            let (id, planner, judge, reason, remediation, created_at) = row?;
            rejections.push(RejectionArtifact {
                id: Uuid::parse_str(&id).context("malformed rejection id")?,
                planner_run_id: Uuid::parse_str(&planner).context("malformed planner run id")?,
                judge_run_id: judge
                    .map(|j| Uuid::parse_str(&j))
                    .transpose()
                    .context("malformed judge run id")?,
                reason,
                remediation: remediation
                    .map(|r| serde_json::from_str(&r))
                    .transpose()
                    .context("malformed remediation payload")?,
                created_at: created_at
                    .parse()
                    .context("malformed rejection timestamp")?,
            });
        }
        Ok(rejections)
    }

    /// Count rows of a governed artifact class (used by audits and tests).
    pub fn count_governed(&self, target: GovernedTarget) -> Result<u64, StoreError> {
        let count: u64 = match target {
            GovernedTarget::AnalysisVersion => self.conn.query_row(
                "SELECT COUNT(*) FROM analysis_versions",
                [],
                |row| row.get(0),
            )?,
            other => self.conn.query_row(
                "SELECT COUNT(*) FROM governed_artifacts WHERE target_type = ?1",
                params![other.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    /// The fail-closed transactional write gate.
    ///
    /// Opens one transaction. A missing, mismatched, or failing judge run
    /// writes exactly one rejection artifact (plus the run rows for audit)
    /// and blocks — a missing verdict is never treated as "proceed". On
    /// PASS the closure performs the downstream writes through
    /// `GovernedTx`, which re-runs the provenance gate per artifact; any
    /// error rolls back the entire transaction so no partial writes
    /// survive.
    pub fn persist_if_passed<T, F>(
        &mut self,
        planner: &PlannerRun,
        judge: Option<&JudgeRun>,
        write_fn: F,
    ) -> Result<CommitResult<T>, StoreError>
    where
        F: FnOnce(&mut GovernedTx<'_>) -> Result<T, StoreError>,
    {
        let tx = self.conn.transaction()?;

        insert_planner_run(&tx, planner)?;
        if let Some(judge) = judge {
            insert_judge_run(&tx, judge)?;
        }

        let block_reason = match judge {
            None => Some("no judge run recorded for this planner run".to_string()),
            Some(j) if j.planner_run_id != planner.id => Some(format!(
                "judge run {} evaluates planner run {}, not {}",
                j.id, j.planner_run_id, planner.id
            )),
            Some(j) if j.verdict != Verdict::Pass => {
                Some(format!("judge verdict is {}", j.verdict))
            }
            Some(_) => None,
        };

        if let Some(reason) = block_reason {
            let remediation = judge.and_then(|j| j.remediation.clone());
            insert_rejection(&tx, planner.id, judge.map(|j| j.id), &reason, remediation.as_ref())?;
            tx.commit()?;

            warn!(planner_run_id = %planner.id, %reason, "persistence blocked");
            return Err(PersistenceBlockedError {
                planner_run_id: planner.id,
                detail: reason,
                remediation,
            }
            .into());
        }

        let mut governed = GovernedTx {
            tx: &tx,
            rows_written: 0,
        };
        let output = write_fn(&mut governed)?;
        let rows_written = governed.rows_written;

        tx.commit()?;
        info!(planner_run_id = %planner.id, rows_written, "persistence committed");
        Ok(CommitResult {
            output,
            rows_written,
        })
    }
}

impl ArtifactIndex for Store {
    fn latest_canonical(&self, artifact_id: &str) -> Result<Option<CanonicalArtifact>> {
        latest_canonical(&self.conn, artifact_id)
    }
}

impl ArtifactIndex for Connection {
    fn latest_canonical(&self, artifact_id: &str) -> Result<Option<CanonicalArtifact>> {
        latest_canonical(self, artifact_id)
    }
}

fn latest_canonical(conn: &Connection, artifact_id: &str) -> Result<Option<CanonicalArtifact>> {
    let row = conn
        .query_row(
            "SELECT artifact_id, sha256, text, created_at
               FROM canonical_artifacts
              WHERE artifact_id = ?1
              ORDER BY rowid DESC LIMIT 1",
            params![artifact_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .context("canonical artifact lookup failed")?;

    row.map(|(artifact_id, sha256, text, created_at)| {
        Ok(CanonicalArtifact {
            artifact_id,
            sha256,
            text,
            created_at: created_at
                .parse()
                .context("malformed canonical artifact timestamp")?,
        })
    })
    .transpose()
}

/// Transaction handle exposing the governed write paths.
///
/// The only way to create rows in the governed tables. Every write method
/// takes a provenance record and validates it against the same transaction
/// before inserting, so the no-bypass invariant holds structurally.
pub struct GovernedTx<'a> {
    tx: &'a Transaction<'a>,
    rows_written: u64,
}

impl<'a> GovernedTx<'a> {
    /// Write one governed artifact row with its provenance record.
    /// Returns the new row id.
    pub fn write_artifact(
        &mut self,
        target: GovernedTarget,
        payload: &serde_json::Value,
        provenance: &ProvenanceRecord,
    ) -> Result<String, StoreError> {
        if target == GovernedTarget::AnalysisVersion {
            return self.write_analysis_version(payload, None, provenance);
        }

        let conn: &Connection = self.tx;
        ProvenanceGate::new(conn).validate(provenance)?;

        let id = Uuid::new_v4().to_string();
        self.tx.execute(
            "INSERT INTO governed_artifacts (id, target_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                target.as_str(),
                payload.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        self.insert_provenance(&provenance.clone().with_target(target.as_str(), id.clone()))?;
        self.rows_written += 1;
        Ok(id)
    }

    /// Write a parent-linked analysis version row with its provenance.
    pub fn write_analysis_version(
        &mut self,
        payload: &serde_json::Value,
        parent_id: Option<&str>,
        provenance: &ProvenanceRecord,
    ) -> Result<String, StoreError> {
        let conn: &Connection = self.tx;
        ProvenanceGate::new(conn).validate(provenance)?;

        let id = Uuid::new_v4().to_string();
        self.tx.execute(
            "INSERT INTO analysis_versions (id, parent_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, parent_id, payload.to_string(), Utc::now().to_rfc3339()],
        )?;

        self.insert_provenance(
            &provenance
                .clone()
                .with_target(GovernedTarget::AnalysisVersion.as_str(), id.clone()),
        )?;
        self.rows_written += 1;
        Ok(id)
    }

    fn insert_provenance(&self, record: &ProvenanceRecord) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO provenance_records
                 (id, target_type, target_id, extractor, confidence, spans, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                record.target_type,
                record.target_id,
                record.extractor,
                record.confidence,
                serde_json::to_string(&record.spans)
                    .context("failed to serialize evidence spans")?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// Runs are immutable history once recorded: re-inserting a planner run may
// only advance its status (Drafted -> Scored), never rewrite its strategy.
fn insert_planner_run(tx: &Transaction<'_>, run: &PlannerRun) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO planner_runs (id, strategy, status, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET status = excluded.status",
        params![
            run.id.to_string(),
            serde_json::to_string(&run.strategy).context("failed to serialize strategy")?,
            run.status.as_str(),
            run.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_judge_run(tx: &Transaction<'_>, run: &JudgeRun) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO judge_runs
             (id, planner_run_id, scores, verdict, remediation, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run.id.to_string(),
            run.planner_run_id.to_string(),
            serde_json::to_string(&run.scores).context("failed to serialize scores")?,
            run.verdict.as_str(),
            run.remediation
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize remediation")?,
            run.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_rejection(
    tx: &Transaction<'_>,
    planner_run_id: Uuid,
    judge_run_id: Option<Uuid>,
    reason: &str,
    remediation: Option<&Remediation>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO rejection_artifacts
             (id, planner_run_id, judge_run_id, reason, remediation, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            planner_run_id.to_string(),
            judge_run_id.map(|id| id.to_string()),
            reason,
            remediation
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize remediation")?,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn read_provenance(
    conn: &Connection,
    target_type: &str,
    target_id: &str,
) -> Result<Option<ProvenanceRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT extractor, confidence, spans
               FROM provenance_records
              WHERE target_type = ?1 AND target_id = ?2
              ORDER BY rowid DESC LIMIT 1",
            params![target_type, target_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(extractor, confidence, spans)| {
        Ok(ProvenanceRecord {
            spans: serde_json::from_str(&spans).context("malformed stored evidence spans")?,
            extractor,
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            confidence,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceSpan;

    #[test]
    fn test_canonical_artifacts_are_append_only_and_versioned() {
        let store = Store::open_in_memory().unwrap();

        let v1 = CanonicalArtifact::from_text("doc-1", "version one");
        let v2 = CanonicalArtifact::from_text("doc-1", "version two");
        store.put_canonical_artifact(&v1).unwrap();
        store.put_canonical_artifact(&v1).unwrap(); // same version: no-op
        store.put_canonical_artifact(&v2).unwrap();

        let latest = store.latest_canonical("doc-1").unwrap().unwrap();
        assert_eq!(latest.sha256, v2.sha256);

        let count: u64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM canonical_artifacts WHERE artifact_id = 'doc-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_recorded_runs_are_immutable_history() {
        let mut store = Store::open_in_memory().unwrap();
        let artifact = CanonicalArtifact::from_text("doc-1", "Acme Corp signed the deal.");
        store.put_canonical_artifact(&artifact).unwrap();

        let planner = PlannerRun::new(crate::domain::StrategyPayload {
            document_id: "doc-1".to_string(),
            objectives: vec![],
            heuristics_applied: vec![],
            claims: vec![],
            risk_notes: vec![],
        });
        let judge = JudgeRun {
            id: Uuid::new_v4(),
            planner_run_id: planner.id,
            scores: crate::domain::DimensionScores {
                schema_compliance: 0.5,
                objective_success: 0.5,
                heuristic_fidelity: 0.5,
                provenance_completeness: 0.5,
                risk_disclosure: 0.5,
            },
            verdict: Verdict::Fail,
            remediation: None,
            created_at: Utc::now(),
        };

        // Blocked attempt commits the run rows for audit.
        let err = store
            .persist_if_passed(&planner, Some(&judge), |_tx| Ok(()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Blocked(_)));

        // A later attempt reusing the same judge id with a flipped verdict
        // must not rewrite the recorded FAIL.
        let mut tampered = judge.clone();
        tampered.verdict = Verdict::Pass;
        let _ = store.persist_if_passed(&planner, Some(&tampered), |_tx| Ok(()));

        let stored_verdict: String = store
            .conn
            .query_row(
                "SELECT verdict FROM judge_runs WHERE id = ?1",
                params![judge.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored_verdict, "FAIL");

        // The planner strategy is likewise never rewritten.
        let mut altered = planner.clone();
        altered.strategy.document_id = "doc-2".to_string();
        let _ = store.persist_if_passed(&altered, Some(&judge), |_tx| Ok(()));

        let stored_strategy: String = store
            .conn
            .query_row(
                "SELECT strategy FROM planner_runs WHERE id = ?1",
                params![planner.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert!(stored_strategy.contains("doc-1"));
    }

    #[test]
    fn test_provenance_round_trip_through_store() {
        let mut store = Store::open_in_memory().unwrap();
        let artifact = CanonicalArtifact::from_text("doc-1", "Acme Corp signed the deal.");
        store.put_canonical_artifact(&artifact).unwrap();

        let span = EvidenceSpan::from_text(&artifact, 0, 9).unwrap();
        let record = ProvenanceRecord::new(vec![span], "merged", "claim", "c1", 0.9);

        let planner = PlannerRun::new(crate::domain::StrategyPayload {
            document_id: "doc-1".to_string(),
            objectives: vec![],
            heuristics_applied: vec![],
            claims: vec![],
            risk_notes: vec![],
        });
        let judge = JudgeRun {
            id: Uuid::new_v4(),
            planner_run_id: planner.id,
            scores: crate::domain::DimensionScores {
                schema_compliance: 1.0,
                objective_success: 1.0,
                heuristic_fidelity: 1.0,
                provenance_completeness: 1.0,
                risk_disclosure: 1.0,
            },
            verdict: Verdict::Pass,
            remediation: None,
            created_at: Utc::now(),
        };

        let commit = store
            .persist_if_passed(&planner, Some(&judge), |tx| {
                tx.write_artifact(
                    GovernedTarget::KnowledgeRecord,
                    &serde_json::json!({"text": "Acme Corp"}),
                    &record,
                )
            })
            .unwrap();

        let stored = store
            .get_provenance("knowledge_record", &commit.output)
            .unwrap()
            .unwrap();
        assert_eq!(stored.spans.len(), 1);
        assert_eq!(stored.spans[0].quote, "Acme Corp");
        assert_eq!(stored.extractor, "merged");
    }
}
