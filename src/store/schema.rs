//! SQLite schema. Applied idempotently on every open.

pub const SCHEMA: &str = r#"
-- Append-only canonical artifact versions. One row per (artifact, content).
CREATE TABLE IF NOT EXISTS canonical_artifacts (
    artifact_id TEXT NOT NULL,
    sha256      TEXT NOT NULL,
    text        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (artifact_id, sha256)
);

CREATE INDEX IF NOT EXISTS idx_canonical_artifacts_id
    ON canonical_artifacts (artifact_id);

-- Governed artifact classes other than analysis versions share one table,
-- discriminated by target_type. Rows exist only if their provenance passed
-- the gate inside the writing transaction.
CREATE TABLE IF NOT EXISTS governed_artifacts (
    id          TEXT PRIMARY KEY,
    target_type TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_governed_artifacts_type
    ON governed_artifacts (target_type);

-- Analysis versions keep their parent link for lineage queries.
CREATE TABLE IF NOT EXISTS analysis_versions (
    id         TEXT PRIMARY KEY,
    parent_id  TEXT REFERENCES analysis_versions (id),
    payload    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS provenance_records (
    id          TEXT PRIMARY KEY,
    target_type TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    extractor   TEXT NOT NULL,
    confidence  REAL NOT NULL,
    spans       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_provenance_target
    ON provenance_records (target_type, target_id);

CREATE TABLE IF NOT EXISTS planner_runs (
    id         TEXT PRIMARY KEY,
    strategy   TEXT NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS judge_runs (
    id             TEXT PRIMARY KEY,
    planner_run_id TEXT NOT NULL REFERENCES planner_runs (id),
    scores         TEXT NOT NULL,
    verdict        TEXT NOT NULL,
    remediation    TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_judge_runs_planner
    ON judge_runs (planner_run_id);

-- Written when persistence is blocked; the audit trail of rejections.
CREATE TABLE IF NOT EXISTS rejection_artifacts (
    id             TEXT PRIMARY KEY,
    planner_run_id TEXT NOT NULL,
    judge_run_id   TEXT,
    reason         TEXT NOT NULL,
    remediation    TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rejections_planner
    ON rejection_artifacts (planner_run_id);
"#;
