//! aedis - hybrid entity extraction with a provenance-gated judge pipeline
//!
//! Combines a deterministic rule-based NER adapter with an LLM adapter,
//! merges their outputs into a validated entity set, composes the result
//! into an evidence-backed strategy, scores it with a deterministic judge,
//! and persists it only if the verdict is PASS.
//!
//! # Architecture
//!
//! The system is built around verifiable provenance:
//! - Original documents are stored as immutable, content-hashed canonical
//!   artifacts
//! - Every derived artifact carries evidence spans pointing back into a
//!   canonical version
//! - A provenance gate re-validates those spans inside the writing
//!   transaction; a failing judge verdict blocks persistence entirely
//!
//! # Modules
//!
//! - `adapters`: Extraction backends (rule-based NER, LLM)
//! - `core`: Pipeline engines (merge, hybrid extraction, planner, judge)
//! - `domain`: Data structures (entities, strategies, judgments)
//! - `evidence`: Evidence spans, provenance records, the gate
//! - `store`: SQLite persistence and the transactional write gate
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Extract entities from a document
//! echo "Acme Corp signed with Beta Holdings." | aedis extract
//!
//! # Run the full pipeline and persist if the judge passes it
//! aedis run --input contract.txt
//!
//! # Read back provenance for a stored artifact
//! aedis provenance claim <claim-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod evidence;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{HybridExtractor, Judge, MergeEngine, Planner};
pub use domain::{
    EntityType, Envelope, ExtractedEntity, ExtractedRelationship, ExtractionMethod, JudgeRun,
    PlannerRun, Verdict,
};
pub use evidence::{
    ArtifactIndex, CanonicalArtifact, EvidenceSpan, ProvenanceGate, ProvenanceRecord,
};
pub use store::{GovernedTarget, GovernedTx, PersistenceBlockedError, Store, StoreError};
