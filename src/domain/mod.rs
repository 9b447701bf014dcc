//! Domain types for the AEDIS pipeline.
//!
//! This module contains the core data structures:
//! - Entities and relationships produced by extraction
//! - Planner runs and strategy payloads
//! - Judge runs, verdicts, and remediation
//! - The structured response envelope

pub mod entity;
pub mod envelope;
pub mod judgment;
pub mod strategy;

// Re-export commonly used types
pub use entity::{
    context_window, entity_id, relationship_id, AltLabel, EntityType, ExtractedEntity,
    ExtractedRelationship, ExtractionMethod, UnknownLabel,
};
pub use envelope::Envelope;
pub use judgment::{
    Dimension, DimensionFailure, DimensionScores, JudgeRun, RejectionArtifact, Remediation,
    Verdict,
};
pub use strategy::{Claim, Objective, PlannerRun, RunStatus, StrategyPayload};
