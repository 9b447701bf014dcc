//! Pipeline engines: hybrid extraction, merge, planner, judge.

pub mod extraction;
pub mod judge;
pub mod merge;
pub mod planner;

pub use extraction::HybridExtractor;
pub use judge::{Judge, JudgeConfig, PROVENANCE_COMPLETENESS_THRESHOLD};
pub use merge::{
    ConfidenceScores, HybridExtractionResult, MergeConfig, MergeEngine, MethodResult,
};
pub use planner::{Planner, KNOWN_HEURISTICS, RISK_CONFIDENCE_FLOOR};
