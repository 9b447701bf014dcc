//! Evidence and provenance model for grounding extracted claims.
//!
//! Every downstream write carries a verifiable link back to exact character
//! offsets in a content-hash-anchored canonical artifact. The gate here is
//! the single choke point that validates those links.
//!
//! # Design Principles
//!
//! - **Fail closed**: incomplete or inconsistent provenance blocks the
//!   write; the default outcome is never "persist with degraded guarantees".
//! - **Hash anchoring**: spans reference a specific canonical version by
//!   content hash, so provenance pointing at mutated content is detected.
//! - **Typed reasons**: every rejection carries a machine-readable reason
//!   code (`missing_spans`, `invalid_offsets`, `hash_mismatch`,
//!   `quote_mismatch`) so callers can remediate.

pub mod gate;
pub mod types;

pub use gate::{ArtifactIndex, GateReason, ProvenanceGate, ProvenanceGateError};
pub use types::{compute_hash, CanonicalArtifact, EvidenceSpan, ProvenanceRecord, SpanOffsetError};
