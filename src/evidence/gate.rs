//! Provenance gate: the reusable guard in front of every governed write.
//!
//! The gate validates that a write carries a complete, internally consistent
//! provenance envelope before the write may proceed. It is invoked
//! synchronously, in-process, immediately before each governed write;
//! skipping it for any governed path is a correctness bug, which is why the
//! store only exposes write methods that call it.

use std::fmt;

use anyhow::Result;
use thiserror::Error;

use super::types::{CanonicalArtifact, ProvenanceRecord};

/// Lookup of the currently-recorded canonical version of an artifact.
///
/// Implemented by the durable store (and by an in-memory map in tests) so
/// the gate can be exercised in isolation.
pub trait ArtifactIndex {
    /// Latest canonical version for an artifact id, if any.
    fn latest_canonical(&self, artifact_id: &str) -> Result<Option<CanonicalArtifact>>;
}

/// Machine-readable reason code for a gate rejection.
///
/// Callers need the code to build actionable remediation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    MissingSpans,
    InvalidOffsets,
    HashMismatch,
    QuoteMismatch,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::MissingSpans => "missing_spans",
            GateReason::InvalidOffsets => "invalid_offsets",
            GateReason::HashMismatch => "hash_mismatch",
            GateReason::QuoteMismatch => "quote_mismatch",
        }
    }
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate failure. `Rejected` is never retried automatically — retrying will
/// not fix bad provenance. `Lookup` is an infrastructure failure and is kept
/// distinguishable from a rejection.
#[derive(Debug, Error)]
pub enum ProvenanceGateError {
    #[error("provenance rejected ({}): {detail}", reason.as_str())]
    Rejected { reason: GateReason, detail: String },

    #[error("provenance lookup failed: {0}")]
    Lookup(#[source] anyhow::Error),
}

impl ProvenanceGateError {
    fn rejected(reason: GateReason, detail: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    /// Reason code, if this is a rejection.
    pub fn reason(&self) -> Option<GateReason> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            Self::Lookup(_) => None,
        }
    }
}

/// The write gate itself. Constructed per call site over whatever index is
/// in scope (a live transaction during persistence, a plain connection for
/// readback, a map in tests) and passed explicitly, never looked up through
/// ambient global state.
pub struct ProvenanceGate<'a> {
    index: &'a dyn ArtifactIndex,
}

impl<'a> ProvenanceGate<'a> {
    pub fn new(index: &'a dyn ArtifactIndex) -> Self {
        Self { index }
    }

    /// Validate a write's provenance envelope. Checks, in order:
    ///
    /// 1. at least one span present (`missing_spans`)
    /// 2. per span, `start < end` (`invalid_offsets`)
    /// 3. per span, the declared hash matches the currently-recorded
    ///    canonical hash — also rejects spans naming unknown artifacts
    ///    (`hash_mismatch`)
    /// 4. per span, the quote matches the live slice of canonical text at
    ///    those offsets (`quote_mismatch`)
    pub fn validate(&self, record: &ProvenanceRecord) -> Result<(), ProvenanceGateError> {
        if record.spans.is_empty() {
            return Err(ProvenanceGateError::rejected(
                GateReason::MissingSpans,
                format!(
                    "provenance for {} '{}' carries no evidence spans",
                    record.target_type, record.target_id
                ),
            ));
        }

        for span in &record.spans {
            if span.start_char >= span.end_char {
                return Err(ProvenanceGateError::rejected(
                    GateReason::InvalidOffsets,
                    format!(
                        "span [{}, {}) in '{}' is empty or inverted",
                        span.start_char, span.end_char, span.source_artifact_id
                    ),
                ));
            }

            let artifact = self
                .index
                .latest_canonical(&span.source_artifact_id)
                .map_err(ProvenanceGateError::Lookup)?
                .ok_or_else(|| {
                    ProvenanceGateError::rejected(
                        GateReason::HashMismatch,
                        format!(
                            "no canonical artifact recorded for '{}'",
                            span.source_artifact_id
                        ),
                    )
                })?;

            if artifact.sha256 != span.source_sha256 {
                return Err(ProvenanceGateError::rejected(
                    GateReason::HashMismatch,
                    format!(
                        "span references {} but canonical version of '{}' is {}",
                        span.source_sha256, span.source_artifact_id, artifact.sha256
                    ),
                ));
            }

            let slice = artifact
                .text
                .get(span.start_char..span.end_char)
                .ok_or_else(|| {
                    ProvenanceGateError::rejected(
                        GateReason::InvalidOffsets,
                        format!(
                            "span [{}, {}) is out of range for '{}' (len {})",
                            span.start_char,
                            span.end_char,
                            span.source_artifact_id,
                            artifact.text.len()
                        ),
                    )
                })?;

            if slice != span.quote {
                return Err(ProvenanceGateError::rejected(
                    GateReason::QuoteMismatch,
                    format!(
                        "quote {:?} does not match canonical slice {:?} at [{}, {})",
                        span.quote, slice, span.start_char, span.end_char
                    ),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;

    /// In-memory artifact index for gate tests.
    #[derive(Default)]
    pub struct MemoryIndex {
        artifacts: HashMap<String, CanonicalArtifact>,
    }

    impl MemoryIndex {
        pub fn with(artifacts: impl IntoIterator<Item = CanonicalArtifact>) -> Self {
            Self {
                artifacts: artifacts
                    .into_iter()
                    .map(|a| (a.artifact_id.clone(), a))
                    .collect(),
            }
        }
    }

    impl ArtifactIndex for MemoryIndex {
        fn latest_canonical(&self, artifact_id: &str) -> Result<Option<CanonicalArtifact>> {
            Ok(self.artifacts.get(artifact_id).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryIndex;
    use super::*;
    use crate::evidence::types::EvidenceSpan;

    fn record_with(spans: Vec<EvidenceSpan>) -> ProvenanceRecord {
        ProvenanceRecord::new(spans, "ner", "knowledge_record", "k-1", 0.9)
    }

    #[test]
    fn test_round_trip_accepts_valid_span() {
        let artifact = CanonicalArtifact::from_text("doc-1", "Acme Corp signed the deal.");
        let span = EvidenceSpan::from_text(&artifact, 0, 9).unwrap();
        let index = MemoryIndex::with([artifact]);

        let gate = ProvenanceGate::new(&index);
        gate.validate(&record_with(vec![span])).unwrap();
    }

    #[test]
    fn test_missing_spans() {
        let index = MemoryIndex::default();
        let gate = ProvenanceGate::new(&index);

        let err = gate.validate(&record_with(vec![])).unwrap_err();
        assert_eq!(err.reason(), Some(GateReason::MissingSpans));
    }

    #[test]
    fn test_invalid_offsets() {
        let artifact = CanonicalArtifact::from_text("doc-1", "text");
        let index = MemoryIndex::with([artifact.clone()]);
        let gate = ProvenanceGate::new(&index);

        let span = EvidenceSpan {
            source_artifact_id: "doc-1".to_string(),
            source_sha256: artifact.sha256.clone(),
            start_char: 3,
            end_char: 3,
            quote: String::new(),
        };
        let err = gate.validate(&record_with(vec![span])).unwrap_err();
        assert_eq!(err.reason(), Some(GateReason::InvalidOffsets));
    }

    #[test]
    fn test_hash_mismatch_after_mutation() {
        let original = CanonicalArtifact::from_text("doc-1", "Acme Corp signed the deal.");
        let span = EvidenceSpan::from_text(&original, 0, 9).unwrap();

        // Artifact content changes; its canonical hash changes with it.
        let mutated = CanonicalArtifact::from_text("doc-1", "Acme Corp cancelled the deal.");
        let index = MemoryIndex::with([mutated]);

        let gate = ProvenanceGate::new(&index);
        let err = gate.validate(&record_with(vec![span])).unwrap_err();
        assert_eq!(err.reason(), Some(GateReason::HashMismatch));
    }

    #[test]
    fn test_hash_mismatch_for_unknown_artifact() {
        let artifact = CanonicalArtifact::from_text("doc-1", "some text here");
        let span = EvidenceSpan::from_text(&artifact, 0, 4).unwrap();

        let index = MemoryIndex::default();
        let gate = ProvenanceGate::new(&index);
        let err = gate.validate(&record_with(vec![span])).unwrap_err();
        assert_eq!(err.reason(), Some(GateReason::HashMismatch));
    }

    #[test]
    fn test_quote_mismatch() {
        let artifact = CanonicalArtifact::from_text("doc-1", "Acme Corp signed the deal.");
        let mut span = EvidenceSpan::from_text(&artifact, 0, 9).unwrap();
        span.quote = "Acme Inc.".to_string();
        let index = MemoryIndex::with([artifact]);

        let gate = ProvenanceGate::new(&index);
        let err = gate.validate(&record_with(vec![span])).unwrap_err();
        assert_eq!(err.reason(), Some(GateReason::QuoteMismatch));
    }
}
