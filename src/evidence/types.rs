//! Evidence span and provenance record types.
//!
//! An evidence span is a precise claim of "this text came from here":
//! artifact id, content hash of the canonical version referenced, half-open
//! byte offsets, and the literal quote. Spans are immutable once created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Compute SHA256 of a byte slice as a prefixed hex string.
///
/// Format: `sha256:<64 hex chars>`.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// An immutable, content-hash-anchored original document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalArtifact {
    pub artifact_id: String,
    /// Content hash of this version (`sha256:...`)
    pub sha256: String,
    /// Canonical text of this version
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl CanonicalArtifact {
    /// Build an artifact version, computing the content hash from the text.
    /// Ingestion normally supplies the hash; this is the test/CLI path.
    pub fn from_text(artifact_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            artifact_id: artifact_id.into(),
            sha256: compute_hash(text.as_bytes()),
            text,
            created_at: Utc::now(),
        }
    }
}

/// Error constructing an evidence span with inconsistent offsets.
#[derive(Debug, Clone, Error)]
#[error("invalid evidence span offsets [{start}, {end}) for text of length {len}")]
pub struct SpanOffsetError {
    pub start: usize,
    pub end: usize,
    pub len: usize,
}

/// A `(artifact, start, end, quote)` tuple proving where text came from.
///
/// Offsets are half-open byte indices into the canonical UTF-8 text and must
/// land on char boundaries. `quote` must equal the `[start_char, end_char)`
/// slice of the canonical text at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub source_artifact_id: String,
    /// Hash of the canonical artifact version this span references
    pub source_sha256: String,
    pub start_char: usize,
    pub end_char: usize,
    /// Literal substring at `[start_char, end_char)`
    pub quote: String,
}

impl EvidenceSpan {
    /// Construct a span by slicing the canonical text, so the quote is
    /// correct by construction.
    pub fn from_text(
        artifact: &CanonicalArtifact,
        start: usize,
        end: usize,
    ) -> Result<Self, SpanOffsetError> {
        if start >= end {
            return Err(SpanOffsetError {
                start,
                end,
                len: artifact.text.len(),
            });
        }
        let quote = artifact
            .text
            .get(start..end)
            .ok_or(SpanOffsetError {
                start,
                end,
                len: artifact.text.len(),
            })?
            .to_string();

        Ok(Self {
            source_artifact_id: artifact.artifact_id.clone(),
            source_sha256: artifact.sha256.clone(),
            start_char: start,
            end_char: end,
            quote,
        })
    }
}

/// Envelope wrapping one or more evidence spans for a downstream artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// At least one span (enforced by the provenance gate)
    pub spans: Vec<EvidenceSpan>,

    /// Name of the producing method ("ner", "llm", "merged", ...)
    pub extractor: String,

    /// What downstream artifact class this backs
    pub target_type: String,

    /// Id of the backed artifact
    pub target_id: String,

    /// Confidence 0..1
    pub confidence: f64,
}

impl ProvenanceRecord {
    pub fn new(
        spans: Vec<EvidenceSpan>,
        extractor: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            spans,
            extractor: extractor.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Re-point this record at the artifact row it ends up backing.
    pub fn with_target(mut self, target_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self.target_id = target_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_format() {
        let hash = compute_hash(b"hello");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), 7 + 64);
    }

    #[test]
    fn test_span_from_text_quote_matches_slice() {
        let artifact = CanonicalArtifact::from_text("doc-1", "Acme Corp signed the deal.");
        let span = EvidenceSpan::from_text(&artifact, 0, 9).unwrap();
        assert_eq!(span.quote, "Acme Corp");
        assert_eq!(span.source_sha256, artifact.sha256);
    }

    #[test]
    fn test_span_rejects_inverted_offsets() {
        let artifact = CanonicalArtifact::from_text("doc-1", "short");
        assert!(EvidenceSpan::from_text(&artifact, 3, 3).is_err());
        assert!(EvidenceSpan::from_text(&artifact, 4, 2).is_err());
        assert!(EvidenceSpan::from_text(&artifact, 0, 99).is_err());
    }

    #[test]
    fn test_span_rejects_non_boundary_offsets() {
        let artifact = CanonicalArtifact::from_text("doc-1", "caf\u{e9} bar");
        // offset 4 is inside the two-byte 'é'
        assert!(EvidenceSpan::from_text(&artifact, 0, 4).is_err());
    }
}
