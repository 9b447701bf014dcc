//! Extracted entity and relationship types.
//!
//! Entities flow from the adapters into the merge engine, which either
//! drops them (failed validation) or promotes them into merged entities
//! with derived provenance. Relationships are only ever derived from
//! entities that survived validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Closed label set for extracted entities.
///
/// Labels outside this set are rejected at the adapter boundary, never
/// coerced to a default type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Organization,
    Company,
    Location,
    Date,
    Court,
    Statute,
    Citation,
    Money,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Company => "COMPANY",
            EntityType::Location => "LOCATION",
            EntityType::Date => "DATE",
            EntityType::Court => "COURT",
            EntityType::Statute => "STATUTE",
            EntityType::Citation => "CITATION",
            EntityType::Money => "MONEY",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for labels outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity label: {0}")]
pub struct UnknownLabel(pub String);

impl FromStr for EntityType {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PERSON" => Ok(EntityType::Person),
            "ORGANIZATION" | "ORG" => Ok(EntityType::Organization),
            "COMPANY" => Ok(EntityType::Company),
            "LOCATION" => Ok(EntityType::Location),
            "DATE" => Ok(EntityType::Date),
            "COURT" => Ok(EntityType::Court),
            "STATUTE" => Ok(EntityType::Statute),
            "CITATION" => Ok(EntityType::Citation),
            "MONEY" => Ok(EntityType::Money),
            other => Err(UnknownLabel(other.to_string())),
        }
    }
}

/// Which extraction method produced an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Ner,
    Llm,
    Merged,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Ner => "ner",
            ExtractionMethod::Llm => "llm",
            ExtractionMethod::Merged => "merged",
        }
    }

    /// Tie-break rank for conflict resolution. Lower wins on equal
    /// confidence: NER is pattern-deterministic and more auditable.
    pub fn tie_break_rank(&self) -> u8 {
        match self {
            ExtractionMethod::Ner => 0,
            ExtractionMethod::Merged => 1,
            ExtractionMethod::Llm => 2,
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label that lost conflict resolution, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltLabel {
    pub label: EntityType,
    pub confidence: f64,
    pub method: ExtractionMethod,
}

/// An extracted entity candidate or merged entity.
///
/// `start`/`end` are half-open byte offsets into the document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Deterministic id (empty for raw adapter candidates, filled by merge)
    #[serde(default)]
    pub id: String,

    /// Verbatim text of the entity
    pub text: String,

    /// Label from the closed set
    #[serde(rename = "type")]
    pub entity_type: EntityType,

    /// Start byte offset (half-open)
    pub start: usize,

    /// End byte offset (half-open)
    pub end: usize,

    /// Confidence score 0..1
    pub confidence: f64,

    /// Context snippet around the entity
    #[serde(default)]
    pub context: String,

    /// Method that produced this entity
    pub method: ExtractionMethod,

    /// Labels discarded during conflict resolution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_labels: Vec<AltLabel>,
}

impl ExtractedEntity {
    /// Create a raw adapter candidate (id assigned later by the merge engine).
    pub fn candidate(
        text: impl Into<String>,
        entity_type: EntityType,
        start: usize,
        end: usize,
        confidence: f64,
        method: ExtractionMethod,
    ) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            entity_type,
            start,
            end,
            confidence: confidence.clamp(0.0, 1.0),
            context: String::new(),
            method,
            alt_labels: Vec::new(),
        }
    }

    /// Span length in bytes.
    pub fn span_len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// A relationship between two validated entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub id: String,
    pub subject_entity_id: String,
    pub predicate: String,
    pub object_entity_id: String,
    pub confidence: f64,
}

/// Compute a deterministic entity id.
///
/// sha256(document_id, start, end, type) truncated to 16 hex chars, so the
/// same entity in the same document always gets the same id regardless of
/// which adapters contributed it.
pub fn entity_id(document_id: &str, start: usize, end: usize, entity_type: EntityType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(start.to_string().as_bytes());
    hasher.update(end.to_string().as_bytes());
    hasher.update(entity_type.as_str().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Compute a deterministic relationship id from its endpoints and predicate.
pub fn relationship_id(subject_id: &str, predicate: &str, object_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.as_bytes());
    hasher.update(predicate.as_bytes());
    hasher.update(object_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Extract a context window around a span, respecting UTF-8 boundaries.
///
/// Returns ~`window` bytes of surrounding text with ellipses when truncated.
pub fn context_window(text: &str, start: usize, end: usize, window: usize) -> String {
    let span_len = end.saturating_sub(start);
    let each_side = window.saturating_sub(span_len) / 2;

    let mut ctx_start = start.saturating_sub(each_side);
    while ctx_start > 0 && !text.is_char_boundary(ctx_start) {
        ctx_start -= 1;
    }

    let mut ctx_end = (end + each_side).min(text.len());
    while ctx_end < text.len() && !text.is_char_boundary(ctx_end) {
        ctx_end += 1;
    }

    let prefix = if ctx_start > 0 { "..." } else { "" };
    let suffix = if ctx_end < text.len() { "..." } else { "" };
    format!("{}{}{}", prefix, &text[ctx_start..ctx_end], suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing() {
        assert_eq!("ORGANIZATION".parse::<EntityType>().unwrap(), EntityType::Organization);
        assert_eq!("company".parse::<EntityType>().unwrap(), EntityType::Company);
        assert!("WIDGET".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_id_deterministic() {
        let a = entity_id("doc-1", 0, 9, EntityType::Organization);
        let b = entity_id("doc-1", 0, 9, EntityType::Organization);
        let c = entity_id("doc-1", 0, 9, EntityType::Company);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_tie_break_prefers_ner() {
        assert!(ExtractionMethod::Ner.tie_break_rank() < ExtractionMethod::Llm.tie_break_rank());
    }

    #[test]
    fn test_context_window() {
        let text = "This is a long document with many words and content for testing.";
        // "many words" at [29, 39); a 20-byte window truncates both sides
        let ctx = context_window(text, 29, 39, 20);
        assert!(ctx.contains("many words"));
        assert!(ctx.starts_with("..."));
        assert!(ctx.ends_with("..."));
    }

    #[test]
    fn test_context_window_at_text_start_has_no_prefix() {
        let text = "This is a long document with many words and content for testing.";
        let ctx = context_window(text, 10, 23, 40);
        assert!(ctx.contains("long document"));
        assert!(ctx.starts_with("This"));
        assert!(ctx.ends_with("..."));
    }

    #[test]
    fn test_candidate_clamps_confidence() {
        let e = ExtractedEntity::candidate("x", EntityType::Person, 0, 1, 1.7, ExtractionMethod::Ner);
        assert_eq!(e.confidence, 1.0);
    }
}
