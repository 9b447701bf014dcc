//! Hybrid merge engine.
//!
//! Reconciles candidate entity sets from independent extraction methods:
//! dedup by span overlap, conflict resolution with an auditable tie-break,
//! confidence normalization with a cross-method agreement bonus, a
//! validation threshold split, and proximity-based relationship derivation
//! over the validated set only.
//!
//! Candidates are sorted by a stable key before clustering, so the order in
//! which concurrent adapters complete never affects the merged output.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{
    context_window, entity_id, relationship_id, AltLabel, EntityType, ExtractedEntity,
    ExtractedRelationship, ExtractionMethod,
};

/// Tunable merge constants. The documented defaults are the decision-record
/// values; they are configuration, not hard requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Minimum span-overlap fraction (of the shorter span) for two
    /// candidates to be the "same" entity
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,

    /// Confidence bonus when independent methods agree on a span
    #[serde(default = "default_agreement_bonus")]
    pub agreement_bonus: f64,

    /// Entities below this confidence are kept only in the raw audit set
    #[serde(default = "default_validation_threshold")]
    pub validation_threshold: f64,

    /// Maximum byte gap between two entities for relationship pairing
    #[serde(default = "default_relation_window")]
    pub relation_window: usize,

    /// Context snippet width in bytes
    #[serde(default = "default_context_window_bytes")]
    pub context_window_bytes: usize,
}

fn default_overlap_fraction() -> f64 {
    0.5
}
fn default_agreement_bonus() -> f64 {
    0.1
}
fn default_validation_threshold() -> f64 {
    0.5
}
fn default_relation_window() -> usize {
    200
}
fn default_context_window_bytes() -> usize {
    80
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            overlap_fraction: default_overlap_fraction(),
            agreement_bonus: default_agreement_bonus(),
            validation_threshold: default_validation_threshold(),
            relation_window: default_relation_window(),
            context_window_bytes: default_context_window_bytes(),
        }
    }
}

/// Candidate entities from one extraction method.
#[derive(Debug, Clone)]
pub struct MethodResult {
    pub method: ExtractionMethod,
    pub entities: Vec<ExtractedEntity>,
}

/// Per-entity and aggregate confidence of the validated set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScores {
    pub per_entity: BTreeMap<String, f64>,
    pub aggregate: f64,
}

/// Output of one hybrid extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridExtractionResult {
    pub document_id: String,

    /// Entities at or above the validation threshold
    pub entities: Vec<ExtractedEntity>,

    /// Every merged entity including sub-threshold ones, kept for audit
    pub raw_entities: Vec<ExtractedEntity>,

    /// Derived only from the validated entity set
    pub relationships: Vec<ExtractedRelationship>,

    /// Every method whose adapter completed, including ones that returned
    /// zero candidates; fewer than two means single-method mode
    pub extraction_methods_used: Vec<ExtractionMethod>,

    pub confidence_scores: ConfidenceScores,

    pub processing_time_ms: u64,
}

/// Relation cue tokens and the predicates they imply.
const RELATION_PREDICATES: &[(&str, &str)] = &[
    ("signed", "signed_with"),
    ("agreed", "agreed_with"),
    ("acquired", "acquired"),
    ("represents", "represents"),
    ("represented", "represents"),
    ("employs", "employs"),
    ("employed", "employs"),
    ("sued", "litigates_against"),
    ("filed", "litigates_against"),
    ("partnered", "partners_with"),
    ("v.", "litigates_against"),
];

/// Entity types eligible as relationship endpoints.
const RELATION_ENDPOINT_TYPES: [EntityType; 3] =
    [EntityType::Person, EntityType::Organization, EntityType::Company];

pub struct MergeEngine {
    config: MergeConfig,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(MergeConfig::default())
    }
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge candidate sets into a deduplicated, validated result.
    ///
    /// Deterministic given deterministic adapters: candidates are sorted by
    /// (start, end, method, text) before clustering.
    pub fn merge(
        &self,
        document_id: &str,
        text: &str,
        method_results: Vec<MethodResult>,
    ) -> HybridExtractionResult {
        let mut methods_used: Vec<ExtractionMethod> = Vec::new();
        let mut candidates: Vec<ExtractedEntity> = Vec::new();

        for result in method_results {
            if !methods_used.contains(&result.method) {
                methods_used.push(result.method);
            }
            for entity in result.entities {
                // Candidates whose span does not slice the text cleanly are
                // unusable for provenance and are dropped up front.
                if text.get(entity.start..entity.end).is_none() {
                    tracing::warn!(
                        start = entity.start,
                        end = entity.end,
                        "dropping candidate with invalid span"
                    );
                    continue;
                }
                candidates.push(entity);
            }
        }
        methods_used.sort();

        // Stable ordering regardless of adapter completion order
        candidates.sort_by(|a, b| {
            (a.start, a.end, a.method, &a.text).cmp(&(b.start, b.end, b.method, &b.text))
        });

        let clusters = self.cluster(candidates);
        let mut merged: Vec<ExtractedEntity> = clusters
            .into_iter()
            .map(|cluster| self.resolve(document_id, text, cluster))
            .collect();
        merged.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));

        let (validated, raw): (Vec<_>, Vec<_>) = {
            let raw = merged.clone();
            let validated = merged
                .into_iter()
                .filter(|e| e.confidence >= self.config.validation_threshold)
                .collect();
            (validated, raw)
        };

        let relationships = self.derive_relationships(text, &validated);

        let per_entity: BTreeMap<String, f64> = validated
            .iter()
            .map(|e| (e.id.clone(), e.confidence))
            .collect();
        let aggregate = if validated.is_empty() {
            0.0
        } else {
            validated.iter().map(|e| e.confidence).sum::<f64>() / validated.len() as f64
        };

        HybridExtractionResult {
            document_id: document_id.to_string(),
            entities: validated,
            raw_entities: raw,
            relationships,
            extraction_methods_used: methods_used,
            confidence_scores: ConfidenceScores {
                per_entity,
                aggregate,
            },
            processing_time_ms: 0,
        }
    }

    /// Group candidates that are the "same" entity: spans overlapping by
    /// more than the configured fraction of the shorter span, and normalized
    /// text matching case-insensitively.
    fn cluster(&self, candidates: Vec<ExtractedEntity>) -> Vec<Vec<ExtractedEntity>> {
        let mut clusters: Vec<Vec<ExtractedEntity>> = Vec::new();

        for candidate in candidates {
            let home = clusters
                .iter_mut()
                .find(|cluster| self.same_entity(&cluster[0], &candidate));
            match home {
                Some(cluster) => cluster.push(candidate),
                None => clusters.push(vec![candidate]),
            }
        }

        clusters
    }

    fn same_entity(&self, a: &ExtractedEntity, b: &ExtractedEntity) -> bool {
        let overlap = overlap_len(a.start, a.end, b.start, b.end);
        let shorter = a.span_len().min(b.span_len());
        if shorter == 0 {
            return false;
        }
        let fraction = overlap as f64 / shorter as f64;
        fraction >= self.config.overlap_fraction && normalize(&a.text) == normalize(&b.text)
    }

    /// Collapse one cluster into a merged entity.
    ///
    /// Conflict resolution: higher confidence wins the label; on an exact
    /// tie the NER label wins over the LLM label. Losing labels are retained
    /// as `alt_labels` rather than discarded silently. Agreement across
    /// independent methods on the same span is evidence of correctness and
    /// earns the configured bonus on top of the best per-method confidence.
    fn resolve(&self, document_id: &str, text: &str, cluster: Vec<ExtractedEntity>) -> ExtractedEntity {
        debug_assert!(!cluster.is_empty());

        let winner_idx = (0..cluster.len())
            .max_by(|&i, &j| {
                let a = &cluster[i];
                let b = &cluster[j];
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // On equal confidence prefer the lower tie-break rank
                    .then(b.method.tie_break_rank().cmp(&a.method.tie_break_rank()))
            })
            .unwrap_or(0);

        let methods: BTreeSet<ExtractionMethod> = cluster.iter().map(|e| e.method).collect();
        let source_methods = methods.len();

        // Carry previously recorded alternates so re-merging loses nothing
        let mut alt_labels: Vec<AltLabel> = cluster[winner_idx].alt_labels.clone();
        for (i, member) in cluster.iter().enumerate() {
            if i == winner_idx {
                continue;
            }
            alt_labels.extend(member.alt_labels.iter().cloned());
            if member.entity_type != cluster[winner_idx].entity_type
                && !alt_labels
                    .iter()
                    .any(|l| l.label == member.entity_type && l.method == member.method)
            {
                alt_labels.push(AltLabel {
                    label: member.entity_type,
                    confidence: member.confidence,
                    method: member.method,
                });
            }
        }

        let best_confidence = cluster
            .iter()
            .map(|e| e.confidence)
            .fold(0.0_f64, f64::max);
        let confidence = if source_methods >= 2 {
            (best_confidence + self.config.agreement_bonus).min(1.0)
        } else {
            best_confidence
        };

        let winner = &cluster[winner_idx];
        let method = if source_methods >= 2 {
            ExtractionMethod::Merged
        } else {
            winner.method
        };
        let context = if winner.context.is_empty() {
            context_window(text, winner.start, winner.end, self.config.context_window_bytes)
        } else {
            winner.context.clone()
        };

        ExtractedEntity {
            id: entity_id(document_id, winner.start, winner.end, winner.entity_type),
            text: winner.text.clone(),
            entity_type: winner.entity_type,
            start: winner.start,
            end: winner.end,
            confidence,
            context,
            method,
            alt_labels,
        }
    }

    /// Pair validated person/organization entities within the relation
    /// window when the gap between them contains a relation cue token.
    fn derive_relationships(
        &self,
        text: &str,
        validated: &[ExtractedEntity],
    ) -> Vec<ExtractedRelationship> {
        let endpoints: Vec<&ExtractedEntity> = validated
            .iter()
            .filter(|e| RELATION_ENDPOINT_TYPES.contains(&e.entity_type))
            .collect();

        let mut relationships = Vec::new();
        for (i, subject) in endpoints.iter().enumerate() {
            for object in endpoints.iter().skip(i + 1) {
                if object.start < subject.end {
                    continue; // overlapping spans are never paired
                }
                let gap = object.start - subject.end;
                if gap > self.config.relation_window {
                    continue;
                }

                let Some(between) = text.get(subject.end..object.start) else {
                    continue;
                };
                let between_lower = between.to_lowercase();
                let predicate = RELATION_PREDICATES.iter().find_map(|(cue, predicate)| {
                    between_lower
                        .split_whitespace()
                        .any(|w| w == *cue)
                        .then_some(*predicate)
                });

                if let Some(predicate) = predicate {
                    relationships.push(ExtractedRelationship {
                        id: relationship_id(&subject.id, predicate, &object.id),
                        subject_entity_id: subject.id.clone(),
                        predicate: predicate.to_string(),
                        object_entity_id: object.id.clone(),
                        confidence: (subject.confidence.min(object.confidence) * 0.9).clamp(0.0, 1.0),
                    });
                }
            }
        }

        relationships
    }
}

fn overlap_len(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> usize {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    end.saturating_sub(start)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        text: &str,
        ty: EntityType,
        start: usize,
        end: usize,
        confidence: f64,
        method: ExtractionMethod,
    ) -> ExtractedEntity {
        ExtractedEntity::candidate(text, ty, start, end, confidence, method)
    }

    fn engine() -> MergeEngine {
        MergeEngine::default()
    }

    const TEXT: &str = "Acme Corp signed with Acme Corporation.";

    #[test]
    fn test_conflict_resolution_ner_wins_tie() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Organization,
                0,
                9,
                0.6,
                ExtractionMethod::Ner,
            )],
        };
        let llm = MethodResult {
            method: ExtractionMethod::Llm,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Company,
                0,
                9,
                0.6,
                ExtractionMethod::Llm,
            )],
        };

        let result = engine().merge("doc-1", TEXT, vec![ner, llm]);
        assert_eq!(result.entities.len(), 1);

        let merged = &result.entities[0];
        assert_eq!(merged.entity_type, EntityType::Organization);
        assert_eq!((merged.start, merged.end), (0, 9));
        assert!((merged.confidence - 0.7).abs() < 1e-9);
        assert_eq!(merged.method, ExtractionMethod::Merged);
        assert_eq!(merged.alt_labels.len(), 1);
        assert_eq!(merged.alt_labels[0].label, EntityType::Company);
    }

    #[test]
    fn test_higher_confidence_wins_label() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Organization,
                0,
                9,
                0.55,
                ExtractionMethod::Ner,
            )],
        };
        let llm = MethodResult {
            method: ExtractionMethod::Llm,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Company,
                0,
                9,
                0.9,
                ExtractionMethod::Llm,
            )],
        };

        let result = engine().merge("doc-1", TEXT, vec![ner, llm]);
        assert_eq!(result.entities[0].entity_type, EntityType::Company);
        assert!((result.entities[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_agreement_bonus_capped_at_one() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Organization,
                0,
                9,
                0.95,
                ExtractionMethod::Ner,
            )],
        };
        let llm = MethodResult {
            method: ExtractionMethod::Llm,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Organization,
                0,
                9,
                0.95,
                ExtractionMethod::Llm,
            )],
        };

        let result = engine().merge("doc-1", TEXT, vec![ner, llm]);
        assert_eq!(result.entities[0].confidence, 1.0);
    }

    #[test]
    fn test_no_bonus_for_single_method() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Organization,
                0,
                9,
                0.6,
                ExtractionMethod::Ner,
            )],
        };

        let result = engine().merge("doc-1", TEXT, vec![ner]);
        assert_eq!(result.entities[0].confidence, 0.6);
        assert_eq!(result.entities[0].method, ExtractionMethod::Ner);
        assert_eq!(result.extraction_methods_used, vec![ExtractionMethod::Ner]);
    }

    #[test]
    fn test_different_text_not_deduplicated() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![
                candidate("Acme Corp", EntityType::Organization, 0, 9, 0.8, ExtractionMethod::Ner),
                candidate(
                    "Acme Corporation",
                    EntityType::Organization,
                    22,
                    38,
                    0.8,
                    ExtractionMethod::Ner,
                ),
            ],
        };

        let result = engine().merge("doc-1", TEXT, vec![ner]);
        assert_eq!(result.entities.len(), 2);
    }

    #[test]
    fn test_validation_threshold_splits_raw_and_validated() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![
                candidate("Acme Corp", EntityType::Organization, 0, 9, 0.8, ExtractionMethod::Ner),
                candidate(
                    "Acme Corporation",
                    EntityType::Organization,
                    22,
                    38,
                    0.3,
                    ExtractionMethod::Ner,
                ),
            ],
        };

        let result = engine().merge("doc-1", TEXT, vec![ner]);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.raw_entities.len(), 2);
    }

    #[test]
    fn test_merge_idempotence() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Organization,
                0,
                9,
                0.6,
                ExtractionMethod::Ner,
            )],
        };
        let llm = MethodResult {
            method: ExtractionMethod::Llm,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Company,
                0,
                9,
                0.6,
                ExtractionMethod::Llm,
            )],
        };

        let first = engine().merge("doc-1", TEXT, vec![ner, llm]);
        let again = engine().merge(
            "doc-1",
            TEXT,
            vec![MethodResult {
                method: ExtractionMethod::Merged,
                entities: first.entities.clone(),
            }],
        );

        assert_eq!(first.entities.len(), again.entities.len());
        for (a, b) in first.entities.iter().zip(again.entities.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.entity_type, b.entity_type);
            assert!((a.confidence - b.confidence).abs() < 1e-9);
        }
    }

    #[test]
    fn test_order_of_method_results_does_not_matter() {
        let ner = || MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Organization,
                0,
                9,
                0.6,
                ExtractionMethod::Ner,
            )],
        };
        let llm = || MethodResult {
            method: ExtractionMethod::Llm,
            entities: vec![candidate(
                "Acme Corp",
                EntityType::Company,
                0,
                9,
                0.6,
                ExtractionMethod::Llm,
            )],
        };

        let ab = engine().merge("doc-1", TEXT, vec![ner(), llm()]);
        let ba = engine().merge("doc-1", TEXT, vec![llm(), ner()]);

        assert_eq!(
            serde_json::to_string(&ab.entities).unwrap(),
            serde_json::to_string(&ba.entities).unwrap()
        );
    }

    #[test]
    fn test_relationship_derivation_with_cue() {
        let text = "Acme Corp signed with Beta Holdings yesterday.";
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![
                candidate("Acme Corp", EntityType::Organization, 0, 9, 0.8, ExtractionMethod::Ner),
                candidate(
                    "Beta Holdings",
                    EntityType::Organization,
                    22,
                    35,
                    0.8,
                    ExtractionMethod::Ner,
                ),
            ],
        };

        let result = engine().merge("doc-1", text, vec![ner]);
        assert_eq!(result.relationships.len(), 1);
        let rel = &result.relationships[0];
        assert_eq!(rel.predicate, "signed_with");
        assert_eq!(rel.subject_entity_id, result.entities[0].id);
        assert_eq!(rel.object_entity_id, result.entities[1].id);
    }

    #[test]
    fn test_relationships_only_from_validated_entities() {
        let text = "Acme Corp signed with Beta Holdings yesterday.";
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![
                candidate("Acme Corp", EntityType::Organization, 0, 9, 0.8, ExtractionMethod::Ner),
                // Below the validation threshold
                candidate(
                    "Beta Holdings",
                    EntityType::Organization,
                    22,
                    35,
                    0.2,
                    ExtractionMethod::Ner,
                ),
            ],
        };

        let result = engine().merge("doc-1", text, vec![ner]);
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn test_aggregate_confidence() {
        let ner = MethodResult {
            method: ExtractionMethod::Ner,
            entities: vec![
                candidate("Acme Corp", EntityType::Organization, 0, 9, 0.8, ExtractionMethod::Ner),
                candidate(
                    "Acme Corporation",
                    EntityType::Organization,
                    22,
                    38,
                    0.6,
                    ExtractionMethod::Ner,
                ),
            ],
        };

        let result = engine().merge("doc-1", TEXT, vec![ner]);
        assert!((result.confidence_scores.aggregate - 0.7).abs() < 1e-9);
        assert_eq!(result.confidence_scores.per_entity.len(), 2);
    }
}
