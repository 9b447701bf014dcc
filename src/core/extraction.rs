//! Hybrid extraction orchestration.
//!
//! Runs the NER and LLM adapters concurrently over the same immutable text
//! and merges their outputs deterministically. Constructed once with its
//! adapters and merge engine and passed explicitly — no ambient singletons.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::adapters::{ExtractError, Extractor};

use super::merge::{HybridExtractionResult, MergeEngine, MethodResult};

pub struct HybridExtractor {
    ner: Arc<dyn Extractor>,
    llm: Arc<dyn Extractor>,
    merge: MergeEngine,
}

impl HybridExtractor {
    pub fn new(ner: Arc<dyn Extractor>, llm: Arc<dyn Extractor>, merge: MergeEngine) -> Self {
        Self { ner, llm, merge }
    }

    /// Extract, merge, and validate entities for one document.
    ///
    /// If one adapter's backend is unavailable the extraction degrades to
    /// single-method mode (reflected in `extraction_methods_used`, so no
    /// agreement bonus applies) rather than failing the request. Malformed
    /// input and the loss of every backend still fail with typed errors.
    #[instrument(skip(self, text), fields(document_id = %document_id))]
    pub async fn extract(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<HybridExtractionResult, ExtractError> {
        let started = Instant::now();

        let (ner_outcome, llm_outcome) = tokio::join!(self.ner.extract(text), self.llm.extract(text));

        let mut method_results: Vec<MethodResult> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for (method, outcome) in [
            (self.ner.method(), ner_outcome),
            (self.llm.method(), llm_outcome),
        ] {
            match outcome {
                Ok(entities) => method_results.push(MethodResult { method, entities }),
                // Bad input is the caller's problem, not a degraded mode
                Err(err @ ExtractError::Input(_)) => return Err(err),
                Err(err) => {
                    warn!(%method, "adapter unavailable, continuing without it: {err}");
                    failures.push(format!("{method}: {err}"));
                }
            }
        }

        if method_results.is_empty() {
            return Err(ExtractError::AllBackendsUnavailable(failures.join("; ")));
        }

        let mut result = self.merge.merge(document_id, text, method_results);
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        info!(
            entities = result.entities.len(),
            relationships = result.relationships.len(),
            methods = ?result.extraction_methods_used,
            elapsed_ms = result.processing_time_ms,
            "hybrid extraction complete"
        );
        Ok(result)
    }
}
