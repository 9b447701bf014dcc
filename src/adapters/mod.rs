//! Extraction adapter interfaces.
//!
//! Adapters produce independent candidate entity sets over the same
//! immutable input text. The merge engine depends only on the `Extractor`
//! trait and the closed `ExtractionMethod` enum, so adding a third method
//! is a compile-time-checked addition rather than stringly-typed dispatch.

pub mod llm;
pub mod ner;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ExtractedEntity, ExtractionMethod};

pub use llm::{CueBackend, HttpLlmBackend, LlmBackend, LlmExtractor};
pub use ner::NerExtractor;

/// Extraction failure taxonomy.
///
/// `Input` is never retried. `BackendUnavailable` is raised only after the
/// adapter's own bounded retry/backoff is exhausted; the caller decides
/// whether to degrade to single-method extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid extraction input: {0}")]
    Input(String),

    #[error("extraction backend unavailable ({method}) after {attempts} attempt(s): {detail}")]
    BackendUnavailable {
        method: ExtractionMethod,
        attempts: u32,
        detail: String,
    },

    #[error("all extraction backends unavailable: {0}")]
    AllBackendsUnavailable(String),
}

/// A single extraction method with a uniform result shape.
///
/// Implementations must be deterministic: the same text always yields the
/// same entities. Empty or whitespace-only text yields an empty list, not
/// an error; genuinely malformed text fails with `ExtractError::Input`
/// rather than being swallowed as empty output.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Which method this adapter implements.
    fn method(&self) -> ExtractionMethod;

    /// Extract candidate entities from text.
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractError>;
}

/// Retry policy for backend calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    /// Check if we should retry based on attempt count.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Reject text the recognizers cannot safely process.
///
/// Swallowing malformed text as empty output would silently degrade recall
/// and mislead the merge engine's confidence normalization.
pub(crate) fn check_input(text: &str, max_input_bytes: usize) -> Result<(), ExtractError> {
    if text.len() > max_input_bytes {
        return Err(ExtractError::Input(format!(
            "input of {} bytes exceeds limit of {} bytes",
            text.len(),
            max_input_bytes
        )));
    }
    if text.contains('\u{0}') {
        return Err(ExtractError::Input(
            "input contains interior NUL bytes".to_string(),
        ));
    }
    if text.contains('\u{FFFD}') {
        return Err(ExtractError::Input(
            "input contains replacement characters from a failed decode".to_string(),
        ));
    }
    Ok(())
}

/// Find all exact byte matches of `needle` in `haystack`.
///
/// Used to repair model-reported offsets against the actual text.
pub(crate) fn find_exact_matches(haystack: &[u8], needle: &[u8]) -> Vec<(usize, usize)> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for i in 0..=(haystack.len() - needle.len()) {
        if &haystack[i..i + needle.len()] == needle {
            matches.push((i, i + needle.len()));
        }
    }
    matches
}
