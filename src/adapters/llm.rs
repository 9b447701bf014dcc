//! LLM extraction adapter.
//!
//! Produces a second, independent candidate set with the same output shape
//! as the NER adapter. The backend is pluggable behind `LlmBackend`: a real
//! model endpoint over HTTP, or the deterministic cue-based fallback used
//! offline and in tests. The adapter owns the timeout and retry/backoff
//! policy and sanitizes everything the backend returns — labels outside the
//! closed set are rejected, never coerced.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::{EntityType, ExtractedEntity, ExtractionMethod};

use super::{check_input, find_exact_matches, ExtractError, Extractor, RetryPolicy};

/// A model backend capable of completing an extraction prompt.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Human-readable backend name (for logs and errors)
    fn name(&self) -> &str;

    /// Complete a prompt, returning the raw model output.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completion backend.
pub struct HttpLlmBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.endpoint))?
            .error_for_status()
            .context("model endpoint returned an error status")?;

        let parsed: ChatResponse = response
            .json()
            .await
            .context("model response is not a chat completion")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("model response contained no choices")
    }
}

/// Deterministic cue-based fallback backend.
///
/// Scans for relational cue phrases and role words and emits the same JSON
/// payload a model would. An independent rule set from the NER adapter, so
/// the merge engine still sees two methods.
pub struct CueBackend;

const RELATION_CUES: &[&str] = &[
    "signed with",
    "agreed with",
    "acquired",
    "represented by",
    "employed by",
    "sued",
    "filed against",
    "partnered with",
];

const ROLE_CUES: &[&str] = &["plaintiff", "defendant", "counsel", "appellant", "appellee"];

/// A whitespace token with punctuation trimmed from its edges.
struct CueToken {
    lower: String,
    start: usize,
    end: usize,
    capitalized: bool,
}

impl CueBackend {
    fn cue_tokens(text: &str) -> Vec<CueToken> {
        let mut tokens = Vec::new();
        for (offset, word) in text.split_whitespace().map(|w| {
            // split_whitespace loses offsets; recover via pointer arithmetic
            (w.as_ptr() as usize - text.as_ptr() as usize, w)
        }) {
            let trimmed = word.trim_matches(|c: char| c.is_ascii_punctuation() && c != '$');
            if trimmed.is_empty() {
                continue;
            }
            let start = offset + (trimmed.as_ptr() as usize - word.as_ptr() as usize);
            tokens.push(CueToken {
                lower: trimmed.to_lowercase(),
                start,
                end: start + trimmed.len(),
                capitalized: trimmed.chars().next().map(|c| c.is_uppercase()).unwrap_or(false),
            });
        }
        tokens
    }

    /// Token index ranges where a (possibly multi-word) cue phrase occurs.
    fn cue_positions(tokens: &[CueToken], cue: &str) -> Vec<(usize, usize)> {
        let words: Vec<&str> = cue.split_whitespace().collect();
        let mut positions = Vec::new();
        if words.is_empty() || tokens.len() < words.len() {
            return positions;
        }
        for i in 0..=(tokens.len() - words.len()) {
            if words
                .iter()
                .enumerate()
                .all(|(j, w)| tokens[i + j].lower == *w)
            {
                positions.push((i, i + words.len() - 1));
            }
        }
        positions
    }

    fn run_forward(tokens: &[CueToken], from: usize) -> Option<(usize, usize)> {
        let mut last = None;
        for (n, tok) in tokens.iter().enumerate().skip(from).take(4) {
            if tok.capitalized {
                last = Some(n);
            } else {
                break;
            }
        }
        last.map(|l| (tokens[from].start, tokens[l].end))
    }

    fn run_backward(tokens: &[CueToken], until: usize) -> Option<(usize, usize)> {
        if until == 0 || !tokens[until - 1].capitalized {
            return None;
        }
        let mut first = until - 1;
        while first > 0 && tokens[first - 1].capitalized && (until - first) < 4 {
            first -= 1;
        }
        Some((tokens[first].start, tokens[until - 1].end))
    }

    fn scan(text: &str) -> Vec<serde_json::Value> {
        let tokens = Self::cue_tokens(text);
        let mut found: Vec<(usize, usize, &str, u32)> = Vec::new();

        for cue in RELATION_CUES {
            for (cue_start, cue_end) in Self::cue_positions(&tokens, cue) {
                if let Some((s, e)) = Self::run_forward(&tokens, cue_end + 1) {
                    found.push((s, e, "ORGANIZATION", 65));
                }
                if let Some((s, e)) = Self::run_backward(&tokens, cue_start) {
                    found.push((s, e, "ORGANIZATION", 65));
                }
            }
        }

        for cue in ROLE_CUES {
            for (_, cue_end) in Self::cue_positions(&tokens, cue) {
                if let Some((s, e)) = Self::run_forward(&tokens, cue_end + 1) {
                    found.push((s, e, "PERSON", 60));
                }
            }
        }

        found.sort();
        found.dedup();
        found
            .into_iter()
            .map(|(s, e, ty, conf)| {
                json!({
                    "text": &text[s..e],
                    "type": ty,
                    "start": s,
                    "end": e,
                    "confidence": conf as f64 / 100.0,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmBackend for CueBackend {
    fn name(&self) -> &str {
        "cue"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        // The document text is the prompt body after the marker line.
        let text = prompt
            .split_once("TEXT:\n")
            .map(|(_, t)| t)
            .unwrap_or(prompt);
        Ok(serde_json::to_string(&Self::scan(text))?)
    }
}

/// Raw entity shape expected from the backend.
#[derive(Debug, Deserialize)]
struct RawLlmEntity {
    text: String,
    #[serde(rename = "type")]
    entity_type: String,
    start: Option<usize>,
    end: Option<usize>,
    confidence: Option<f64>,
}

/// LLM extraction adapter: prompt, timeout, retry, sanitize.
pub struct LlmExtractor {
    backend: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
    call_timeout: Duration,
    max_input_bytes: usize,
}

impl LlmExtractor {
    pub fn new(backend: Arc<dyn LlmBackend>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            call_timeout,
            max_input_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_max_input_bytes(mut self, max_input_bytes: usize) -> Self {
        self.max_input_bytes = max_input_bytes;
        self
    }

    fn prompt_for(text: &str) -> String {
        format!(
            "Extract named entities from the text below. Respond with a JSON array of \
             objects with keys: text, type (PERSON, ORGANIZATION, COMPANY, LOCATION, DATE, \
             COURT, STATUTE, CITATION, MONEY), start, end, confidence.\nTEXT:\n{text}"
        )
    }

    /// Parse and sanitize the backend payload against the source text.
    fn sanitize(&self, raw: &str, text: &str) -> Result<Vec<ExtractedEntity>> {
        let trimmed = strip_code_fences(raw);
        let parsed: Vec<RawLlmEntity> =
            serde_json::from_str(trimmed).context("backend payload is not a JSON entity array")?;

        let mut entities = Vec::new();
        for raw_entity in parsed {
            // Closed label set: reject, never coerce
            let entity_type = match EntityType::from_str(&raw_entity.entity_type) {
                Ok(ty) => ty,
                Err(err) => {
                    warn!(label = %raw_entity.entity_type, "rejecting entity with unknown label: {err}");
                    continue;
                }
            };

            if raw_entity.text.trim().is_empty() {
                continue;
            }

            // Verify reported offsets; repair by exact search when they drift
            let span = match (raw_entity.start, raw_entity.end) {
                (Some(s), Some(e)) if text.get(s..e) == Some(raw_entity.text.as_str()) => {
                    Some((s, e))
                }
                _ => find_exact_matches(text.as_bytes(), raw_entity.text.as_bytes())
                    .first()
                    .copied(),
            };

            let Some((start, end)) = span else {
                debug!(entity = %raw_entity.text, "dropping entity not present in text");
                continue;
            };

            entities.push(ExtractedEntity::candidate(
                &text[start..end],
                entity_type,
                start,
                end,
                raw_entity.confidence.unwrap_or(0.6),
                ExtractionMethod::Llm,
            ));
        }

        entities.sort_by(|a, b| (a.start, a.end, a.entity_type).cmp(&(b.start, b.end, b.entity_type)));
        Ok(entities)
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl Extractor for LlmExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Llm
    }

    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractError> {
        check_input(text, self.max_input_bytes)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let prompt = Self::prompt_for(text);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let call = timeout(self.call_timeout, self.backend.complete(&prompt)).await;
            let failure = match call {
                Ok(Ok(raw)) => match self.sanitize(&raw, text) {
                    Ok(entities) => return Ok(entities),
                    Err(err) => format!("unusable payload: {err:#}"),
                },
                Ok(Err(err)) => format!("backend call failed: {err:#}"),
                Err(_) => format!("timed out after {:?}", self.call_timeout),
            };
            warn!(backend = self.backend.name(), attempt, "{failure}");

            if !self.retry.should_retry(attempt) {
                return Err(ExtractError::BackendUnavailable {
                    method: ExtractionMethod::Llm,
                    attempts: attempt,
                    detail: failure,
                });
            }
            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
        }
    }

    fn cue_extractor() -> LlmExtractor {
        LlmExtractor::new(Arc::new(CueBackend), fast_retry(2), Duration::from_secs(5))
    }

    struct FailingBackend;

    #[async_trait]
    impl LlmBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    struct CannedBackend(String);

    #[async_trait]
    impl LlmBackend for CannedBackend {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_cue_backend_finds_relation_targets() {
        let text = "Acme Corp signed with Beta Holdings on Friday.";
        let entities = cue_extractor().extract(text).await.unwrap();
        assert!(entities.iter().any(|e| e.text == "Beta Holdings"));
        assert!(entities.iter().all(|e| e.method == ExtractionMethod::Llm));
    }

    #[tokio::test]
    async fn test_cue_backend_deterministic() {
        let text = "The plaintiff John Smith sued Gamma LLC.";
        let a = cue_extractor().extract(text).await.unwrap();
        let b = cue_extractor().extract(text).await.unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[tokio::test]
    async fn test_unknown_labels_rejected_not_coerced() {
        let payload = r#"[
            {"text": "Acme Corp", "type": "COMPANY", "start": 0, "end": 9, "confidence": 0.8},
            {"text": "Acme Corp", "type": "WIDGET", "start": 0, "end": 9, "confidence": 0.9}
        ]"#;
        let extractor = LlmExtractor::new(
            Arc::new(CannedBackend(payload.to_string())),
            fast_retry(1),
            Duration::from_secs(1),
        );

        let entities = extractor.extract("Acme Corp signed.").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, EntityType::Company);
    }

    #[tokio::test]
    async fn test_offsets_repaired_by_search() {
        // Model reports drifted offsets; the adapter relocates the quote.
        let payload = r#"[{"text": "Beta LLC", "type": "ORGANIZATION", "start": 0, "end": 8, "confidence": 0.7}]"#;
        let extractor = LlmExtractor::new(
            Arc::new(CannedBackend(payload.to_string())),
            fast_retry(1),
            Duration::from_secs(1),
        );

        let text = "Deal between Beta LLC and others.";
        let entities = extractor.extract(text).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(&text[entities[0].start..entities[0].end], "Beta LLC");
    }

    #[tokio::test]
    async fn test_backend_failure_after_retries() {
        let extractor = LlmExtractor::new(
            Arc::new(FailingBackend),
            fast_retry(3),
            Duration::from_secs(1),
        );

        let err = extractor.extract("some text").await.unwrap_err();
        match err {
            ExtractError::BackendUnavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("[]"), "[]");
    }
}
