//! Extraction pipeline
//!
//! Sends day chunks to the LLM service and caches the validated results so
//! the expensive call never repeats for the same input.
//!
//! ```text
//! ┌───────────┐     ┌───────────────────────────────┐     ┌──────────────┐
//! │ DayChunks │ ──► │ Extractor                     │ ──► │ cache_entries│
//! │ (chunker) │     │  fingerprint → cache → gate → │     │  (SQLite)    │
//! └───────────┘     │  LLM → validate → insert      │     └──────────────┘
//!                   └───────────────────────────────┘
//! ```
//!
//! The cache key is `(fingerprint, calling_context)`: the fingerprint is a
//! SHA-256 of the chunk's canonical text, and the calling context keeps a
//! future second pass over identical text from colliding with the first.
//! Failed chunks write nothing, so they can be retried on a later run.

pub mod client;
pub mod prompt;

pub use client::{Completion, HttpLlmClient, LlmClient};

use crate::config::ExtractorConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{DayChunk, ExtractionResult};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Compute the cache fingerprint for a chunk's canonical text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Outcome of extracting one chunk.
#[derive(Debug, Clone)]
pub struct ChunkExtraction {
    /// Source log the chunk came from
    pub source_file: String,
    /// Calendar date of the chunk (`DD.MM.YY`)
    pub date: String,
    /// Cache fingerprint of the chunk text
    pub fingerprint: String,
    /// Cache-key namespace the result was stored under
    pub calling_context: String,
    /// Whether the result was served from the cache (no LLM call)
    pub from_cache: bool,
    /// Validated extraction result
    pub result: ExtractionResult,
    /// Prompt tokens consumed (0 for cache hits or unreported)
    pub tokens_in: i64,
    /// Completion tokens produced (0 for cache hits or unreported)
    pub tokens_out: i64,
}

/// Aggregated outcome of a full extraction run.
///
/// A failing chunk never aborts its siblings; it lands in `chunks_failed`
/// and the run reports partial success.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Number of chunks submitted
    pub chunks_total: usize,
    /// Chunks served from the cache
    pub chunks_cached: usize,
    /// Chunks that required an LLM call
    pub chunks_processed: usize,
    /// Failed chunks (label → error message)
    pub chunks_failed: Vec<(String, String)>,
    /// Exchanges across all successful chunks
    pub exchanges_extracted: usize,
    /// Message records across all successful chunks
    pub messages_extracted: usize,
    /// Prompt tokens consumed by fresh LLM calls
    pub tokens_in: i64,
    /// Completion tokens produced by fresh LLM calls
    pub tokens_out: i64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Successful extractions in original chunk order
    pub extractions: Vec<ChunkExtraction>,
}

/// Cache-checked, concurrency-gated LLM extraction.
pub struct Extractor {
    db: Arc<Database>,
    llm: Arc<dyn LlmClient>,
    /// Bounds simultaneous in-flight LLM calls across the whole run
    gate: Arc<Semaphore>,
    calling_context: String,
    max_attempts: u32,
}

impl Extractor {
    pub fn new(db: Arc<Database>, llm: Arc<dyn LlmClient>, config: &ExtractorConfig) -> Self {
        Self {
            db,
            llm,
            gate: Arc::new(Semaphore::new(config.concurrency.max(1))),
            calling_context: config.calling_context.clone(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Extract one chunk, idempotently.
    ///
    /// A cache hit returns the stored result without an LLM call or any
    /// side effect. On a miss the chunk holds one gate slot for the whole
    /// call (retries included), and the cache entry is written only after
    /// the response validated against the schema.
    pub async fn extract(&self, chunk: &DayChunk) -> Result<ChunkExtraction> {
        let text = chunk.canonical_text();
        let fp = fingerprint(&text);

        if let Some(payload) = self.db.get_cache_entry(&fp, &self.calling_context)? {
            tracing::debug!(chunk = %chunk.label(), fingerprint = %fp, "Cache hit");
            let result: ExtractionResult =
                serde_json::from_str(&payload).map_err(|e| Error::SchemaViolation {
                    fingerprint: fp.clone(),
                    message: format!("cached payload no longer matches schema: {e}"),
                })?;
            return Ok(ChunkExtraction {
                source_file: chunk.source_id.clone(),
                date: chunk.date.clone(),
                fingerprint: fp,
                calling_context: self.calling_context.clone(),
                from_cache: true,
                result,
                tokens_in: 0,
                tokens_out: 0,
            });
        }

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::Llm("concurrency gate closed".to_string()))?;

        tracing::info!(chunk = %chunk.label(), fingerprint = %fp, "Cache miss, invoking LLM");
        let request = prompt::extraction_prompt(&text);
        let (result, tokens_in, tokens_out) = self.invoke_with_retry(&request, &fp, chunk).await?;

        let payload = serde_json::to_string(&result)?;
        self.db
            .insert_cache_entry(&fp, &self.calling_context, &payload)?;

        Ok(ChunkExtraction {
            source_file: chunk.source_id.clone(),
            date: chunk.date.clone(),
            fingerprint: fp,
            calling_context: self.calling_context.clone(),
            from_cache: false,
            result,
            tokens_in,
            tokens_out,
        })
    }

    /// Call the LLM with bounded exponential backoff.
    ///
    /// Transient failures (transport errors, rate limits, unreadable
    /// responses) consume attempts; a response that parses as JSON but does
    /// not match the schema fails the chunk immediately.
    async fn invoke_with_retry(
        &self,
        request: &str,
        fp: &str,
        chunk: &DayChunk,
    ) -> Result<(ExtractionResult, i64, i64)> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tracing::debug!(
                    chunk = %chunk.label(),
                    attempt,
                    max_attempts = self.max_attempts,
                    "Retrying LLM call after {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            let completion = match self.llm.complete(request).await {
                Ok(completion) => completion,
                Err(e) if client::is_retryable(&e) => {
                    tracing::warn!(chunk = %chunk.label(), error = %e, "Transient LLM failure");
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let value = match completion_json(&completion.text) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(chunk = %chunk.label(), error = %e, "Malformed LLM response");
                    last_error = Some(e);
                    continue;
                }
            };

            let result: ExtractionResult =
                serde_json::from_value(value).map_err(|e| Error::SchemaViolation {
                    fingerprint: fp.to_string(),
                    message: e.to_string(),
                })?;

            return Ok((
                result,
                completion.tokens_in.unwrap_or(0),
                completion.tokens_out.unwrap_or(0),
            ));
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Llm(format!(
                "retry budget exhausted after {} attempts",
                self.max_attempts
            ))
        }))
    }

    /// Extract all chunks concurrently under the gate.
    pub async fn run(&self, chunks: &[DayChunk]) -> RunReport {
        self.run_with_progress(chunks, |_| {}).await
    }

    /// Extract all chunks, calling `on_chunk_done` as each one finishes.
    ///
    /// Chunks complete in any order, but the report lists extractions in
    /// original chunk order so normalization stays deterministic.
    pub async fn run_with_progress<F>(&self, chunks: &[DayChunk], on_chunk_done: F) -> RunReport
    where
        F: Fn(&DayChunk) + Sync,
    {
        let started = Instant::now();
        let on_chunk_done = &on_chunk_done;

        let outcomes = futures::future::join_all(chunks.iter().map(|chunk| async move {
            let outcome = self.extract(chunk).await;
            on_chunk_done(chunk);
            outcome
        }))
        .await;

        let mut report = RunReport {
            chunks_total: chunks.len(),
            ..RunReport::default()
        };

        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            match outcome {
                Ok(extraction) => {
                    if extraction.from_cache {
                        report.chunks_cached += 1;
                    } else {
                        report.chunks_processed += 1;
                    }
                    report.exchanges_extracted += extraction.result.exchanges.len();
                    report.messages_extracted += extraction.result.message_count();
                    report.tokens_in += extraction.tokens_in;
                    report.tokens_out += extraction.tokens_out;
                    report.extractions.push(extraction);
                }
                Err(e) => {
                    tracing::error!(chunk = %chunk.label(), error = %e, "Chunk extraction failed");
                    report.chunks_failed.push((chunk.label(), e.to_string()));
                }
            }
        }

        report.elapsed = started.elapsed();
        report
    }
}

/// Pull the JSON object out of a completion.
///
/// Models occasionally wrap the object in code fences or prose; accept the
/// first `{`..last `}` span when the text does not parse whole.
fn completion_json(raw: &str) -> Result<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        return Ok(value);
    }

    let start = raw
        .find('{')
        .ok_or_else(|| Error::Llm("completion missing JSON object".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| Error::Llm("completion missing JSON object".to_string()))?;
    if end <= start {
        return Err(Error::Llm("completion missing JSON object".to_string()));
    }

    serde_json::from_str(&raw[start..=end])
        .map_err(|e| Error::Llm(format!("completion missing valid JSON object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const OK_PAYLOAD: &str = r#"{"exchanges": [[
        {"date": "15.01.25", "time": "10:00:00", "person": "Alice", "quote": "hi"},
        {"date": "15.01.25", "time": "10:01:00", "person": "Bob", "quote": "hey"}
    ]]}"#;

    enum Scripted {
        Text(&'static str),
        Transient,
        Hard,
    }

    struct MockClient {
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicUsize,
        active: AtomicI64,
        max_active: AtomicI64,
        hold: Option<Duration>,
    }

    impl MockClient {
        fn ok() -> Self {
            Self::scripted(vec![])
        }

        fn scripted(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                active: AtomicI64::new(0),
                max_active: AtomicI64::new(0),
                hold: None,
            }
        }

        fn slow() -> Self {
            Self {
                hold: Some(Duration::from_millis(20)),
                ..Self::ok()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for MockClient {
        async fn complete(&self, _prompt: &str) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if let Some(hold) = self.hold {
                tokio::time::sleep(hold).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let next = self.script.lock().unwrap().pop_front();
            match next {
                None => Ok(Completion {
                    text: OK_PAYLOAD.to_string(),
                    tokens_in: Some(100),
                    tokens_out: Some(40),
                }),
                Some(Scripted::Text(text)) => Ok(Completion {
                    text: text.to_string(),
                    tokens_in: Some(100),
                    tokens_out: Some(40),
                }),
                Some(Scripted::Transient) => {
                    Err(Error::Llm("mock request failed: connection reset".to_string()))
                }
                Some(Scripted::Hard) => Err(Error::Llm("mock returned 400: bad request".to_string())),
            }
        }
    }

    fn chunk(date: &str) -> DayChunk {
        DayChunk {
            source_id: "chat.txt".to_string(),
            date: date.to_string(),
            messages: vec![ChatMessage {
                date: date.to_string(),
                time: "10:00:00".to_string(),
                sender: "Alice".to_string(),
                text: "hi".to_string(),
            }],
        }
    }

    fn extractor(db: Arc<Database>, llm: Arc<MockClient>, max_attempts: u32) -> Extractor {
        Extractor::new(
            db,
            llm,
            &ExtractorConfig {
                concurrency: 5,
                max_attempts,
                calling_context: "extract.memorable".to_string(),
            },
        )
    }

    fn test_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let text = chunk("15.01.25").canonical_text();
        assert_eq!(fingerprint(&text), fingerprint(&text));
        assert_eq!(fingerprint(&text).len(), 64);
        assert_ne!(fingerprint(&text), fingerprint("other text"));
    }

    #[tokio::test]
    async fn test_second_extract_hits_cache() {
        let db = test_db();
        let llm = Arc::new(MockClient::ok());
        let extractor = extractor(db.clone(), llm.clone(), 3);
        let chunk = chunk("15.01.25");

        let first = extractor.extract(&chunk).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.result.exchanges.len(), 1);
        assert_eq!(llm.calls(), 1);

        let second = extractor.extract(&chunk).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.result, first.result);
        // Exactly one LLM invocation for identical content and context.
        assert_eq!(llm.calls(), 1);
        assert_eq!(db.cache_entry_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_calling_context_separates_passes() {
        let db = test_db();
        let llm = Arc::new(MockClient::ok());
        let chunk = chunk("15.01.25");

        let first_pass = extractor(db.clone(), llm.clone(), 3);
        first_pass.extract(&chunk).await.unwrap();

        let second_pass = Extractor::new(
            db.clone(),
            llm.clone(),
            &ExtractorConfig {
                concurrency: 5,
                max_attempts: 3,
                calling_context: "extract.second-pass".to_string(),
            },
        );
        let outcome = second_pass.extract(&chunk).await.unwrap();

        // Same bytes, different logical caller: no collision, fresh call.
        assert!(!outcome.from_cache);
        assert_eq!(llm.calls(), 2);
        assert_eq!(db.cache_entry_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let db = test_db();
        let llm = Arc::new(MockClient::scripted(vec![
            Scripted::Transient,
            Scripted::Transient,
        ]));
        let extractor = extractor(db.clone(), llm.clone(), 5);

        let outcome = extractor.extract(&chunk("15.01.25")).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(llm.calls(), 3);
        assert_eq!(db.cache_entry_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_cache_nothing() {
        let db = test_db();
        let llm = Arc::new(MockClient::scripted(vec![
            Scripted::Transient,
            Scripted::Transient,
        ]));
        let extractor = extractor(db.clone(), llm.clone(), 2);

        let err = extractor.extract(&chunk("15.01.25")).await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
        assert_eq!(llm.calls(), 2);
        // Nothing cached: a later run starts from scratch.
        assert_eq!(db.cache_entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hard_http_error_fails_without_retry() {
        let db = test_db();
        let llm = Arc::new(MockClient::scripted(vec![Scripted::Hard]));
        let extractor = extractor(db.clone(), llm.clone(), 5);

        let err = extractor.extract(&chunk("15.01.25")).await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
        assert_eq!(llm.calls(), 1);
        assert_eq!(db.cache_entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_schema_violation_is_hard_and_uncached() {
        let db = test_db();
        let llm = Arc::new(MockClient::scripted(vec![Scripted::Text(
            r#"{"exchanges": "not a list"}"#,
        )]));
        let extractor = extractor(db.clone(), llm.clone(), 5);

        let err = extractor.extract(&chunk("15.01.25")).await.unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { .. }));
        assert_eq!(llm.calls(), 1);
        assert_eq!(db.cache_entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fenced_json_is_accepted() {
        let db = test_db();
        let llm = Arc::new(MockClient::scripted(vec![Scripted::Text(
            "```json\n{\"exchanges\": []}\n```",
        )]));
        let extractor = extractor(db.clone(), llm.clone(), 3);

        let outcome = extractor.extract(&chunk("15.01.25")).await.unwrap();
        assert!(outcome.result.exchanges.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_response_consumes_attempts() {
        let db = test_db();
        let llm = Arc::new(MockClient::scripted(vec![
            Scripted::Text("I would love to help but cannot"),
        ]));
        let extractor = extractor(db.clone(), llm.clone(), 2);

        // First attempt yields prose (malformed, transient); second succeeds.
        let outcome = extractor.extract(&chunk("15.01.25")).await.unwrap();
        assert_eq!(llm.calls(), 2);
        assert_eq!(outcome.result.exchanges.len(), 1);
    }

    #[tokio::test]
    async fn test_run_reports_partial_success() {
        let db = test_db();
        let llm = Arc::new(MockClient::scripted(vec![Scripted::Transient]));
        let extractor = Extractor::new(
            db.clone(),
            llm.clone(),
            &ExtractorConfig {
                concurrency: 1,
                max_attempts: 1,
                calling_context: "extract.memorable".to_string(),
            },
        );

        let chunks = vec![chunk("15.01.25"), chunk("16.01.25")];
        let report = extractor.run(&chunks).await;

        assert_eq!(report.chunks_total, 2);
        assert_eq!(report.chunks_failed.len(), 1);
        assert_eq!(report.chunks_failed[0].0, "chat.txt:15.01.25");
        assert_eq!(report.chunks_processed, 1);
        assert_eq!(report.extractions.len(), 1);
        assert_eq!(report.extractions[0].date, "16.01.25");
        assert_eq!(report.tokens_in, 100);
        assert_eq!(report.tokens_out, 40);
    }

    #[tokio::test]
    async fn test_gate_bounds_in_flight_calls() {
        let db = test_db();
        let llm = Arc::new(MockClient::slow());
        let extractor = Extractor::new(
            db.clone(),
            llm.clone(),
            &ExtractorConfig {
                concurrency: 2,
                max_attempts: 1,
                calling_context: "extract.memorable".to_string(),
            },
        );

        let chunks: Vec<DayChunk> = (10..16).map(|d| chunk(&format!("{d}.01.25"))).collect();
        let report = extractor.run(&chunks).await;

        assert_eq!(report.chunks_processed, 6);
        assert!(report.chunks_failed.is_empty());
        assert!(
            llm.max_active.load(Ordering::SeqCst) <= 2,
            "gate width exceeded: {}",
            llm.max_active.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_completion_json_variants() {
        assert!(completion_json(r#"{"exchanges": []}"#).is_ok());
        assert!(completion_json("Sure! ```json\n{\"exchanges\": []}\n``` done").is_ok());
        assert!(completion_json("no braces here").is_err());
        assert!(completion_json("} backwards {").is_err());
    }
}
