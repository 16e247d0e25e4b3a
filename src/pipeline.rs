//! Embedding pipeline
//!
//! Consumes `(chunk, metadata)` pairs from a bounded channel, plans
//! batches with the adaptive batcher, runs up to `concurrency` batches
//! in flight through the rate limiter, and emits `EmbeddedChunk`s on a
//! bounded output channel. Output preserves input order per source file
//! (a sequence-numbered reorder buffer re-serializes completed
//! batches). Transient batch failures retry with exponential backoff
//! and jitter; exhausted batches surface as failed chunks and the
//! pipeline continues. Permanent provider errors abort the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::analyzer::ChunkMetadata;
use crate::batcher::AdaptiveBatcher;
use crate::chunker::Chunk;
use crate::limiter::RateLimiter;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::provider::{EmbeddingProvider, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("pipeline cancelled")]
    Cancelled,
}

/// A chunk with its vector and provenance, ready for storage.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub metadata: ChunkMetadata,
    pub vector: Vec<f32>,
    pub provider_id: String,
    pub model_id: String,
    /// RFC 3339 creation stamp
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Batches in flight
    pub concurrency: usize,
    /// Transient retries per batch before it fails
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Batch size floor / hint for the adaptive batcher
    pub batch_size_hint: usize,
    pub adaptive_batching: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            batch_size_hint: 8,
            adaptive_batching: true,
        }
    }
}

/// Aggregate counters surfaced into the index report.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub chunks_received: u64,
    pub embeddings_generated: u64,
    pub chunks_skipped: u64,
    pub batches_completed: u64,
    pub retries: u64,
    /// Ids of chunks whose batch exhausted its retries
    pub failed_chunks: Vec<String>,
}

pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
    options: PipelineOptions,
    sink: Arc<dyn ProgressSink>,
}

enum BatchOutcome {
    Done {
        embedded: Vec<EmbeddedChunk>,
        latency: Duration,
        retries: u64,
    },
    Failed {
        chunk_ids: Vec<String>,
        size: usize,
        reason: String,
        retries: u64,
    },
    Fatal(ProviderError),
    Cancelled,
}

impl EmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        limiter: Arc<RateLimiter>,
        options: PipelineOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            provider,
            limiter,
            options,
            sink,
        }
    }

    /// Drive the pipeline until the input channel closes.
    ///
    /// Chunks whose estimated tokens exceed the provider's per-request
    /// cap are skipped with a progress event, never truncated.
    pub async fn run(
        &self,
        mut input: mpsc::Receiver<(Chunk, ChunkMetadata)>,
        output: mpsc::Sender<EmbeddedChunk>,
        cancel: CancellationToken,
    ) -> Result<PipelineStats, PipelineError> {
        let limits = self.provider.limits();
        let mut batcher = AdaptiveBatcher::new(
            &limits,
            self.options.batch_size_hint,
            self.options.adaptive_batching,
        );
        let mut stats = PipelineStats::default();

        let mut tasks: JoinSet<(u64, BatchOutcome)> = JoinSet::new();
        let mut reorder: BTreeMap<u64, Vec<EmbeddedChunk>> = BTreeMap::new();
        let mut next_spawn_seq = 0u64;
        let mut next_emit_seq = 0u64;

        // Pending chunks of the file currently being read; flushed at
        // file boundaries so batches never interleave files
        let mut pending: Vec<(Chunk, ChunkMetadata)> = Vec::new();
        let mut pending_tokens = 0usize;
        let mut current_file: Option<String> = None;

        loop {
            let received = tokio::select! {
                item = input.recv() => item,
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(PipelineError::Cancelled);
                }
            };

            let Some((chunk, metadata)) = received else {
                break;
            };
            stats.chunks_received += 1;

            let estimated = self.provider.estimate_tokens(&chunk.content);
            if estimated > limits.max_tokens_per_request {
                tracing::warn!(
                    path = %chunk.relative_path,
                    ordinal = chunk.ordinal,
                    estimated_tokens = estimated,
                    cap = limits.max_tokens_per_request,
                    "Chunk exceeds provider token cap, skipping"
                );
                self.sink.emit(ProgressEvent::ChunkSkipped {
                    path: chunk.relative_path.clone(),
                    reason: format!("estimated {estimated} tokens over provider cap"),
                });
                stats.chunks_skipped += 1;
                continue;
            }

            if current_file.as_deref() != Some(chunk.relative_path.as_str())
                && !pending.is_empty()
            {
                self.flush(
                    &mut pending,
                    &mut pending_tokens,
                    &batcher,
                    &mut tasks,
                    &mut next_spawn_seq,
                    &cancel,
                );
            }
            current_file = Some(chunk.relative_path.clone());
            pending_tokens += estimated;
            pending.push((chunk, metadata));

            // Flush mid-file once a full batch is buffered
            if pending.len() >= batcher.current_batch_size()
                || pending_tokens >= limits.max_tokens_per_request
            {
                self.flush(
                    &mut pending,
                    &mut pending_tokens,
                    &batcher,
                    &mut tasks,
                    &mut next_spawn_seq,
                    &cancel,
                );
            }

            // Backpressure: keep at most `concurrency` batches in flight
            while tasks.len() >= self.options.concurrency {
                self.join_one(
                    &mut tasks,
                    &mut batcher,
                    &mut stats,
                    &mut reorder,
                    &mut next_emit_seq,
                    &output,
                    &cancel,
                )
                .await?;
            }
        }

        if !pending.is_empty() {
            self.flush(
                &mut pending,
                &mut pending_tokens,
                &batcher,
                &mut tasks,
                &mut next_spawn_seq,
                &cancel,
            );
        }
        while !tasks.is_empty() {
            self.join_one(
                &mut tasks,
                &mut batcher,
                &mut stats,
                &mut reorder,
                &mut next_emit_seq,
                &output,
                &cancel,
            )
            .await?;
        }
        debug_assert!(reorder.is_empty(), "reorder buffer drained");

        Ok(stats)
    }

    /// Plan batches over the pending run and spawn one task per batch.
    fn flush(
        &self,
        pending: &mut Vec<(Chunk, ChunkMetadata)>,
        pending_tokens: &mut usize,
        batcher: &AdaptiveBatcher,
        tasks: &mut JoinSet<(u64, BatchOutcome)>,
        next_spawn_seq: &mut u64,
        cancel: &CancellationToken,
    ) {
        let run: Vec<(Chunk, ChunkMetadata)> = std::mem::take(pending);
        *pending_tokens = 0;

        let estimates: Vec<usize> = run
            .iter()
            .map(|(c, _)| self.provider.estimate_tokens(&c.content))
            .collect();

        let mut rest = run;
        let mut offset = 0usize;
        for range in batcher.plan(&estimates) {
            let len = range.end - range.start;
            debug_assert_eq!(range.start, offset);
            offset += len;
            let batch: Vec<(Chunk, ChunkMetadata)> = rest.drain(..len).collect();
            let tokens = estimates[range.start..range.end].iter().sum::<usize>();

            let seq = *next_spawn_seq;
            *next_spawn_seq += 1;
            let provider = Arc::clone(&self.provider);
            let limiter = Arc::clone(&self.limiter);
            let cancel = cancel.clone();
            let sink = Arc::clone(&self.sink);
            let max_retries = self.options.max_retries;
            let base_backoff = self.options.base_backoff;

            tasks.spawn(async move {
                let outcome = embed_batch(
                    provider,
                    limiter,
                    batch,
                    tokens,
                    max_retries,
                    base_backoff,
                    cancel,
                    sink,
                )
                .await;
                (seq, outcome)
            });
        }
    }

    /// Join one completed batch, apply batcher feedback, and emit any
    /// newly in-order output.
    #[allow(clippy::too_many_arguments)]
    async fn join_one(
        &self,
        tasks: &mut JoinSet<(u64, BatchOutcome)>,
        batcher: &mut AdaptiveBatcher,
        stats: &mut PipelineStats,
        reorder: &mut BTreeMap<u64, Vec<EmbeddedChunk>>,
        next_emit_seq: &mut u64,
        output: &mpsc::Sender<EmbeddedChunk>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let Some(joined) = tasks.join_next().await else {
            return Ok(());
        };
        let (seq, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
            Err(e) => {
                return Err(PipelineError::Provider(ProviderError::MalformedResponse(
                    format!("batch task panicked: {e}"),
                )))
            }
        };

        match outcome {
            BatchOutcome::Done {
                embedded,
                latency,
                retries,
            } => {
                batcher.record_success(latency);
                stats.retries += retries;
                stats.batches_completed += 1;
                stats.embeddings_generated += embedded.len() as u64;
                self.sink.emit(ProgressEvent::BatchCompleted {
                    size: embedded.len(),
                    latency_ms: latency.as_millis() as u64,
                });
                reorder.insert(seq, embedded);
            }
            BatchOutcome::Failed {
                chunk_ids,
                size,
                reason,
                retries,
            } => {
                batcher.record_transient_failure();
                stats.retries += retries;
                self.sink.emit(ProgressEvent::BatchFailed {
                    size,
                    reason: reason.clone(),
                });
                tracing::warn!(size, %reason, "Batch failed after retries");
                stats.failed_chunks.extend(chunk_ids);
                reorder.insert(seq, Vec::new());
            }
            BatchOutcome::Fatal(e) => {
                tasks.abort_all();
                return Err(PipelineError::Provider(e));
            }
            BatchOutcome::Cancelled => {
                tasks.abort_all();
                return Err(PipelineError::Cancelled);
            }
        }

        // Emit strictly in spawn order so per-file ordinal order holds
        while let Some(embedded) = reorder.remove(next_emit_seq) {
            *next_emit_seq += 1;
            for item in embedded {
                tokio::select! {
                    sent = output.send(item) => {
                        if sent.is_err() {
                            // Consumer hung up; treat like cancellation
                            tasks.abort_all();
                            return Err(PipelineError::Cancelled);
                        }
                    }
                    _ = cancel.cancelled() => {
                        tasks.abort_all();
                        return Err(PipelineError::Cancelled);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Embed one batch with retry. Transient failures back off
/// exponentially with jitter; the final failure is reported per chunk.
#[allow(clippy::too_many_arguments)]
async fn embed_batch(
    provider: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
    batch: Vec<(Chunk, ChunkMetadata)>,
    estimated_tokens: usize,
    max_retries: u32,
    base_backoff: Duration,
    cancel: CancellationToken,
    sink: Arc<dyn ProgressSink>,
) -> BatchOutcome {
    let texts: Vec<String> = batch.iter().map(|(c, _)| c.content.clone()).collect();
    let mut retries = 0u64;

    for attempt in 0..=max_retries {
        let started = Instant::now();
        let result = limiter
            .execute(estimated_tokens, &cancel, || provider.embed(&texts))
            .await;

        let result = match result {
            Some(r) => r,
            None => return BatchOutcome::Cancelled,
        };

        match result {
            Ok(vectors) => {
                let latency = started.elapsed();
                let created_at = chrono::Utc::now().to_rfc3339();
                let embedded = batch
                    .into_iter()
                    .zip(vectors)
                    .map(|((chunk, metadata), vector)| EmbeddedChunk {
                        chunk,
                        metadata,
                        vector,
                        provider_id: provider.id().to_string(),
                        model_id: provider.model().to_string(),
                        created_at: created_at.clone(),
                    })
                    .collect();
                return BatchOutcome::Done {
                    embedded,
                    latency,
                    retries,
                };
            }
            Err(e) if e.is_transient() && attempt < max_retries => {
                retries += 1;
                let backoff = backoff_with_jitter(base_backoff, attempt);
                sink.emit(ProgressEvent::BatchRetried {
                    attempt: attempt + 1,
                    reason: e.to_string(),
                });
                tracing::debug!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient batch failure, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return BatchOutcome::Cancelled,
                }
            }
            Err(e) if e.is_transient() => {
                return BatchOutcome::Failed {
                    chunk_ids: batch.iter().map(|(c, _)| c.chunk_id.clone()).collect(),
                    size: batch.len(),
                    reason: e.to_string(),
                    retries,
                };
            }
            Err(e) => return BatchOutcome::Fatal(e),
        }
    }
    unreachable!("retry loop returns on every arm");
}

fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 2);
    exp + Duration::from_millis(jitter_ms)
}

/// Embed a single query string through the same retry and rate-limit
/// path as index batches.
pub async fn embed_single(
    provider: &Arc<dyn EmbeddingProvider>,
    limiter: &RateLimiter,
    text: &str,
    cancel: &CancellationToken,
) -> Result<Vec<f32>, PipelineError> {
    let texts = vec![text.to_string()];
    let estimated = provider.estimate_tokens(text);
    let mut attempt = 0u32;
    loop {
        let result = limiter
            .execute(estimated, cancel, || provider.embed(&texts))
            .await
            .ok_or(PipelineError::Cancelled)?;
        match result {
            Ok(mut vectors) => {
                return vectors
                    .pop()
                    .ok_or_else(|| {
                        PipelineError::Provider(ProviderError::MalformedResponse(
                            "empty embed response".to_string(),
                        ))
                    })
            }
            Err(e) if e.is_transient() && attempt < 2 => {
                attempt += 1;
                tokio::time::sleep(backoff_with_jitter(Duration::from_millis(250), attempt)).await;
            }
            Err(e) => return Err(PipelineError::Provider(e)),
        }
    }
}
