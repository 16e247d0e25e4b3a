//! Pipeline + rate limiter integration under virtual time.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use codesift::analyzer::analyze;
use codesift::chunker::Chunk;
use codesift::limiter::RateLimiter;
use codesift::pipeline::{EmbeddedChunk, EmbeddingPipeline, PipelineOptions};
use codesift::progress::NullSink;
use codesift::provider::{EmbeddingProvider, ProviderError, ProviderLimits};

/// Records call start times (virtual clock) and the in-flight peak.
struct RecordingProvider {
    limits: ProviderLimits,
    starts: Mutex<Vec<tokio::time::Instant>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingProvider {
    fn new(limits: ProviderLimits) -> Self {
        Self {
            limits,
            starts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingProvider {
    fn id(&self) -> &str {
        "recording"
    }

    fn model(&self) -> &str {
        "recording-model"
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.starts.lock().unwrap().push(tokio::time::Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
    }
}

fn single_chunk_for_file(n: usize) -> Chunk {
    let content = format!("fn handler_{n}() {{ serve() }}\n");
    let relative_path = format!("src/file_{n}.rs");
    Chunk {
        chunk_id: blake3::hash(relative_path.as_bytes()).to_hex().to_string(),
        absolute_path: PathBuf::from(format!("/repo/{relative_path}")),
        start_line: 1,
        end_line: 1,
        size_chars: content.chars().count(),
        estimated_tokens: content.chars().count() / 4,
        ordinal: 0,
        relative_path,
        content,
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_batches_all_complete() {
    // 2 requests/minute, one in flight: ten single-chunk files must all
    // embed, never more than 2 calls in any sliding minute
    let limits = ProviderLimits {
        max_tokens_per_request: 8192,
        max_requests_per_minute: 2,
        max_tokens_per_minute: 1_000_000,
        recommended_batch_size: 8,
        embedding_dimensions: 4,
    };
    let provider = Arc::new(RecordingProvider::new(limits));
    let limiter = Arc::new(RateLimiter::new(&limits, 1));
    let pipeline = EmbeddingPipeline::new(
        Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
        limiter,
        PipelineOptions::default(),
        Arc::new(NullSink),
    );

    let (in_tx, in_rx) = mpsc::channel(16);
    let (out_tx, mut out_rx) = mpsc::channel(16);

    let feeder = tokio::spawn(async move {
        for n in 0..10 {
            let chunk = single_chunk_for_file(n);
            let metadata = analyze(
                &chunk.content,
                Some(codesift::Language::Rust),
                &chunk.relative_path,
            );
            if in_tx.send((chunk, metadata)).await.is_err() {
                break;
            }
        }
    });
    let collector = tokio::spawn(async move {
        let mut collected = Vec::new();
        while let Some(item) = out_rx.recv().await {
            collected.push(item);
        }
        collected
    });

    let stats = pipeline
        .run(in_rx, out_tx, CancellationToken::new())
        .await
        .unwrap();
    feeder.await.unwrap();
    let collected = collector.await.unwrap();

    assert_eq!(stats.embeddings_generated, 10);
    assert_eq!(collected.len(), 10);
    assert!(stats.failed_chunks.is_empty());

    // In-flight cap held
    assert_eq!(provider.peak.load(Ordering::SeqCst), 1);

    // No more than 2 call starts in any 60-second sliding window
    let starts = provider.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 10);
    for window in starts.windows(3) {
        let span = window[2].duration_since(window[0]);
        assert!(
            span >= Duration::from_secs(60),
            "3 calls within {span:?} violate the 2/min window"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_form_per_file() {
    // Four chunks of one file with a batch hint of 2: two batches, no
    // file interleaving, output in ordinal order
    let limits = ProviderLimits {
        max_tokens_per_request: 8192,
        max_requests_per_minute: 100_000,
        max_tokens_per_minute: 100_000_000,
        recommended_batch_size: 2,
        embedding_dimensions: 4,
    };
    let provider = Arc::new(RecordingProvider::new(limits));
    let limiter = Arc::new(RateLimiter::new(&limits, 4));
    let pipeline = EmbeddingPipeline::new(
        Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
        limiter,
        PipelineOptions {
            batch_size_hint: 2,
            ..PipelineOptions::default()
        },
        Arc::new(NullSink),
    );

    let (in_tx, in_rx) = mpsc::channel(16);
    let (out_tx, mut out_rx) = mpsc::channel::<EmbeddedChunk>(16);
    let feeder = tokio::spawn(async move {
        for ordinal in 0..4u32 {
            let content = format!("fn part_{ordinal}() {{}}\n");
            let chunk = Chunk {
                chunk_id: blake3::hash(format!("part-{ordinal}").as_bytes())
                    .to_hex()
                    .to_string(),
                relative_path: "src/single.rs".to_string(),
                absolute_path: PathBuf::from("/repo/src/single.rs"),
                start_line: ordinal + 1,
                end_line: ordinal + 1,
                size_chars: content.chars().count(),
                estimated_tokens: 4,
                ordinal,
                content,
            };
            let metadata = analyze(&chunk.content, Some(codesift::Language::Rust), "src/single.rs");
            if in_tx.send((chunk, metadata)).await.is_err() {
                break;
            }
        }
    });
    let collector = tokio::spawn(async move {
        let mut ordinals = Vec::new();
        while let Some(item) = out_rx.recv().await {
            ordinals.push(item.chunk.ordinal);
        }
        ordinals
    });

    let stats = pipeline
        .run(in_rx, out_tx, CancellationToken::new())
        .await
        .unwrap();
    feeder.await.unwrap();
    let ordinals = collector.await.unwrap();

    assert_eq!(stats.batches_completed, 2);
    assert_eq!(ordinals, vec![0, 1, 2, 3], "per-file ordinal order preserved");
}
