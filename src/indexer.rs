//! Index orchestration
//!
//! Drives a full or incremental index run: walk the tree, diff against
//! the stored hash map, delete stale records, stream changed files
//! through chunking, analysis, and the embedding pipeline, and commit
//! to the repository store in bounded batches. A file's hash entry is
//! persisted only once every chunk of that file has been committed, so
//! the hash map always names files whose chunks are actually in the
//! store, including after cancellation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::analyzer::{analyze, surrounding_context, DEFAULT_CONTEXT_LINES};
use crate::chunker::{chunk, ChunkOptions, ChunkSource};
use crate::config::Config;
use crate::detect::{detect, ChangeSet, DetectOptions, FileHashEntry};
use crate::error::Error;
use crate::limiter::RateLimiter;
use crate::pipeline::{EmbeddedChunk, EmbeddingPipeline, PipelineError, PipelineOptions};
use crate::progress::{NullSink, ProgressEvent, ProgressSink};
use crate::provider::EmbeddingProvider;
use crate::ranker::{payload_terms, TermStats};
use crate::store::{RepoStore, StoreError, StoreRoot};
use crate::walker::{FileInfo, Walker};

/// Chunks committed per store batch.
const DEFAULT_COMMIT_THRESHOLD: usize = 64;

/// Channel capacity between the producer, pipeline, and committer.
const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Wipe the store and re-embed everything
    pub force_full_index: bool,
    /// Override the configured embedding concurrency
    pub concurrency: Option<usize>,
    /// Batch size hint for the adaptive batcher
    pub batch_size: Option<usize>,
    /// Extra exclusion globs on top of the configured set
    pub exclude_patterns: Vec<String>,
    /// Override the configured chunker settings
    pub chunk_options: Option<ChunkOptions>,
    /// Chunks per periodic commit
    pub commit_threshold: usize,
    /// Store alias; defaults to the repository directory name
    pub alias: Option<String>,
    pub context_lines: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            force_full_index: false,
            concurrency: None,
            batch_size: None,
            exclude_patterns: Vec::new(),
            chunk_options: None,
            commit_threshold: DEFAULT_COMMIT_THRESHOLD,
            alias: None,
            context_lines: DEFAULT_CONTEXT_LINES,
        }
    }
}

/// Outcome of an index run.
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub files_processed: u64,
    pub files_skipped: u64,
    pub files_deleted: u64,
    pub chunks_generated: u64,
    pub embeddings_generated: u64,
    pub chunks_failed: u64,
    pub bytes_processed: u64,
    pub duration_ms: u64,
    pub provider: String,
    pub model: String,
    pub warnings: Vec<String>,
    pub fatal_error: Option<String>,
}

/// Per-file completion tracking shared between the producer and the
/// committer. A file completes when every chunk the producer announced
/// for it has been committed.
#[derive(Default)]
struct FileTracker {
    expected: HashMap<String, (u32, FileHashEntry)>,
    committed: HashMap<String, u32>,
    complete: HashSet<String>,
}

impl FileTracker {
    fn register(&mut self, entry: FileHashEntry, chunk_count: u32) {
        let path = entry.relative_path.clone();
        if chunk_count == 0 {
            // Empty or sub-minimum files with no chunks are complete
            // immediately; their entry still belongs in the hash map
            self.complete.insert(path.clone());
        }
        self.expected.insert(path, (chunk_count, entry));
    }

    fn record_committed(&mut self, path: &str, count: u32) {
        let seen = self.committed.entry(path.to_string()).or_insert(0);
        *seen += count;
        if let Some((expected, _)) = self.expected.get(path) {
            if *seen >= *expected {
                self.complete.insert(path.to_string());
            }
        }
    }

    fn completed_entries(&self) -> Vec<FileHashEntry> {
        self.complete
            .iter()
            .filter_map(|p| self.expected.get(p).map(|(_, e)| e.clone()))
            .collect()
    }
}

pub struct IndexManager {
    store_root: StoreRoot,
    provider: Arc<dyn EmbeddingProvider>,
    config: Config,
}

impl IndexManager {
    pub fn new(store_root: StoreRoot, provider: Arc<dyn EmbeddingProvider>, config: Config) -> Self {
        Self {
            store_root,
            provider,
            config,
        }
    }

    /// Full or incremental index run with default sink and no
    /// cancellation.
    pub async fn index(&self, repo_root: &Path, options: IndexOptions) -> Result<IndexReport, Error> {
        self.index_with(
            repo_root,
            options,
            Arc::new(NullSink),
            CancellationToken::new(),
        )
        .await
    }

    /// Incremental update: alias for an index run without force.
    pub async fn update(&self, repo_root: &Path) -> Result<IndexReport, Error> {
        self.index(repo_root, IndexOptions::default()).await
    }

    pub async fn index_with(
        &self,
        repo_root: &Path,
        options: IndexOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<IndexReport, Error> {
        let started = Instant::now();
        let alias = options.alias.clone().unwrap_or_else(|| {
            repo_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "repo".to_string())
        });

        let store = self.store_root.create(repo_root, &alias).map_err(Error::Store)?;
        let _lock = store.acquire_writer().map_err(Error::Store)?;

        self.prepare_store(&store, &options)?;

        let result = self
            .run_locked(repo_root, &store, &options, &sink, &cancel, started)
            .await;

        match &result {
            Ok(_) => store.finish_indexing(true).map_err(Error::Store)?,
            Err(_) => {
                // Graceful abort: committed batches are valid snapshots,
                // the state machine returns to Initialized
                if let Err(e) = store.finish_indexing(false) {
                    tracing::warn!(error = %e, "Failed to roll back store state after abort");
                }
            }
        }
        result
    }

    /// Validate or establish the store's provider binding, honoring
    /// `force_full_index`, and enter the Indexing state.
    fn prepare_store(&self, store: &RepoStore, options: &IndexOptions) -> Result<(), Error> {
        let limits = self.provider.limits();
        let meta = store.metadata().map_err(Error::Store)?;

        let bound = !meta.provider_id.is_empty();
        let same_binding = meta.provider_id == self.provider.id()
            && meta.model_id == self.provider.model()
            && meta.dimensions == limits.embedding_dimensions;

        if bound && !same_binding {
            if !options.force_full_index {
                // A different vector space cannot be mixed in; the caller
                // must opt into a rebuild
                if meta.dimensions != limits.embedding_dimensions {
                    return Err(Error::Store(StoreError::DimensionMismatch {
                        expected: meta.dimensions,
                        actual: limits.embedding_dimensions,
                    }));
                }
                return Err(Error::Store(StoreError::ProviderMismatch {
                    stored: format!("{}:{}", meta.provider_id, meta.model_id),
                    current: format!("{}:{}", self.provider.id(), self.provider.model()),
                }));
            }
            store.repair().map_err(Error::Store)?;
        } else if options.force_full_index && bound {
            store.repair().map_err(Error::Store)?;
        }

        store
            .update_metadata(|m| {
                m.provider_id = self.provider.id().to_string();
                m.model_id = self.provider.model().to_string();
                m.dimensions = limits.embedding_dimensions;
            })
            .map_err(Error::Store)?;

        match store.begin_indexing() {
            Ok(()) => Ok(()),
            Err(StoreError::Corrupt { .. }) if options.force_full_index => {
                store.repair().map_err(Error::Store)?;
                store
                    .update_metadata(|m| {
                        m.provider_id = self.provider.id().to_string();
                        m.model_id = self.provider.model().to_string();
                        m.dimensions = limits.embedding_dimensions;
                    })
                    .map_err(Error::Store)?;
                store.begin_indexing().map_err(Error::Store)
            }
            Err(e) => Err(Error::Store(e)),
        }
    }

    async fn run_locked(
        &self,
        repo_root: &Path,
        store: &RepoStore,
        options: &IndexOptions,
        sink: &Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<IndexReport, Error> {
        let mut report = IndexReport {
            provider: self.provider.id().to_string(),
            model: self.provider.model().to_string(),
            ..IndexReport::default()
        };

        // ── Discover ────────────────────────────────────────────────
        let walker = Walker::new(repo_root)
            .with_exclusions(&self.config.exclusions)
            .exclude_patterns(&options.exclude_patterns)
            .max_file_size(self.config.performance.max_file_size)
            .parallel(self.config.performance.walk_workers);
        let files: Vec<FileInfo> = {
            let discovery = walker.discover().map_err(Error::Walk)?;
            tokio::task::spawn_blocking(move || discovery.collect())
                .await
                .map_err(|e| Error::Other(format!("walk task failed: {e}")))?
        };
        sink.emit(ProgressEvent::FilesDiscovered {
            count: files.len() as u64,
        });
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // ── Diff ────────────────────────────────────────────────────
        let stored_hashes = store.load_file_hashes().map_err(Error::Store)?;
        let detect_options = DetectOptions {
            ignore_stat: options.force_full_index,
        };
        let changes: ChangeSet = {
            let files = files.clone();
            let stored = stored_hashes.clone();
            tokio::task::spawn_blocking(move || detect(&files, &stored, detect_options))
                .await
                .map_err(|e| Error::Other(format!("detect task failed: {e}")))?
        };
        report.files_deleted = changes.deleted.len() as u64;

        let mut term_stats = match store.load_term_stats().map_err(Error::Store)? {
            Some(stats) => stats,
            None => rebuild_term_stats(store).map_err(Error::Store)?,
        };

        // ── Remove stale records before writing new ones ────────────
        // Deleted and modified paths lose their chunks now; "added"
        // paths are cleaned too, which is a no-op except after a
        // cancelled run left partial chunks behind.
        let mut stale_paths: Vec<String> = changes.deleted.clone();
        stale_paths.extend(changes.modified.iter().map(|f| f.relative_path.clone()));
        stale_paths.extend(changes.added.iter().map(|f| f.relative_path.clone()));
        self.remove_stale(store, &stale_paths, &mut term_stats)?;

        // The hash map must stop naming paths whose chunks are gone
        let mut live_hashes: BTreeMap<String, FileHashEntry> = stored_hashes;
        for path in &stale_paths {
            live_hashes.remove(path);
        }
        store.save_file_hashes(&live_hashes).map_err(Error::Store)?;

        if changes.is_empty() {
            // Refresh stats even when nothing changed (stat drift)
            store
                .save_file_hashes(&changes.new_hashes)
                .map_err(Error::Store)?;
            store
                .update_metadata(|m| m.total_files = changes.new_hashes.len() as u64)
                .map_err(Error::Store)?;
            report.duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(alias = %store.metadata().map_err(Error::Store)?.alias, "Index up to date");
            return Ok(report);
        }

        // ── Stream changed files through the pipeline ───────────────
        let alias = store.metadata().map_err(Error::Store)?.alias;
        let chunk_options = options
            .chunk_options
            .clone()
            .unwrap_or_else(|| self.chunk_options_from_config());
        let tracker = Arc::new(Mutex::new(FileTracker::default()));

        let (chunk_tx, chunk_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<EmbeddedChunk>(CHANNEL_CAPACITY);

        let concurrent_requests = self
            .config
            .providers
            .get(self.provider.id())
            .map(|p| p.rate_limit.concurrent_requests)
            .unwrap_or(self.config.performance.concurrency);
        let limiter = Arc::new(RateLimiter::new(&self.provider.limits(), concurrent_requests));
        let pipeline = EmbeddingPipeline::new(
            Arc::clone(&self.provider),
            limiter,
            PipelineOptions {
                concurrency: options
                    .concurrency
                    .unwrap_or(self.config.performance.concurrency),
                batch_size_hint: options
                    .batch_size
                    .unwrap_or(self.config.performance.batch_size),
                adaptive_batching: self.config.performance.adaptive_batching,
                ..PipelineOptions::default()
            },
            Arc::clone(sink),
        );

        let producer = {
            let to_index: Vec<FileInfo> = changes.to_index().cloned().collect();
            let hashes = changes.new_hashes.clone();
            let tracker = Arc::clone(&tracker);
            let sink = Arc::clone(sink);
            let cancel = cancel.clone();
            let alias = alias.clone();
            let context_lines = options.context_lines;
            tokio::spawn(async move {
                produce_chunks(
                    to_index,
                    hashes,
                    alias,
                    chunk_options,
                    context_lines,
                    tracker,
                    chunk_tx,
                    sink,
                    cancel,
                )
                .await
            })
        };

        let pipeline_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(chunk_rx, out_tx, cancel).await })
        };

        // ── Commit loop ─────────────────────────────────────────────
        let mut buffer: Vec<EmbeddedChunk> = Vec::with_capacity(options.commit_threshold);
        let mut commit_error: Option<Error> = None;
        let mut committed_total = 0u64;
        while let Some(embedded) = out_rx.recv().await {
            buffer.push(embedded);
            if buffer.len() >= options.commit_threshold.max(1) {
                match self.commit(
                    store,
                    &mut buffer,
                    &tracker,
                    &mut live_hashes,
                    &mut term_stats,
                    sink,
                ) {
                    Ok(committed) => {
                        committed_total += committed;
                        let elapsed = started.elapsed().as_secs_f32().max(0.001);
                        let rate = committed_total as f32 / elapsed;
                        sink.emit(ProgressEvent::Throughput {
                            chunks_per_sec: rate,
                            eta_secs: estimate_eta(&tracker, committed_total, rate),
                        });
                    }
                    Err(e) => {
                        commit_error = Some(e);
                        break;
                    }
                }
            }
        }
        // Drain channel so the pipeline can finish if we broke early
        drop(out_rx);

        let producer_stats = producer
            .await
            .map_err(|e| Error::Other(format!("producer task failed: {e}")))?;
        let pipeline_result = pipeline_task
            .await
            .map_err(|e| Error::Other(format!("pipeline task failed: {e}")))?;

        if let Some(e) = commit_error {
            return Err(e);
        }

        let pipeline_stats = match pipeline_result {
            Ok(stats) => stats,
            Err(PipelineError::Cancelled) => {
                // Commit what already came through, then surface the
                // cancellation as its own outcome
                let _ = self.commit(
                    store,
                    &mut buffer,
                    &tracker,
                    &mut live_hashes,
                    &mut term_stats,
                    sink,
                );
                return Err(Error::Cancelled);
            }
            Err(PipelineError::Provider(e)) => {
                let _ = self.commit(
                    store,
                    &mut buffer,
                    &tracker,
                    &mut live_hashes,
                    &mut term_stats,
                    sink,
                );
                return Err(Error::Provider(e));
            }
        };

        self.commit(
            store,
            &mut buffer,
            &tracker,
            &mut live_hashes,
            &mut term_stats,
            sink,
        )?;

        // ── Finalize ────────────────────────────────────────────────
        // Unchanged files keep (refreshed) entries; indexed files get
        // entries only when complete
        {
            let tracker = tracker.lock().unwrap_or_else(|p| p.into_inner());
            for file in &changes.unchanged {
                if let Some(entry) = changes.new_hashes.get(&file.relative_path) {
                    live_hashes.insert(file.relative_path.clone(), entry.clone());
                }
            }
            for entry in tracker.completed_entries() {
                live_hashes.insert(entry.relative_path.clone(), entry);
            }
            report.files_processed = tracker.complete.len() as u64;
            report.files_skipped =
                producer_stats.files_skipped + (tracker.expected.len() - tracker.complete.len()) as u64;
        }
        store.save_file_hashes(&live_hashes).map_err(Error::Store)?;
        store.save_term_stats(&term_stats).map_err(Error::Store)?;
        store
            .update_metadata(|m| m.total_files = live_hashes.len() as u64)
            .map_err(Error::Store)?;

        report.chunks_generated = producer_stats.chunks_generated;
        report.embeddings_generated = pipeline_stats.embeddings_generated;
        report.chunks_failed =
            pipeline_stats.failed_chunks.len() as u64 + pipeline_stats.chunks_skipped;
        report.bytes_processed = producer_stats.bytes_processed;
        report.warnings = producer_stats.warnings;
        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            files = report.files_processed,
            chunks = report.embeddings_generated,
            failed = report.chunks_failed,
            duration_ms = report.duration_ms,
            "Index run complete"
        );
        Ok(report)
    }

    fn chunk_options_from_config(&self) -> ChunkOptions {
        let target = self.config.performance.chunk_size.max(64);
        ChunkOptions {
            target_chars: target,
            max_chars: target * 2,
            overlap_ratio: self.config.performance.chunk_overlap,
            ..ChunkOptions::default()
        }
    }

    /// Drop chunks for stale paths, keeping term statistics in step.
    fn remove_stale(
        &self,
        store: &RepoStore,
        paths: &[String],
        term_stats: &mut TermStats,
    ) -> Result<(), Error> {
        if paths.is_empty() {
            return Ok(());
        }
        let path_set: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let index = store.load_index().map_err(Error::Store)?;
        for (chunk_id, entry) in &index {
            if path_set.contains(entry.relative_path.as_str()) {
                match store.load_payload(chunk_id) {
                    Ok(payload) => term_stats.remove_document(&payload_terms(&payload)),
                    Err(e) => {
                        tracing::debug!(chunk_id = %chunk_id, error = %e, "No payload for stale chunk")
                    }
                }
            }
        }
        store.delete_paths(paths).map_err(Error::Store)?;
        Ok(())
    }

    /// Commit buffered chunks, update term stats and completion
    /// tracking, and persist the hash map for newly complete files.
    /// Returns the number of chunks committed.
    fn commit(
        &self,
        store: &RepoStore,
        buffer: &mut Vec<EmbeddedChunk>,
        tracker: &Arc<Mutex<FileTracker>>,
        live_hashes: &mut BTreeMap<String, FileHashEntry>,
        term_stats: &mut TermStats,
        sink: &Arc<dyn ProgressSink>,
    ) -> Result<u64, Error> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(buffer);
        store.put(&batch).map_err(Error::Store)?;

        let mut per_file: HashMap<&str, u32> = HashMap::new();
        for item in &batch {
            term_stats.add_document(&crate::ranker::document_terms(
                &item.chunk.content,
                item.metadata.language,
                item.metadata.function_name.as_deref(),
                item.metadata.class_name.as_deref(),
                &item.metadata.imports,
            ));
            *per_file.entry(item.chunk.relative_path.as_str()).or_insert(0) += 1;
        }

        {
            let mut tracker = tracker.lock().unwrap_or_else(|p| p.into_inner());
            for (path, count) in per_file {
                tracker.record_committed(path, count);
            }
            for entry in tracker.completed_entries() {
                live_hashes.insert(entry.relative_path.clone(), entry);
            }
        }
        store.save_file_hashes(live_hashes).map_err(Error::Store)?;
        store.save_term_stats(term_stats).map_err(Error::Store)?;

        sink.emit(ProgressEvent::Committed {
            chunks: batch.len() as u64,
        });
        sink.emit(ProgressEvent::EmbeddingsGenerated {
            count: batch.len() as u64,
        });
        Ok(batch.len() as u64)
    }
}

/// Remaining-work estimate from the chunk counts the producer has
/// announced so far. `None` until at least one chunk committed.
fn estimate_eta(
    tracker: &Arc<Mutex<FileTracker>>,
    committed_total: u64,
    rate: f32,
) -> Option<u64> {
    if rate <= 0.0 {
        return None;
    }
    let tracker = tracker.lock().unwrap_or_else(|p| p.into_inner());
    let announced: u64 = tracker.expected.values().map(|(n, _)| *n as u64).sum();
    let remaining = announced.saturating_sub(committed_total);
    Some((remaining as f32 / rate) as u64)
}

/// Counters returned by the producer task.
#[derive(Debug, Default)]
struct ProducerStats {
    chunks_generated: u64,
    files_skipped: u64,
    bytes_processed: u64,
    warnings: Vec<String>,
}

/// Read, chunk, and analyze every changed file, feeding the pipeline.
#[allow(clippy::too_many_arguments)]
async fn produce_chunks(
    files: Vec<FileInfo>,
    hashes: BTreeMap<String, FileHashEntry>,
    alias: String,
    chunk_options: ChunkOptions,
    context_lines: usize,
    tracker: Arc<Mutex<FileTracker>>,
    chunk_tx: mpsc::Sender<(crate::chunker::Chunk, crate::analyzer::ChunkMetadata)>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> ProducerStats {
    let mut stats = ProducerStats::default();

    for file in files {
        if cancel.is_cancelled() {
            break;
        }
        let Some(entry) = hashes.get(&file.relative_path) else {
            // Hashing failed during detection; already warned there
            stats.files_skipped += 1;
            continue;
        };

        let content = match tokio::fs::read_to_string(&file.absolute_path).await {
            Ok(c) => c,
            Err(e) => {
                let warning = format!("{}: {e}", file.relative_path);
                tracing::warn!(path = %file.relative_path, error = %e, "File unreadable, skipping");
                sink.emit(ProgressEvent::FileSkipped {
                    path: file.relative_path.clone(),
                    reason: e.to_string(),
                });
                stats.warnings.push(warning);
                stats.files_skipped += 1;
                continue;
            }
        };
        sink.emit(ProgressEvent::FileStarted {
            path: file.relative_path.clone(),
        });
        stats.bytes_processed += content.len() as u64;

        let source = ChunkSource {
            alias: alias.clone(),
            relative_path: file.relative_path.clone(),
            absolute_path: file.absolute_path.clone(),
            file_hash: entry.content_hash.clone(),
        };
        let chunks = chunk(&content, &source, &chunk_options);
        stats.chunks_generated += chunks.len() as u64;
        sink.emit(ProgressEvent::ChunksProduced {
            count: chunks.len() as u64,
        });

        tracker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .register(entry.clone(), chunks.len() as u32);

        for piece in chunks {
            let mut metadata = analyze(&piece.content, file.language, &file.relative_path);
            let (before, after) =
                surrounding_context(&content, piece.start_line, piece.end_line, context_lines);
            metadata.context_before = before;
            metadata.context_after = after;

            tokio::select! {
                sent = chunk_tx.send((piece, metadata)) => {
                    if sent.is_err() {
                        // Pipeline shut down (fatal error); stop producing
                        return stats;
                    }
                }
                _ = cancel.cancelled() => return stats,
            }
        }
    }
    stats
}

/// Rebuild term statistics from every live payload. Used when
/// `term-stats.json` is missing (older store or manual deletion).
pub fn rebuild_term_stats(store: &RepoStore) -> Result<TermStats, StoreError> {
    let mut stats = TermStats::default();
    for chunk_id in store.load_index()?.keys() {
        match store.load_payload(chunk_id) {
            Ok(payload) => stats.add_document(&payload_terms(&payload)),
            Err(e) => {
                tracing::warn!(chunk_id = %chunk_id, error = %e, "Skipping payload during term-stats rebuild")
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_tracker_completion() {
        let mut tracker = FileTracker::default();
        let entry = FileHashEntry {
            relative_path: "src/a.rs".to_string(),
            content_hash: crate::hash::content_hash(b"a"),
            size_bytes: 1,
            last_modified: 0,
        };
        tracker.register(entry, 3);
        tracker.record_committed("src/a.rs", 2);
        assert!(tracker.completed_entries().is_empty());
        tracker.record_committed("src/a.rs", 1);
        assert_eq!(tracker.completed_entries().len(), 1);
    }

    #[test]
    fn test_file_tracker_zero_chunks_is_complete() {
        let mut tracker = FileTracker::default();
        let entry = FileHashEntry {
            relative_path: "empty.rs".to_string(),
            content_hash: crate::hash::content_hash(b""),
            size_bytes: 0,
            last_modified: 0,
        };
        tracker.register(entry, 0);
        assert_eq!(tracker.completed_entries().len(), 1);
    }

    #[test]
    fn test_default_options() {
        let options = IndexOptions::default();
        assert!(!options.force_full_index);
        assert_eq!(options.commit_threshold, 64);
        assert_eq!(options.context_lines, 2);
    }
}
