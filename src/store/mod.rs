//! Per-repository isolated persistence
//!
//! Each repository gets its own directory tree under
//! `<storeRoot>/repos/<alias>-<repoId[..8]>/`:
//!
//! ```text
//! metadata.json        repository metadata + state machine
//! file-hashes.json     indexed file identities (change detection)
//! index.json           chunkId -> {relativePath, language, type}
//! term-stats.json      ranker term statistics
//! vectors/             fixed-width binary segments (+ .staging/)
//! payloads/<id>.json   stored chunk payloads
//! lock                 exclusive-writer advisory lock
//! ```
//!
//! Every JSON artifact is written to `<name>.tmp` and renamed over the
//! target; vector segments are staged and renamed at commit. The commit
//! point observable to readers is the `index.json` rename: a chunk is
//! live exactly when it has an index entry, so a batch appears all at
//! once or not at all. Operations against one repository never touch
//! another repository's directory.

mod types;
mod vectors;

pub use types::{
    Candidate, IndexEntry, PayloadFileMeta, RepositoryMetadata, StoreError, StoreState,
    StoredPayload, SurroundingContext, SCHEMA_VERSION,
};

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::detect::FileHashEntry;
use crate::math;
use crate::pipeline::EmbeddedChunk;
use crate::ranker::TermStats;

/// Payload cache entries kept per store handle.
const PAYLOAD_CACHE_SIZE: usize = 512;

const METADATA_FILE: &str = "metadata.json";
const FILE_HASHES_FILE: &str = "file-hashes.json";
const INDEX_FILE: &str = "index.json";
const TERM_STATS_FILE: &str = "term-stats.json";
const LOCK_FILE: &str = "lock";
const VECTORS_DIR: &str = "vectors";
const PAYLOADS_DIR: &str = "payloads";
const SETS_FILE: &str = "sets.json";

/// Write any JSON artifact atomically: serialize to `<path>.tmp`, then
/// rename over the target.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Directory-name-safe form of a repository alias.
fn sanitize_alias(alias: &str) -> String {
    let cleaned: String = alias
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "repo".to_string()
    } else {
        cleaned
    }
}

/// The base directory holding every repository store.
#[derive(Debug, Clone)]
pub struct StoreRoot {
    base: PathBuf,
}

impl StoreRoot {
    /// Open (creating if needed) the store root.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base = base.into();
        std::fs::create_dir_all(base.join("repos"))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn repos_dir(&self) -> PathBuf {
        self.base.join("repos")
    }

    /// Create or open the store for a repository working directory.
    ///
    /// The `repo_id` is the content-addressable hash of the
    /// canonicalized path, so the same tree always maps to the same
    /// store regardless of how the caller spelled the path.
    pub fn create(&self, repo_root: &Path, alias: &str) -> Result<RepoStore, StoreError> {
        let canonical = dunce::canonicalize(repo_root)?;
        let repo_id = crate::hash::repo_id(&canonical);

        if let Some(existing) = self.find(&repo_id)? {
            return Ok(existing);
        }

        let dir = self
            .repos_dir()
            .join(format!("{}-{}", sanitize_alias(alias), &repo_id[..8]));
        std::fs::create_dir_all(dir.join(VECTORS_DIR))?;
        std::fs::create_dir_all(dir.join(PAYLOADS_DIR))?;

        let metadata = RepositoryMetadata {
            schema_version: SCHEMA_VERSION,
            repo_id: repo_id.clone(),
            alias: alias.to_string(),
            root: canonical,
            created_at: chrono::Utc::now().to_rfc3339(),
            last_indexed_at: None,
            provider_id: String::new(),
            model_id: String::new(),
            dimensions: 0,
            total_chunks: 0,
            total_files: 0,
            state: StoreState::Initialized,
        };
        write_json_atomic(&dir.join(METADATA_FILE), &metadata)?;
        write_json_atomic(
            &dir.join(INDEX_FILE),
            &BTreeMap::<String, IndexEntry>::new(),
        )?;
        tracing::info!(repo_id = %&repo_id[..8], alias, dir = %dir.display(), "Created repository store");

        Ok(RepoStore::new(dir, repo_id))
    }

    /// Open the store for a repository path if one exists.
    pub fn open_repo(&self, repo_root: &Path) -> Result<Option<RepoStore>, StoreError> {
        let canonical = dunce::canonicalize(repo_root)?;
        self.find(&crate::hash::repo_id(&canonical))
    }

    /// Look a store up by repo id.
    pub fn find(&self, repo_id: &str) -> Result<Option<RepoStore>, StoreError> {
        for meta in self.list()? {
            if meta.repo_id == repo_id {
                let dir = self
                    .repos_dir()
                    .join(format!("{}-{}", sanitize_alias(&meta.alias), &repo_id[..8]));
                return Ok(Some(RepoStore::new(dir, repo_id.to_string())));
            }
        }
        Ok(None)
    }

    /// Look a store up by alias.
    pub fn find_by_alias(&self, alias: &str) -> Result<Option<RepoStore>, StoreError> {
        for meta in self.list()? {
            if meta.alias == alias {
                let dir = self.repos_dir().join(format!(
                    "{}-{}",
                    sanitize_alias(&meta.alias),
                    &meta.repo_id[..8]
                ));
                return Ok(Some(RepoStore::new(dir, meta.repo_id)));
            }
        }
        Ok(None)
    }

    /// Metadata of every known repository store.
    pub fn list(&self) -> Result<Vec<RepositoryMetadata>, StoreError> {
        let mut all = Vec::new();
        let entries = match std::fs::read_dir(self.repos_dir()) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(all),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let meta_path = entry.path().join(METADATA_FILE);
            match read_json::<RepositoryMetadata>(&meta_path) {
                Ok(Some(meta)) => all.push(meta),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %meta_path.display(), error = %e, "Unreadable store metadata, skipping");
                }
            }
        }
        all.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(all)
    }

    /// Named repository sets (`set:<name>` query scopes), stored beside
    /// the repos directory.
    pub fn load_sets(&self) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        Ok(read_json(&self.base.join(SETS_FILE))?.unwrap_or_default())
    }

    pub fn save_sets(&self, sets: &BTreeMap<String, Vec<String>>) -> Result<(), StoreError> {
        write_json_atomic(&self.base.join(SETS_FILE), sets)
    }
}

/// Exclusive-writer advisory lock; removed on drop.
pub struct WriterLock {
    path: PathBuf,
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to release writer lock");
            }
        }
    }
}

struct RepoInner {
    dir: PathBuf,
    repo_id: String,
    payload_cache: Mutex<LruCache<String, Arc<StoredPayload>>>,
}

/// Handle to one repository's store. Cheap to clone.
#[derive(Clone)]
pub struct RepoStore {
    inner: Arc<RepoInner>,
}

impl RepoStore {
    fn new(dir: PathBuf, repo_id: String) -> Self {
        Self {
            inner: Arc::new(RepoInner {
                dir,
                repo_id,
                payload_cache: Mutex::new(LruCache::new(
                    NonZeroUsize::new(PAYLOAD_CACHE_SIZE).expect("cache size is non-zero"),
                )),
            }),
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.inner.repo_id
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    fn vectors_dir(&self) -> PathBuf {
        self.inner.dir.join(VECTORS_DIR)
    }

    fn payload_path(&self, chunk_id: &str) -> PathBuf {
        self.inner.dir.join(PAYLOADS_DIR).join(format!("{chunk_id}.json"))
    }

    // ===== Metadata and state machine =====

    pub fn metadata(&self) -> Result<RepositoryMetadata, StoreError> {
        let meta: RepositoryMetadata = read_json(&self.inner.dir.join(METADATA_FILE))?
            .ok_or_else(|| StoreError::NotFound("metadata.json".to_string()))?;
        if meta.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found: meta.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(meta)
    }

    /// Apply a patch to the metadata and persist it atomically.
    pub fn update_metadata(
        &self,
        patch: impl FnOnce(&mut RepositoryMetadata),
    ) -> Result<RepositoryMetadata, StoreError> {
        let mut meta = self.metadata()?;
        patch(&mut meta);
        write_json_atomic(&self.inner.dir.join(METADATA_FILE), &meta)?;
        Ok(meta)
    }

    /// Take the exclusive writer lock for an index run.
    pub fn acquire_writer(&self) -> Result<WriterLock, StoreError> {
        let path = self.inner.dir.join(LOCK_FILE);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "{}", std::process::id());
                Ok(WriterLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
                    .unwrap_or(0);
                Err(StoreError::Locked { pid })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a lock left behind by a dead process. The caller decides
    /// staleness; the store only refuses to guess.
    pub fn break_lock(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(self.inner.dir.join(LOCK_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Transition `Initialized -> Indexing`. A store already in
    /// `Indexing` was abandoned mid-run (the lock holder died without
    /// rollback) and becomes `Corrupt`.
    pub fn begin_indexing(&self) -> Result<(), StoreError> {
        let meta = self.metadata()?;
        match meta.state {
            StoreState::Corrupt => Err(StoreError::Corrupt {
                reason: "store marked corrupt by a previous run".to_string(),
            }),
            StoreState::Indexing => {
                self.update_metadata(|m| m.state = StoreState::Corrupt)?;
                Err(StoreError::Corrupt {
                    reason: "previous index run was interrupted".to_string(),
                })
            }
            StoreState::Initialized => {
                vectors::clear_staging(&self.vectors_dir())?;
                self.update_metadata(|m| m.state = StoreState::Indexing)?;
                Ok(())
            }
        }
    }

    /// Transition `Indexing -> Initialized`. Both successful commits
    /// and graceful aborts land here; committed batches are already
    /// atomic snapshots.
    pub fn finish_indexing(&self, success: bool) -> Result<(), StoreError> {
        vectors::clear_staging(&self.vectors_dir())?;
        self.update_metadata(|m| {
            m.state = StoreState::Initialized;
            if success {
                m.last_indexed_at = Some(chrono::Utc::now().to_rfc3339());
            }
        })?;
        Ok(())
    }

    /// Wipe all indexed data and reset the store to `Initialized`.
    /// Required to leave the `Corrupt` state.
    pub fn repair(&self) -> Result<(), StoreError> {
        for dir in [self.vectors_dir(), self.inner.dir.join(PAYLOADS_DIR)] {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::create_dir_all(&dir)?;
        }
        for file in [FILE_HASHES_FILE, TERM_STATS_FILE] {
            let path = self.inner.dir.join(file);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        write_json_atomic(
            &self.inner.dir.join(INDEX_FILE),
            &BTreeMap::<String, IndexEntry>::new(),
        )?;
        self.update_metadata(|m| {
            m.state = StoreState::Initialized;
            m.total_chunks = 0;
            m.total_files = 0;
            m.last_indexed_at = None;
        })?;
        self.inner
            .payload_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        tracing::info!(repo_id = %&self.inner.repo_id[..8], "Repository store repaired");
        Ok(())
    }

    // ===== Chunk storage =====

    pub fn load_index(&self) -> Result<BTreeMap<String, IndexEntry>, StoreError> {
        Ok(read_json(&self.inner.dir.join(INDEX_FILE))?.unwrap_or_default())
    }

    pub fn chunk_count(&self) -> Result<u64, StoreError> {
        Ok(self.load_index()?.len() as u64)
    }

    /// Store a batch of embedded chunks.
    ///
    /// Atomic with respect to readers: payloads and the vector segment
    /// land on disk first, and the batch becomes visible only when
    /// `index.json` is renamed into place. Re-inserted chunk ids replace
    /// their prior records.
    pub fn put(&self, batch: &[EmbeddedChunk]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let meta = self.metadata()?;
        if meta.state == StoreState::Corrupt {
            return Err(StoreError::Corrupt {
                reason: "refusing to write to a corrupt store".to_string(),
            });
        }
        if meta.dimensions == 0 {
            return Err(StoreError::Corrupt {
                reason: "store has no provider binding; begin an index run first".to_string(),
            });
        }
        for item in batch {
            if item.vector.len() != meta.dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: meta.dimensions,
                    actual: item.vector.len(),
                });
            }
            let incoming = format!("{}:{}", item.provider_id, item.model_id);
            let stored = format!("{}:{}", meta.provider_id, meta.model_id);
            if incoming != stored {
                return Err(StoreError::ProviderMismatch {
                    stored,
                    current: incoming,
                });
            }
        }

        let mut index = self.load_index()?;

        // Replace-on-duplicate: drop prior records for re-inserted ids
        let collisions: HashSet<String> = batch
            .iter()
            .filter(|e| index.contains_key(&e.chunk.chunk_id))
            .map(|e| e.chunk.chunk_id.clone())
            .collect();
        if !collisions.is_empty() {
            self.remove_chunks(&mut index, &collisions)?;
        }

        // Payloads first: invisible until indexed
        for item in batch {
            let payload = StoredPayload::from_embedded(item);
            write_json_atomic(&self.payload_path(&payload.chunk_id), &payload)?;
        }

        // Vector segment: staged, then renamed
        let records: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|e| (e.chunk.chunk_id.clone(), e.vector.clone()))
            .collect();
        let body = vectors::encode_segment(&records, meta.dimensions)?;
        let seq = vectors::next_segment_seq(&self.vectors_dir())?;
        let staged = vectors::stage_segment(&self.vectors_dir(), seq, &body)?;
        vectors::commit_segment(&self.vectors_dir(), &staged)?;

        // Commit point
        for item in batch {
            index.insert(
                item.chunk.chunk_id.clone(),
                StoredPayload::from_embedded(item).index_entry(),
            );
        }
        write_json_atomic(&self.inner.dir.join(INDEX_FILE), &index)?;
        self.update_metadata(|m| m.total_chunks = index.len() as u64)?;

        tracing::debug!(
            repo_id = %&self.inner.repo_id[..8],
            batch = batch.len(),
            total = index.len(),
            "Committed chunk batch"
        );
        Ok(())
    }

    /// Delete chunks by id.
    pub fn delete(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut index = self.load_index()?;
        let victims: HashSet<String> = chunk_ids
            .iter()
            .filter(|id| index.contains_key(*id))
            .cloned()
            .collect();
        if victims.is_empty() {
            return Ok(());
        }
        self.remove_chunks(&mut index, &victims)?;
        write_json_atomic(&self.inner.dir.join(INDEX_FILE), &index)?;
        self.update_metadata(|m| m.total_chunks = index.len() as u64)?;
        Ok(())
    }

    /// Delete every chunk belonging to the given relative paths.
    /// Returns the number of chunks removed.
    pub fn delete_paths(&self, paths: &[String]) -> Result<u64, StoreError> {
        if paths.is_empty() {
            return Ok(0);
        }
        let path_set: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let index = self.load_index()?;
        let ids: Vec<String> = index
            .iter()
            .filter(|(_, entry)| path_set.contains(entry.relative_path.as_str()))
            .map(|(id, _)| id.clone())
            .collect();
        let count = ids.len() as u64;
        self.delete(&ids)?;
        Ok(count)
    }

    /// Shared removal path: un-index first (the atomic shrink of the
    /// live set), then drop vectors and payloads.
    fn remove_chunks(
        &self,
        index: &mut BTreeMap<String, IndexEntry>,
        victims: &HashSet<String>,
    ) -> Result<(), StoreError> {
        for id in victims {
            index.remove(id);
        }
        write_json_atomic(&self.inner.dir.join(INDEX_FILE), index)?;

        let meta = self.metadata()?;
        if meta.dimensions > 0 {
            vectors::remove_records(&self.vectors_dir(), victims, meta.dimensions)?;
        }
        let mut cache = self
            .inner
            .payload_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        for id in victims {
            cache.pop(id);
            let path = self.payload_path(id);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    // ===== Query =====

    /// Top-k live candidates by cosine similarity. Negative cosines are
    /// clamped to zero; stale vector records (deleted but not yet
    /// rewritten) are filtered through the live set.
    pub fn query(&self, query_vector: &[f32], k: usize) -> Result<Vec<Candidate>, StoreError> {
        let meta = self.metadata()?;
        if meta.dimensions == 0 {
            return Ok(Vec::new());
        }
        if query_vector.len() != meta.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: meta.dimensions,
                actual: query_vector.len(),
            });
        }
        let live: HashSet<String> = self.load_index()?.into_keys().collect();
        if live.is_empty() {
            return Ok(Vec::new());
        }

        let segments = vectors::list_segments(&self.vectors_dir())?;
        let mut scored: Vec<Candidate> = segments
            .par_iter()
            .map(|(_, path)| -> Result<Vec<Candidate>, StoreError> {
                let bytes = std::fs::read(path)?;
                let records = vectors::decode_segment(&bytes, meta.dimensions)?;
                Ok(records
                    .into_iter()
                    .filter(|r| live.contains(&r.chunk_id))
                    .filter_map(|r| {
                        math::cosine_similarity(query_vector, &r.vector).map(|cos| Candidate {
                            chunk_id: r.chunk_id,
                            score: math::clamp_score(cos),
                        })
                    })
                    .collect())
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Load a chunk payload, through the LRU cache.
    pub fn load_payload(&self, chunk_id: &str) -> Result<Arc<StoredPayload>, StoreError> {
        {
            let mut cache = self
                .inner
                .payload_cache
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if let Some(payload) = cache.get(chunk_id) {
                return Ok(Arc::clone(payload));
            }
        }
        let payload: StoredPayload = read_json(&self.payload_path(chunk_id))?
            .ok_or_else(|| StoreError::NotFound(format!("payload {chunk_id}")))?;
        let payload = Arc::new(payload);
        self.inner
            .payload_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .put(chunk_id.to_string(), Arc::clone(&payload));
        Ok(payload)
    }

    // ===== File hashes and term stats =====

    pub fn load_file_hashes(&self) -> Result<BTreeMap<String, FileHashEntry>, StoreError> {
        let entries: Vec<FileHashEntry> =
            read_json(&self.inner.dir.join(FILE_HASHES_FILE))?.unwrap_or_default();
        Ok(entries
            .into_iter()
            .map(|e| (e.relative_path.clone(), e))
            .collect())
    }

    pub fn save_file_hashes(
        &self,
        hashes: &BTreeMap<String, FileHashEntry>,
    ) -> Result<(), StoreError> {
        let entries: Vec<&FileHashEntry> = hashes.values().collect();
        write_json_atomic(&self.inner.dir.join(FILE_HASHES_FILE), &entries)
    }

    pub fn load_term_stats(&self) -> Result<Option<TermStats>, StoreError> {
        read_json(&self.inner.dir.join(TERM_STATS_FILE))
    }

    pub fn save_term_stats(&self, stats: &TermStats) -> Result<(), StoreError> {
        write_json_atomic(&self.inner.dir.join(TERM_STATS_FILE), stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_alias() {
        assert_eq!(sanitize_alias("my repo/name"), "my-repo-name");
        assert_eq!(sanitize_alias("ok-1.2_3"), "ok-1.2_3");
        assert_eq!(sanitize_alias(""), "repo");
    }

    #[test]
    fn test_write_json_atomic_replaces_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4, 5]).unwrap();

        let back: Vec<i32> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, vec![4, 5]);
        // The staging file never survives a completed write
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_json_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Vec<i32>> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }
}
