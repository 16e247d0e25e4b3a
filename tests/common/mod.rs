//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::{StubProvider, TestEnv};
//! ```
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use codesift::config::Config;
use codesift::provider::{EmbeddingProvider, ProviderError, ProviderLimits};
use codesift::store::StoreRoot;
use codesift::{IndexManager, QueryManager};

/// Deterministic offline embedding provider.
///
/// Vectors are derived from the content hash, so identical text always
/// embeds identically and different texts land in different directions.
/// No network, no model downloads.
pub struct StubProvider {
    pub dimensions: usize,
    pub limits: ProviderLimits,
    /// Number of embed() calls observed
    pub calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            limits: ProviderLimits {
                max_tokens_per_request: 8192,
                max_requests_per_minute: 100_000,
                max_tokens_per_minute: 100_000_000,
                recommended_batch_size: 8,
                embedding_dimensions: dimensions,
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_limits(dimensions: usize, limits: ProviderLimits) -> Self {
        Self {
            dimensions,
            limits,
            calls: AtomicUsize::new(0),
        }
    }

    /// The vector this stub produces for a given text.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = blake3::hash(text.as_bytes());
        let bytes = digest.as_bytes();
        let mut v: Vec<f32> = (0..self.dimensions)
            .map(|i| bytes[i % 32] as f32 / 255.0)
            .collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    fn id(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// A repository working tree plus an isolated store root and stub
/// provider, wired into manager construction.
pub struct TestEnv {
    pub repo: TempDir,
    pub store_base: TempDir,
    pub provider: Arc<StubProvider>,
    pub config: Config,
}

impl TestEnv {
    pub fn new(dimensions: usize) -> Self {
        let store_base = TempDir::new().expect("store tempdir");
        let mut config = Config::default();
        config.storage.base_directory = store_base.path().to_path_buf();
        Self {
            repo: TempDir::new().expect("repo tempdir"),
            store_base,
            provider: Arc::new(StubProvider::new(dimensions)),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.repo.path()
    }

    /// Write a file under the repo root, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.repo.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write fixture file");
        path
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.repo.path().join(rel)).expect("remove fixture file");
    }

    pub fn store_root(&self) -> StoreRoot {
        StoreRoot::open(self.store_base.path()).expect("open store root")
    }

    pub fn indexer(&self) -> IndexManager {
        IndexManager::new(
            self.store_root(),
            Arc::clone(&self.provider) as Arc<dyn EmbeddingProvider>,
            self.config.clone(),
        )
    }

    /// Index manager bound to a different provider (dimension-change
    /// scenarios).
    pub fn indexer_with(&self, provider: Arc<StubProvider>) -> IndexManager {
        IndexManager::new(
            self.store_root(),
            provider as Arc<dyn EmbeddingProvider>,
            self.config.clone(),
        )
    }

    pub fn queries(&self) -> QueryManager {
        QueryManager::new(
            self.store_root(),
            Arc::clone(&self.provider) as Arc<dyn EmbeddingProvider>,
            self.config.clone(),
        )
    }
}

/// Checksum of every file under a directory tree; used to observe that
/// an operation left a store byte-identical.
pub fn tree_checksum(dir: &Path) -> String {
    fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in std::fs::read_dir(dir).expect("read_dir").flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect(root, &path, out);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                out.push((rel, std::fs::read(&path).expect("read file")));
            }
        }
    }
    let mut entries = Vec::new();
    collect(dir, dir, &mut entries);
    entries.sort();
    let mut hasher = blake3::Hasher::new();
    for (rel, bytes) in entries {
        hasher.update(rel.as_bytes());
        hasher.update(&bytes);
    }
    hasher.finalize().to_hex().to_string()
}
