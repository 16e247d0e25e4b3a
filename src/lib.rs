//! # codesift - Per-Repository Semantic Code Search
//!
//! Transforms a source repository into a locally stored semantic search
//! index and answers natural-language queries with ranked, content-rich
//! snippets.
//!
//! ## Features
//!
//! - **Streaming indexer**: memory-bounded walk → chunk → embed → store
//!   pipeline with bounded channels and backpressure
//! - **Incremental updates**: content-hash change detection with a
//!   size+mtime shortcut
//! - **Pluggable providers**: local or remote HTTP embedding endpoints
//!   behind one trait, with adaptive batching and rate limiting
//! - **Isolated stores**: one directory tree per repository, atomic
//!   commits, single-writer lock
//! - **Hybrid ranking**: cosine similarity fused with BM25 over code
//!   tokens and a structural slot
//!
//! ## Quick Start
//!
//! ```no_run
//! use codesift::{Config, IndexManager, IndexOptions, QueryManager, QueryOptions, Scope};
//! use codesift::provider::ProviderRegistry;
//! use codesift::store::StoreRoot;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load(Path::new("."))?;
//! let registry = ProviderRegistry::from_config(&config)?;
//! let provider = registry.get(&config.default_provider)?;
//! let store_root = StoreRoot::open(&config.storage.base_directory)?;
//!
//! // Index the working directory
//! let indexer = IndexManager::new(store_root.clone(), Arc::clone(&provider), config.clone());
//! let report = indexer.index(Path::new("."), IndexOptions::default()).await?;
//! println!("indexed {} chunks", report.embeddings_generated);
//!
//! // Query it
//! let queries = QueryManager::new(store_root, provider, config);
//! let results = queries
//!     .query(Scope::Repo(Path::new(".").into()), "parse configuration file", QueryOptions::default())
//!     .await?;
//! for r in &results {
//!     println!("{}:{}-{} {:.3}", r.file_path, r.start_line, r.end_line, r.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod batcher;
pub mod chunker;
pub mod config;
pub mod detect;
pub mod error;
pub mod hash;
pub mod indexer;
pub mod language;
pub mod limiter;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod query;
pub mod ranker;
pub mod store;
pub mod walker;

pub(crate) mod math;

pub use analyzer::{analyze, ChunkKind, ChunkMetadata};
pub use chunker::{chunk, Chunk, ChunkOptions};
pub use config::{Config, ConfigError};
pub use detect::{detect, ChangeSet, DetectOptions};
pub use error::Error;
pub use indexer::{IndexManager, IndexOptions, IndexReport};
pub use language::{Language, LanguageFamily};
pub use pipeline::EmbeddedChunk;
pub use progress::{ProgressEvent, ProgressSink};
pub use query::{QueryManager, QueryOptions, Scope, SearchResult};
pub use ranker::Ranker;
pub use store::{RepoStore, StoreRoot};
pub use walker::{FileInfo, Walker};

use std::path::Path;

/// Relativize a path against a root and normalize separators.
///
/// Strips the `root` prefix if present and converts backslashes to
/// forward slashes; this is the canonical relative-path form used in
/// chunk ids, stored payloads, and exclusion matching.
pub fn rel_display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_rel_display_within_root() {
        let root = Path::new("/home/user/project");
        let path = Path::new("/home/user/project/src/main.rs");
        assert_eq!(rel_display(path, root), "src/main.rs");
    }

    #[test]
    fn test_rel_display_outside_root() {
        let root = Path::new("/home/user/project");
        let path = Path::new("/tmp/other/file.rs");
        assert_eq!(rel_display(path, root), "/tmp/other/file.rs");
    }

    #[test]
    fn test_rel_display_backslash_normalization() {
        let root = Path::new("/home/user/project");
        let path = PathBuf::from("/home/user/project/src\\store\\mod.rs");
        assert_eq!(rel_display(&path, root), "src/store/mod.rs");
    }
}
