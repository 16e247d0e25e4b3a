//! Persisted store types
//!
//! Everything serialized under a repository directory lives here:
//! repository metadata (with the store state machine), the payload
//! schema, and the index entries that define the live chunk set.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::analyzer::{ChunkKind, ChunkMetadata};
use crate::language::Language;
use crate::pipeline::EmbeddedChunk;

/// Bumped on any persisted-schema change; a mismatch forces re-index,
/// never silent migration.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("vector has {actual} dimensions, store expects {expected}; re-index required")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("store was built with {stored}, run uses {current}; re-index required")]
    ProviderMismatch { stored: String, current: String },
    #[error("store schema is v{found}, this build expects v{expected}; re-index required")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("repository store is locked by pid {pid}")]
    Locked { pid: u32 },
    #[error("repository store is corrupt: {reason}; run repair to rebuild")]
    Corrupt { reason: String },
    #[error("not found in store: {0}")]
    NotFound(String),
}

/// Store lifecycle. Persisted in `metadata.json` so an aborted run is
/// visible to the next opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    #[default]
    Initialized,
    Indexing,
    Corrupt,
}

/// One record per repository store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub schema_version: u32,
    /// Content-addressable hash of the canonicalized root
    pub repo_id: String,
    /// Human label; part of the store directory name
    pub alias: String,
    /// Canonicalized repository root this store indexes
    pub root: PathBuf,
    pub created_at: String,
    pub last_indexed_at: Option<String>,
    pub provider_id: String,
    pub model_id: String,
    pub dimensions: usize,
    pub total_chunks: u64,
    pub total_files: u64,
    pub state: StoreState,
}

/// Entry in `index.json`; defines the live chunk set and feeds
/// path-based deletion without touching payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub relative_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    pub kind: ChunkKind,
}

/// Surrounding-context block of the payload schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurroundingContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadFileMeta {
    pub file_ext: String,
    pub size_chars: usize,
    pub estimated_tokens: usize,
}

/// The stable payload schema written to `payloads/<chunkId>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPayload {
    pub chunk_id: String,
    pub content: String,
    pub file_path: String,
    pub relative_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surrounding_context: Option<SurroundingContext>,
    pub metadata: PayloadFileMeta,
    pub provider_id: String,
    pub model_id: String,
    pub created_at: String,
}

impl StoredPayload {
    pub fn from_embedded(embedded: &EmbeddedChunk) -> Self {
        let chunk = &embedded.chunk;
        let meta: &ChunkMetadata = &embedded.metadata;
        let surrounding = if meta.context_before.is_some() || meta.context_after.is_some() {
            Some(SurroundingContext {
                before: meta.context_before.clone(),
                after: meta.context_after.clone(),
            })
        } else {
            None
        };
        let file_ext = std::path::Path::new(&chunk.relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        StoredPayload {
            chunk_id: chunk.chunk_id.clone(),
            content: chunk.content.clone(),
            file_path: chunk.absolute_path.to_string_lossy().replace('\\', "/"),
            relative_path: chunk.relative_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            language: meta.language,
            kind: meta.kind,
            function_name: meta.function_name.clone(),
            class_name: meta.class_name.clone(),
            imports: meta.imports.clone(),
            surrounding_context: surrounding,
            metadata: PayloadFileMeta {
                file_ext,
                size_chars: chunk.size_chars,
                estimated_tokens: chunk.estimated_tokens,
            },
            provider_id: embedded.provider_id.clone(),
            model_id: embedded.model_id.clone(),
            created_at: embedded.created_at.clone(),
        }
    }

    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            relative_path: self.relative_path.clone(),
            language: self.language,
            kind: self.kind,
        }
    }
}

/// A scored candidate from the vector scan, before ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    /// Cosine similarity clamped to [0, 1]
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;

    fn embedded_fixture() -> EmbeddedChunk {
        let content = "fn demo() {}\n".to_string();
        EmbeddedChunk {
            chunk: Chunk {
                chunk_id: crate::hash::content_hash(b"demo-chunk"),
                relative_path: "src/demo.rs".to_string(),
                absolute_path: PathBuf::from("/repo/src/demo.rs"),
                start_line: 1,
                end_line: 1,
                size_chars: content.chars().count(),
                estimated_tokens: 4,
                ordinal: 0,
                content,
            },
            metadata: crate::analyzer::analyze(
                "fn demo() {}\n",
                Some(Language::Rust),
                "src/demo.rs",
            ),
            vector: vec![0.1, 0.2, 0.3, 0.4],
            provider_id: "local".to_string(),
            model_id: "test-model".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_payload_from_embedded() {
        let payload = StoredPayload::from_embedded(&embedded_fixture());
        assert_eq!(payload.relative_path, "src/demo.rs");
        assert_eq!(payload.kind, ChunkKind::Function);
        assert_eq!(payload.function_name.as_deref(), Some("demo"));
        assert_eq!(payload.metadata.file_ext, "rs");
        assert_eq!(payload.provider_id, "local");
    }

    #[test]
    fn test_payload_serializes_kind_as_type() {
        let payload = StoredPayload::from_embedded(&embedded_fixture());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "function");
        assert!(json.get("kind").is_none());
        // Absent optionals stay out of the JSON entirely
        assert!(json.get("surrounding_context").is_none());
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = StoredPayload::from_embedded(&embedded_fixture());
        let json = serde_json::to_string(&payload).unwrap();
        let back: StoredPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunk_id, payload.chunk_id);
        assert_eq!(back.kind, payload.kind);
        assert_eq!(back.start_line, payload.start_line);
    }

    #[test]
    fn test_store_state_serialization() {
        let meta = RepositoryMetadata {
            schema_version: SCHEMA_VERSION,
            repo_id: "abc".to_string(),
            alias: "repo".to_string(),
            root: PathBuf::from("/repo"),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            last_indexed_at: None,
            provider_id: "local".to_string(),
            model_id: "m".to_string(),
            dimensions: 4,
            total_chunks: 0,
            total_files: 0,
            state: StoreState::Indexing,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["state"], "indexing");
    }
}
