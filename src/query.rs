//! Query orchestration
//!
//! Embeds the query text (size-1 pipeline through the rate limiter,
//! with an LRU cache for repeated queries), fetches candidates from
//! every store in scope, re-ranks once globally with the hybrid
//! ranker, loads payloads, and assembles results.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::analyzer::ChunkKind;
use crate::config::{Config, RankerConfig, RankerWeights};
use crate::error::Error;
use crate::indexer::rebuild_term_stats;
use crate::language::Language;
use crate::limiter::RateLimiter;
use crate::pipeline::{embed_single, PipelineError};
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::ranker::{tokenize_code, Ranker, RankerInput, TermStats};
use crate::store::{RepoStore, StoreError, StoreRoot, SurroundingContext};

/// Cached query embeddings per manager.
const QUERY_CACHE_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("scope not found: {0}")]
    ScopeNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("query text is empty")]
    EmptyQuery,
}

/// Which repositories a query runs against.
#[derive(Debug, Clone)]
pub enum Scope {
    /// The repository rooted at this path (the caller's working copy)
    Repo(PathBuf),
    /// A named collection of repository aliases
    Set(String),
    /// Every known repository
    All,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub k: usize,
    /// Candidates fetched per repository = `k * candidate_multiplier`
    pub candidate_multiplier: usize,
    /// Override the configured fusion weights
    pub ranker_weights: Option<RankerWeights>,
    /// Keep only chunks of this language
    pub language: Option<Language>,
    /// Drop results scoring below this
    pub min_score: Option<f32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            k: 8,
            candidate_multiplier: 4,
            ranker_weights: None,
            language: None,
            min_score: None,
        }
    }
}

/// One ranked snippet.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    /// Fused score in [0, 1]
    pub score: f32,
    pub content: String,
    pub file_path: String,
    pub relative_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: Option<Language>,
    pub kind: ChunkKind,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    pub surrounding_context: Option<SurroundingContext>,
    /// Alias of the repository the snippet came from
    pub repo_alias: String,
    pub provider_id: String,
    pub model_id: String,
}

pub struct QueryManager {
    store_root: StoreRoot,
    provider: Arc<dyn EmbeddingProvider>,
    config: Config,
    limiter: RateLimiter,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl QueryManager {
    pub fn new(store_root: StoreRoot, provider: Arc<dyn EmbeddingProvider>, config: Config) -> Self {
        let limiter = RateLimiter::new(&provider.limits(), 2);
        Self {
            store_root,
            provider,
            config,
            limiter,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    pub async fn query(
        &self,
        scope: Scope,
        text: &str,
        options: QueryOptions,
    ) -> Result<Vec<SearchResult>, Error> {
        self.query_with(scope, text, options, CancellationToken::new())
            .await
    }

    pub async fn query_with(
        &self,
        scope: Scope,
        text: &str,
        options: QueryOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<SearchResult>, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Query(QueryError::EmptyQuery));
        }

        let (stores, strict) = self.resolve_scope(&scope)?;
        if stores.is_empty() {
            tracing::info!("No repositories in scope, returning empty result list");
            return Ok(Vec::new());
        }

        let query_vector = self.embed_query(text, &cancel).await?;
        let fetch = options.k.max(1) * options.candidate_multiplier.max(1);

        // ── Candidate fetch per repository ──────────────────────────
        let mut inputs: Vec<RankerInput> = Vec::new();
        let mut origin: HashMap<String, String> = HashMap::new();
        let mut merged_stats = TermStats::default();
        for store in &stores {
            let meta = store.metadata().map_err(QueryError::Store)?;
            let candidates = match store.query(&query_vector, fetch) {
                Ok(c) => c,
                Err(e @ StoreError::DimensionMismatch { .. }) if !strict => {
                    // A multi-repo scope tolerates stores embedded in a
                    // different vector space; they just cannot match
                    tracing::warn!(alias = %meta.alias, error = %e, "Skipping repository with incompatible embeddings");
                    continue;
                }
                Err(e) => return Err(Error::Query(QueryError::Store(e))),
            };
            if candidates.is_empty() {
                tracing::debug!(alias = %meta.alias, "Repository store has no matching embeddings");
                continue;
            }

            let stats = match store.load_term_stats().map_err(QueryError::Store)? {
                Some(stats) => stats,
                None => rebuild_term_stats(store).map_err(QueryError::Store)?,
            };
            merge_stats(&mut merged_stats, stats);

            for candidate in candidates {
                let payload = match store.load_payload(&candidate.chunk_id) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(chunk_id = %candidate.chunk_id, error = %e, "Candidate payload missing, skipping");
                        continue;
                    }
                };
                if let Some(wanted) = options.language {
                    if payload.language != Some(wanted) {
                        continue;
                    }
                }
                origin.insert(candidate.chunk_id.clone(), meta.alias.clone());
                inputs.push(RankerInput {
                    chunk_id: candidate.chunk_id,
                    cosine: candidate.score,
                    payload,
                });
            }
        }

        if inputs.is_empty() {
            tracing::info!(query = %text, "No candidates in scope (empty or filtered-out stores)");
            return Ok(Vec::new());
        }

        // ── One global re-rank ──────────────────────────────────────
        let ranker_config = RankerConfig {
            weights: options.ranker_weights.unwrap_or(self.config.ranker.weights),
            bm25: self.config.ranker.bm25,
        };
        let ranker = Ranker::new(&ranker_config);
        let query_terms = tokenize_code(text);
        let ranked = ranker.rank(&query_terms, inputs, &merged_stats);

        let min_score = options.min_score.unwrap_or(0.0);
        let results = ranked
            .into_iter()
            .filter(|r| r.score >= min_score)
            .take(options.k.max(1))
            .map(|r| {
                let payload = r.payload;
                SearchResult {
                    repo_alias: origin.get(&r.chunk_id).cloned().unwrap_or_default(),
                    chunk_id: r.chunk_id,
                    score: r.score,
                    content: payload.content.clone(),
                    file_path: payload.file_path.clone(),
                    relative_path: payload.relative_path.clone(),
                    start_line: payload.start_line,
                    end_line: payload.end_line,
                    language: payload.language,
                    kind: payload.kind,
                    function_name: payload.function_name.clone(),
                    class_name: payload.class_name.clone(),
                    surrounding_context: payload.surrounding_context.clone(),
                    provider_id: payload.provider_id.clone(),
                    model_id: payload.model_id.clone(),
                }
            })
            .collect();
        Ok(results)
    }

    /// Resolve a scope to concrete stores. The bool marks strict mode:
    /// single-repo scopes propagate store errors instead of skipping.
    fn resolve_scope(&self, scope: &Scope) -> Result<(Vec<RepoStore>, bool), QueryError> {
        match scope {
            Scope::Repo(path) => {
                let store = self
                    .store_root
                    .open_repo(path)
                    .map_err(QueryError::Store)?
                    .ok_or_else(|| QueryError::ScopeNotFound(path.display().to_string()))?;
                Ok((vec![store], true))
            }
            Scope::Set(name) => {
                let sets = self.store_root.load_sets().map_err(QueryError::Store)?;
                let aliases = sets
                    .get(name)
                    .ok_or_else(|| QueryError::ScopeNotFound(format!("set:{name}")))?;
                if aliases.is_empty() {
                    return Err(QueryError::ScopeNotFound(format!("set:{name} (empty)")));
                }
                let mut stores = Vec::new();
                for alias in aliases {
                    match self.store_root.find_by_alias(alias).map_err(QueryError::Store)? {
                        Some(store) => stores.push(store),
                        None => {
                            tracing::warn!(alias = %alias, set = %name, "Alias in set has no store, skipping")
                        }
                    }
                }
                if stores.is_empty() {
                    return Err(QueryError::ScopeNotFound(format!(
                        "set:{name} (no stores resolved)"
                    )));
                }
                Ok((stores, false))
            }
            Scope::All => {
                let mut stores = Vec::new();
                for meta in self.store_root.list().map_err(QueryError::Store)? {
                    if let Some(store) =
                        self.store_root.find(&meta.repo_id).map_err(QueryError::Store)?
                    {
                        stores.push(store);
                    }
                }
                Ok((stores, false))
            }
        }
    }

    /// Embed the query, serving repeats from the LRU cache.
    async fn embed_query(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, Error> {
        {
            let mut cache = self.query_cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(vector) = cache.get(text) {
                return Ok(vector.clone());
            }
        }
        let vector = embed_single(&self.provider, &self.limiter, text, cancel)
            .await
            .map_err(|e| match e {
                PipelineError::Provider(p) => Error::Provider(p),
                PipelineError::Cancelled => Error::Cancelled,
            })?;
        self.query_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .put(text.to_string(), vector.clone());
        Ok(vector)
    }
}

/// Fold one repository's statistics into the merged view used for the
/// global re-rank.
fn merge_stats(into: &mut TermStats, other: TermStats) {
    for (term, df) in other.doc_frequency {
        *into.doc_frequency.entry(term).or_insert(0) += df;
    }
    into.total_documents += other.total_documents;
    into.total_term_count += other.total_term_count;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_stats() {
        let mut a = TermStats::default();
        a.add_document(&["alpha".to_string(), "beta".to_string()]);
        let mut b = TermStats::default();
        b.add_document(&["beta".to_string()]);
        b.add_document(&["gamma".to_string()]);

        merge_stats(&mut a, b);
        assert_eq!(a.total_documents, 3);
        assert_eq!(a.doc_frequency["beta"], 2);
        assert_eq!(a.doc_frequency["alpha"], 1);
        assert_eq!(a.doc_frequency["gamma"], 1);
    }

    #[test]
    fn test_default_query_options() {
        let options = QueryOptions::default();
        assert_eq!(options.k, 8);
        assert_eq!(options.candidate_multiplier, 4);
        assert!(options.min_score.is_none());
    }
}
