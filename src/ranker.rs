//! Hybrid result ranking
//!
//! Fuses three signals with renormalized weights:
//! `final = w_v * cosine + w_b * bm25_norm + w_s * structural`.
//! BM25 runs over code tokens (identifiers split on camelCase and
//! snake_case) with per-kind term weighting: function and class names
//! count double, imports and content identifiers count once. The
//! structural slot is reserved and currently always 0. Ties break by
//! higher cosine, then lexicographic path, then start line.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{Bm25Config, RankerConfig, RankerWeights};
use crate::language::{Language, LanguageFamily};
use crate::store::StoredPayload;

/// Per-repository term statistics backing BM25. Persisted as
/// `term-stats.json`; rebuilt on full index, maintained incrementally
/// on updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermStats {
    /// term -> number of documents containing it
    pub doc_frequency: HashMap<String, u32>,
    pub total_documents: u64,
    /// Sum of document lengths (in terms), for the average
    pub total_term_count: u64,
}

impl TermStats {
    pub fn average_document_length(&self) -> f32 {
        if self.total_documents == 0 {
            return 0.0;
        }
        self.total_term_count as f32 / self.total_documents as f32
    }

    /// Account a document's term multiset.
    pub fn add_document(&mut self, terms: &[String]) {
        let distinct: HashSet<&String> = terms.iter().collect();
        for term in distinct {
            *self.doc_frequency.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_documents += 1;
        self.total_term_count += terms.len() as u64;
    }

    /// Remove a previously added document (incremental deletes).
    pub fn remove_document(&mut self, terms: &[String]) {
        let distinct: HashSet<&String> = terms.iter().collect();
        for term in distinct {
            if let Some(df) = self.doc_frequency.get_mut(term.as_str()) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.doc_frequency.remove(term.as_str());
                }
            }
        }
        self.total_documents = self.total_documents.saturating_sub(1);
        self.total_term_count = self.total_term_count.saturating_sub(terms.len() as u64);
    }
}

/// Split an identifier on underscores, dashes, spaces, and camelCase
/// boundaries; lowercases everything.
pub fn tokenize_identifier(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for c in s.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.push(c.to_lowercase().next().unwrap_or(c));
        } else {
            current.push(c.to_lowercase().next().unwrap_or(c));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Extract lowercase code tokens from arbitrary text: identifiers are
/// pulled out and split on their internal boundaries. Single characters
/// and pure numbers are dropped.
pub fn tokenize_code(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
        } else if !word.is_empty() {
            split_into(&mut tokens, &std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        split_into(&mut tokens, &word);
    }
    tokens
}

fn split_into(tokens: &mut Vec<String>, word: &str) {
    for part in tokenize_identifier(word) {
        if part.len() >= 2 && !part.chars().all(|c| c.is_ascii_digit()) {
            tokens.push(part);
        }
    }
}

static BRACES_STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "fn", "let", "mut", "pub", "return", "if", "else", "for", "while", "match", "struct",
        "impl", "use", "const", "static", "class", "public", "private", "protected", "void",
        "new", "function", "var", "this", "self", "true", "false", "null", "int", "string",
        "bool", "import", "export", "async", "await", "try", "catch",
    ]
    .into_iter()
    .collect()
});

static INDENT_STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "def", "class", "self", "import", "from", "return", "if", "else", "elif", "for",
        "while", "pass", "none", "true", "false", "lambda", "not", "and", "or", "in", "is",
        "with", "as", "try", "except", "end", "do", "require",
    ]
    .into_iter()
    .collect()
});

static DATA_STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["name", "value", "type", "true", "false", "run", "env", "id", "version"]
        .into_iter()
        .collect()
});

fn stop_words(language: Option<Language>) -> &'static HashSet<&'static str> {
    match language.map(|l| l.family()) {
        Some(LanguageFamily::Braces) | None => &BRACES_STOP_WORDS,
        Some(LanguageFamily::Indentation) => &INDENT_STOP_WORDS,
        Some(LanguageFamily::Markup) | Some(LanguageFamily::Flow) => &DATA_STOP_WORDS,
    }
}

/// Weighted term multiset of a document. Function and class names count
/// double; imports and content identifiers count once. Stop words for
/// the document's language family are dropped from content terms but
/// kept in symbol names (a function literally named `main` is signal).
pub fn document_terms(
    content: &str,
    language: Option<Language>,
    function_name: Option<&str>,
    class_name: Option<&str>,
    imports: &[String],
) -> Vec<String> {
    let stops = stop_words(language);
    let mut terms: Vec<String> = tokenize_code(content)
        .into_iter()
        .filter(|t| !stops.contains(t.as_str()))
        .collect();

    for name in [function_name, class_name].into_iter().flatten() {
        let tokens = tokenize_identifier(name);
        for token in tokens {
            if token.len() >= 2 {
                terms.push(token.clone());
                terms.push(token);
            }
        }
    }
    for import in imports {
        terms.extend(tokenize_code(import));
    }
    terms
}

/// Convenience for the index path.
pub fn payload_terms(payload: &StoredPayload) -> Vec<String> {
    document_terms(
        &payload.content,
        payload.language,
        payload.function_name.as_deref(),
        payload.class_name.as_deref(),
        &payload.imports,
    )
}

/// A candidate entering the ranker: vector score plus loaded payload.
#[derive(Debug, Clone)]
pub struct RankerInput {
    pub chunk_id: String,
    pub cosine: f32,
    pub payload: Arc<StoredPayload>,
}

/// A ranked candidate leaving the ranker.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub chunk_id: String,
    /// Fused score in [0, 1]
    pub score: f32,
    pub cosine: f32,
    pub bm25_norm: f32,
    pub payload: Arc<StoredPayload>,
}

pub struct Ranker {
    weights: RankerWeights,
    bm25: Bm25Config,
}

impl Ranker {
    pub fn new(config: &RankerConfig) -> Self {
        Self {
            weights: config.weights,
            bm25: config.bm25,
        }
    }

    /// Weights normalized to sum to 1 (falling back to the defaults
    /// when all three are zero).
    fn normalized_weights(&self) -> (f32, f32, f32) {
        let RankerWeights {
            vector,
            bm25,
            structural,
        } = self.weights;
        let sum = vector + bm25 + structural;
        if sum <= 0.0 {
            let d = RankerWeights::default();
            let sum = d.vector + d.bm25 + d.structural;
            return (d.vector / sum, d.bm25 / sum, d.structural / sum);
        }
        (vector / sum, bm25 / sum, structural / sum)
    }

    /// Fuse component scores (each in [0, 1]) into the final score.
    pub fn fuse(&self, cosine: f32, bm25_norm: f32, structural: f32) -> f32 {
        let (w_v, w_b, w_s) = self.normalized_weights();
        (w_v * cosine + w_b * bm25_norm + w_s * structural).clamp(0.0, 1.0)
    }

    /// Raw BM25 score of one document against the query terms.
    pub fn bm25_score(&self, query_terms: &[String], doc_terms: &[String], stats: &TermStats) -> f32 {
        if query_terms.is_empty() || doc_terms.is_empty() || stats.total_documents == 0 {
            return 0.0;
        }
        let mut tf: HashMap<&str, u32> = HashMap::new();
        for term in doc_terms {
            *tf.entry(term.as_str()).or_insert(0) += 1;
        }
        let dl = doc_terms.len() as f32;
        let avgdl = stats.average_document_length().max(1.0);
        let n = stats.total_documents as f32;
        let k1 = self.bm25.k1;
        let b = self.bm25.b;

        let mut score = 0.0f32;
        for term in query_terms {
            let Some(&freq) = tf.get(term.as_str()) else {
                continue;
            };
            let df = stats.doc_frequency.get(term).copied().unwrap_or(1) as f32;
            // Non-negative idf variant
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            let freq = freq as f32;
            score += idf * (freq * (k1 + 1.0)) / (freq + k1 * (1.0 - b + b * dl / avgdl));
        }
        score.max(0.0)
    }

    /// Rank candidates: BM25 over the query terms, max-normalized
    /// within the candidate set, fused with cosine and the structural
    /// slot, deterministic tie-breaks.
    pub fn rank(
        &self,
        query_terms: &[String],
        candidates: Vec<RankerInput>,
        stats: &TermStats,
    ) -> Vec<Ranked> {
        let raw: Vec<f32> = candidates
            .iter()
            .map(|c| self.bm25_score(query_terms, &payload_terms(&c.payload), stats))
            .collect();
        let max_bm25 = raw.iter().copied().fold(0.0f32, f32::max);

        let mut ranked: Vec<Ranked> = candidates
            .into_iter()
            .zip(raw)
            .map(|(c, bm25)| {
                let bm25_norm = if max_bm25 > 0.0 { bm25 / max_bm25 } else { 0.0 };
                // Structural signal is a reserved slot, always 0 for now
                let score = self.fuse(c.cosine, bm25_norm, 0.0);
                Ranked {
                    chunk_id: c.chunk_id,
                    score,
                    cosine: c.cosine,
                    bm25_norm,
                    payload: c.payload,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.cosine
                        .partial_cmp(&a.cosine)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.payload.relative_path.cmp(&b.payload.relative_path))
                .then_with(|| a.payload.start_line.cmp(&b.payload.start_line))
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ChunkKind;
    use crate::store::PayloadFileMeta;

    fn payload(rel: &str, start_line: u32, content: &str) -> Arc<StoredPayload> {
        Arc::new(StoredPayload {
            chunk_id: crate::hash::content_hash(format!("{rel}:{start_line}").as_bytes()),
            content: content.to_string(),
            file_path: format!("/repo/{rel}"),
            relative_path: rel.to_string(),
            start_line,
            end_line: start_line + 3,
            language: Some(Language::Rust),
            kind: ChunkKind::Function,
            function_name: None,
            class_name: None,
            imports: Vec::new(),
            surrounding_context: None,
            metadata: PayloadFileMeta {
                file_ext: "rs".to_string(),
                size_chars: content.len(),
                estimated_tokens: content.len() / 4,
            },
            provider_id: "local".to_string(),
            model_id: "m".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        })
    }

    fn default_ranker() -> Ranker {
        Ranker::new(&RankerConfig::default())
    }

    #[test]
    fn test_tokenize_identifier_camel_and_snake() {
        assert_eq!(
            tokenize_identifier("parseConfigFile"),
            vec!["parse", "config", "file"]
        );
        assert_eq!(
            tokenize_identifier("load_file_hashes"),
            vec!["load", "file", "hashes"]
        );
    }

    #[test]
    fn test_tokenize_code_drops_noise() {
        let tokens = tokenize_code("fn load_config(path: &Path) -> Result<Config, E> { 42 }");
        assert!(tokens.contains(&"load".to_string()));
        assert!(tokens.contains(&"config".to_string()));
        assert!(tokens.contains(&"path".to_string()));
        assert!(!tokens.contains(&"42".to_string()));
        assert!(!tokens.contains(&"e".to_string()));
    }

    #[test]
    fn test_document_terms_weight_symbols_double() {
        let terms = document_terms(
            "fn run() {}",
            Some(Language::Rust),
            Some("parseConfig"),
            None,
            &[],
        );
        let parse_count = terms.iter().filter(|t| *t == "parse").count();
        assert_eq!(parse_count, 2, "function-name tokens count double");
    }

    #[test]
    fn test_document_terms_filter_stop_words() {
        let terms = document_terms(
            "pub fn return if else while",
            Some(Language::Rust),
            None,
            None,
            &[],
        );
        assert!(terms.is_empty(), "stop words filtered: {terms:?}");
    }

    #[test]
    fn test_term_stats_add_remove_roundtrip() {
        let mut stats = TermStats::default();
        let doc_a = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
        let doc_b = vec!["beta".to_string(), "gamma".to_string()];
        stats.add_document(&doc_a);
        stats.add_document(&doc_b);
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.doc_frequency["alpha"], 1);
        assert_eq!(stats.doc_frequency["beta"], 2);
        assert!((stats.average_document_length() - 2.5).abs() < 1e-6);

        stats.remove_document(&doc_a);
        assert_eq!(stats.total_documents, 1);
        assert!(!stats.doc_frequency.contains_key("alpha"));
        assert_eq!(stats.doc_frequency["beta"], 1);
    }

    #[test]
    fn test_bm25_non_negative_and_monotone_in_tf() {
        let ranker = default_ranker();
        let mut stats = TermStats::default();
        for _ in 0..10 {
            stats.add_document(&["filler".to_string(), "words".to_string()]);
        }
        stats.add_document(&["walker".to_string()]);

        let query = vec!["walker".to_string()];
        let mut previous = -1.0f32;
        for tf in 1..6 {
            let mut doc: Vec<String> = vec!["walker".to_string(); tf];
            doc.extend(std::iter::repeat_n("pad".to_string(), 10));
            let score = ranker.bm25_score(&query, &doc, &stats);
            assert!(score >= 0.0);
            assert!(
                score > previous,
                "BM25 not non-decreasing in tf: {score} after {previous}"
            );
            previous = score;
        }
    }

    #[test]
    fn test_fuse_bounds() {
        let ranker = default_ranker();
        assert!((ranker.fuse(1.0, 1.0, 1.0) - 1.0).abs() < 1e-6);
        assert_eq!(ranker.fuse(0.0, 0.0, 0.0), 0.0);
        let mid = ranker.fuse(0.5, 0.5, 0.0);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_fuse_renormalizes_weights() {
        let ranker = Ranker::new(&RankerConfig {
            weights: RankerWeights {
                vector: 1.4,
                bm25: 0.4,
                structural: 0.2,
            },
            bm25: Bm25Config::default(),
        });
        // 1.4 + 0.4 + 0.2 renormalizes to 0.7 / 0.2 / 0.1
        let score = ranker.fuse(1.0, 0.0, 0.0);
        assert!((score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_ranking_fusion_tie_broken_by_cosine() {
        // Two candidates engineered so fused scores are equal:
        // 0.9*0.7 + 0.1*0.2 = 0.65 and 0.7*0.7 + 0.8*0.2 = 0.65
        let ranker = default_ranker();
        let a = Ranked {
            chunk_id: "a".to_string(),
            score: ranker.fuse(0.9, 0.1, 0.0),
            cosine: 0.9,
            bm25_norm: 0.1,
            payload: payload("src/a.rs", 1, "alpha"),
        };
        let b = Ranked {
            chunk_id: "b".to_string(),
            score: ranker.fuse(0.7, 0.8, 0.0),
            cosine: 0.7,
            bm25_norm: 0.8,
            payload: payload("src/b.rs", 1, "beta"),
        };
        assert!((a.score - 0.65).abs() < 1e-6);
        assert!((b.score - 0.65).abs() < 1e-6);

        // Run the actual sort used by rank()
        let mut ranked = vec![b, a];
        ranked.sort_by(|x, y| {
            y.score
                .partial_cmp(&x.score)
                .unwrap()
                .then_with(|| y.cosine.partial_cmp(&x.cosine).unwrap())
                .then_with(|| x.payload.relative_path.cmp(&y.payload.relative_path))
                .then_with(|| x.payload.start_line.cmp(&y.payload.start_line))
        });
        assert_eq!(ranked[0].chunk_id, "a", "higher cosine wins the tie");
    }

    #[test]
    fn test_rank_end_to_end_prefers_term_match() {
        let ranker = default_ranker();
        let mut stats = TermStats::default();
        let walker_payload = payload("src/walker.rs", 10, "fn discover_files(root) { walk(root) }");
        let store_payload = payload("src/store.rs", 20, "fn save_metadata(meta) { persist(meta) }");
        stats.add_document(&payload_terms(&walker_payload));
        stats.add_document(&payload_terms(&store_payload));

        // Equal cosine; BM25 must separate them on the query terms
        let ranked = ranker.rank(
            &tokenize_code("discover files in the walker"),
            vec![
                RankerInput {
                    chunk_id: "store".to_string(),
                    cosine: 0.5,
                    payload: store_payload,
                },
                RankerInput {
                    chunk_id: "walker".to_string(),
                    cosine: 0.5,
                    payload: walker_payload,
                },
            ],
            &stats,
        );
        assert_eq!(ranked[0].chunk_id, "walker");
        assert!(ranked[0].score > ranked[1].score);
        for r in &ranked {
            assert!((0.0..=1.0).contains(&r.score));
        }
    }

    #[test]
    fn test_rank_deterministic_on_identical_scores() {
        let ranker = default_ranker();
        let stats = TermStats::default();
        let ranked = ranker.rank(
            &[],
            vec![
                RankerInput {
                    chunk_id: "b".to_string(),
                    cosine: 0.5,
                    payload: payload("src/b.rs", 5, "same"),
                },
                RankerInput {
                    chunk_id: "a".to_string(),
                    cosine: 0.5,
                    payload: payload("src/a.rs", 9, "same"),
                },
            ],
            &stats,
        );
        // Same score and cosine: path breaks the tie
        assert_eq!(ranked[0].payload.relative_path, "src/a.rs");
    }
}
