//! Configuration surface consumed by the core
//!
//! Config files are TOML, loaded in order (later overrides earlier):
//! 1. `~/.config/codesift/config.toml` (user defaults)
//! 2. `.codesift.toml` in the project root (project overrides)
//!
//! Environment-variable overrides are the hosting CLI's responsibility;
//! the core only consumes the resolved structure. Every option has a
//! documented default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("provider '{0}' is not configured or not enabled")]
    UnknownProvider(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transport a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote OpenAI-compatible `/v1/embeddings` endpoint
    #[default]
    Remote,
    /// Local HTTP endpoint (Ollama-style `/api/embed`)
    Local,
}

/// Rate limits a provider declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
    pub concurrent_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 300,
            tokens_per_minute: 500_000,
            concurrent_requests: 4,
        }
    }
}

/// Binding for one embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the endpoint (e.g. `https://api.openai.com` or
    /// `http://localhost:11434`)
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub max_tokens_per_request: usize,
    pub recommended_batch_size: usize,
    pub rate_limit: RateLimitConfig,
    /// Name of the environment variable holding the API key, resolved
    /// by the hosting CLI. Empty means no auth header.
    pub api_key_env: String,
    pub enabled: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Local,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            max_tokens_per_request: 8192,
            recommended_batch_size: 32,
            rate_limit: RateLimitConfig::default(),
            api_key_env: String::new(),
            enabled: true,
            timeout_secs: 60,
        }
    }
}

/// Indexing performance knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Embedding batches in flight
    pub concurrency: usize,
    /// Batch size hint (floor for the adaptive batcher)
    pub batch_size: usize,
    /// Soft memory bound in megabytes for buffered chunks
    pub memory_limit_mb: usize,
    /// Chunker target size in characters
    pub chunk_size: usize,
    /// Overlap ratio between successive chunks, 0.0..=0.5
    pub chunk_overlap: f32,
    /// Walker file size cap in bytes
    pub max_file_size: u64,
    /// Directory-walk workers
    pub walk_workers: usize,
    pub adaptive_batching: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 8,
            memory_limit_mb: 256,
            chunk_size: 1500,
            chunk_overlap: 0.1,
            max_file_size: 1_048_576,
            walk_workers: 4,
            adaptive_batching: true,
        }
    }
}

/// File exclusion rules applied by the walker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Glob patterns matched against forward-slash relative paths
    pub patterns: Vec<String>,
    /// Extensions excluded outright (no leading dot)
    pub extensions: Vec<String>,
    /// Directory names excluded at any depth
    pub directories: Vec<String>,
    pub max_file_size: u64,
    pub min_file_size: u64,
    /// Drop the built-in exclusion set and use only the lists above
    pub no_defaults: bool,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            extensions: Vec::new(),
            directories: Vec::new(),
            max_file_size: 1_048_576,
            min_file_size: 1,
            no_defaults: false,
        }
    }
}

/// Ranker fusion weights; renormalized to sum to 1 at use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerWeights {
    pub vector: f32,
    pub bm25: f32,
    pub structural: f32,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            bm25: 0.2,
            structural: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub weights: RankerWeights,
    pub bm25: Bm25Config,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
}

/// Where repository stores live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory; repositories live under `<base>/repos/`
    pub base_directory: PathBuf,
    pub compression: CompressionConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codesift");
        Self {
            base_directory: base,
            compression: CompressionConfig::default(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider id selected when the caller does not name one
    pub default_provider: String,
    pub providers: HashMap<String, ProviderConfig>,
    pub performance: PerformanceConfig,
    pub exclusions: ExclusionConfig,
    pub ranker: RankerConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("local".to_string(), ProviderConfig::default());
        Self {
            default_provider: "local".to_string(),
            providers,
            performance: PerformanceConfig::default(),
            exclusions: ExclusionConfig::default(),
            ranker: RankerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration, layering the project file over the user file.
    /// Missing files are fine; malformed files are errors (a half-read
    /// config silently changing exclusions is worse than failing).
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(user_path) = dirs::config_dir().map(|d| d.join("codesift/config.toml")) {
            if let Some(user) = Self::load_file(&user_path)? {
                config = config.override_with(user);
            }
        }

        let project_path = project_root.join(".codesift.toml");
        if let Some(project) = Self::load_file(&project_path)? {
            config = config.override_with(project);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a single config file. `Ok(None)` when the file is absent.
    pub fn load_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(
            path = %path.display(),
            default_provider = %config.default_provider,
            providers = config.providers.len(),
            "Loaded config"
        );
        Ok(Some(config))
    }

    /// Layer another config on top; `other`'s providers replace
    /// same-named entries and append new ones, scalar sections are
    /// taken wholesale from `other`.
    fn override_with(mut self, other: Self) -> Self {
        for (id, provider) in other.providers {
            self.providers.insert(id, provider);
        }
        Config {
            default_provider: other.default_provider,
            providers: self.providers,
            performance: other.performance,
            exclusions: other.exclusions,
            ranker: other.ranker,
            storage: other.storage,
        }
    }

    /// Reject configurations the core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let provider = self.provider(&self.default_provider)?;
        if provider.dimensions == 0 {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' declares zero dimensions",
                self.default_provider
            )));
        }
        if !(0.0..=0.5).contains(&self.performance.chunk_overlap) {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap {} outside 0.0..=0.5",
                self.performance.chunk_overlap
            )));
        }
        if self.performance.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        Ok(())
    }

    /// Look up an enabled provider binding by id.
    pub fn provider(&self, id: &str) -> Result<&ProviderConfig, ConfigError> {
        self.providers
            .get(id)
            .filter(|p| p.enabled)
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "local");
        assert!((config.ranker.weights.vector - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_file(&dir.path().join("nope.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_malformed_toml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".codesift.toml");
        std::fs::write(&path, "not valid [[[").unwrap();
        assert!(matches!(
            Config::load_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".codesift.toml");
        std::fs::write(
            &path,
            r#"
[performance]
concurrency = 8
"#,
        )
        .unwrap();

        let config = Config::load_file(&path).unwrap().unwrap();
        assert_eq!(config.performance.concurrency, 8);
        // Untouched sections fall back to defaults
        assert_eq!(config.performance.chunk_size, 1500);
        assert!((config.ranker.bm25.k1 - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_provider_lookup_respects_enabled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".codesift.toml");
        std::fs::write(
            &path,
            r#"
default_provider = "remote"

[providers.remote]
kind = "remote"
base_url = "https://api.example.com"
model = "embed-3"
dimensions = 1536
enabled = false
"#,
        )
        .unwrap();

        let config = Config::load_file(&path).unwrap().unwrap();
        assert!(matches!(
            config.provider("remote"),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_overlap() {
        let mut config = Config::default();
        config.performance.chunk_overlap = 0.9;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_override_replaces_providers_by_id() {
        let base = Config::default();
        let mut project = Config::default();
        project.providers.get_mut("local").unwrap().model = "other-model".to_string();
        project.providers.insert(
            "remote".to_string(),
            ProviderConfig {
                kind: ProviderKind::Remote,
                ..ProviderConfig::default()
            },
        );

        let merged = base.override_with(project);
        assert_eq!(merged.providers.len(), 2);
        assert_eq!(merged.providers["local"].model, "other-model");
    }
}
