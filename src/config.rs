/// Configuration module for newsrag.
///
/// Handles loading, validating, and providing default configuration values.
/// API keys never live in the file: provider sections name the environment
/// variable that holds them.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_db_path() -> String {
    "./newsrag.db".to_string()
}

fn default_chunk_size() -> usize {
    200
}

fn default_search_top_k() -> usize {
    3
}

fn default_history_window() -> usize {
    5
}

fn default_session_backend() -> SessionBackendKind {
    SessionBackendKind::Sqlite
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_dimensions() -> usize {
    768
}

fn default_rss_url() -> String {
    "https://www.firstpost.com/commonfeeds/v1/mfp/rss/india.xml".to_string()
}

fn default_initial_limit() -> usize {
    50
}

fn default_refresh_limit() -> usize {
    20
}

fn default_min_content_chars() -> usize {
    100
}

fn default_feed_timeout_secs() -> u64 {
    15
}

fn default_check_interval_secs() -> u64 {
    60 * 60
}

fn default_min_age_secs() -> u64 {
    4 * 60 * 60
}

fn default_embedding_url() -> String {
    "https://api.jina.ai/v1/embeddings".to_string()
}

fn default_embedding_model() -> String {
    "jina-embeddings-v2-base-en".to_string()
}

fn default_embedding_key_env() -> String {
    "JINA_API_KEY".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_embedding_timeout_secs() -> u64 {
    10
}

fn default_generation_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_generation_model() -> String {
    "llama3-8b-8192".to_string()
}

fn default_generation_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    5
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Allowed CORS origins; `"*"` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// SQLite file shared by the session backend and the persistent index.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Chunk window size, in words.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    /// Number of trailing history messages handed to the generator.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackendKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_backend")]
    pub backend: SessionBackendKind,

    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    /// Keep chunks in `db_path` instead of process memory.
    #[serde(default)]
    pub persist: bool,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_rss_url")]
    pub rss_url: String,

    /// Read articles from a saved JSON array instead of the RSS feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub articles_path: Option<String>,

    /// Write every successful RSS fetch to this JSON file, in the format
    /// `articles_path` reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,

    #[serde(default = "default_initial_limit")]
    pub initial_limit: usize,

    #[serde(default = "default_refresh_limit")]
    pub refresh_limit: usize,

    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub api_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub api_url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_origins: default_cors_origins(),
            db_path: default_db_path(),
            chunk_size: default_chunk_size(),
            search_top_k: default_search_top_k(),
            history_window: default_history_window(),
            session: SessionConfig::default(),
            index: IndexConfig::default(),
            feed: FeedConfig::default(),
            refresh: RefreshConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist: false,
            dimensions: default_dimensions(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rss_url: default_rss_url(),
            articles_path: None,
            save_path: None,
            initial_limit: default_initial_limit(),
            refresh_limit: default_refresh_limit(),
            min_content_chars: default_min_content_chars(),
            timeout_secs: default_feed_timeout_secs(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            min_age_secs: default_min_age_secs(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: default_embedding_url(),
            model: default_embedding_model(),
            api_key_env: default_embedding_key_env(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: default_generation_url(),
            model: default_generation_model(),
            api_key_env: default_generation_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and
    /// generates a template file for the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(self.history_window > 0, "history_window must be positive");
        anyhow::ensure!(
            self.index.dimensions > 0,
            "index.dimensions must be positive"
        );
        anyhow::ensure!(self.session.ttl_secs > 0, "session.ttl_secs must be positive");
        anyhow::ensure!(
            self.feed.initial_limit > 0 && self.feed.refresh_limit > 0,
            "feed limits must be positive"
        );
        anyhow::ensure!(
            self.embedding.batch_size > 0,
            "embedding.batch_size must be positive"
        );
        anyhow::ensure!(
            self.refresh.check_interval_secs > 0,
            "refresh.check_interval_secs must be positive"
        );
        Ok(())
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_secs)
    }
}

/// Read an API key from the environment variable named in a provider section.
///
/// Empty values count as missing.
#[must_use]
pub fn api_key_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size, 200);
        assert_eq!(cfg.search_top_k, 3);
        assert_eq!(cfg.history_window, 5);
        assert_eq!(cfg.session.ttl_secs, 86_400);
        assert_eq!(cfg.session.backend, SessionBackendKind::Sqlite);
        assert_eq!(cfg.feed.initial_limit, 50);
        assert_eq!(cfg.feed.refresh_limit, 20);
        assert_eq!(cfg.refresh.check_interval_secs, 3_600);
        assert_eq!(cfg.refresh.min_age_secs, 14_400);
        assert!(!cfg.index.persist);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut cfg = Config::default();
        cfg.chunk_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.search_top_k = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.index.dimensions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.search_top_k, 3);
        // Templates are only generated for the default path
        assert!(!path.exists());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"chunk_size": 50, "session": {"backend": "memory"}, "index": {"persist": true}}"#,
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.chunk_size, 50);
        assert_eq!(cfg.session.backend, SessionBackendKind::Memory);
        assert_eq!(cfg.session.ttl_secs, 86_400);
        assert!(cfg.index.persist);
        assert_eq!(cfg.index.dimensions, 768);
    }

    #[test]
    fn test_load_invalid_json_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.chunk_size, 200);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let mut cfg = Config::default();
        cfg.feed.articles_path = Some("articles.json".to_string());
        cfg.feed.save_path = Some("snapshot.json".to_string());
        cfg.save(path.to_str().unwrap()).unwrap();

        let loaded = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.feed.articles_path.as_deref(), Some("articles.json"));
        assert_eq!(loaded.feed.save_path.as_deref(), Some("snapshot.json"));
        assert!(Config::default().feed.save_path.is_none());
    }

    #[test]
    fn test_api_key_missing_var() {
        assert!(api_key_from_env("NEWSRAG_TEST_SURELY_UNSET_VAR").is_none());
    }
}
