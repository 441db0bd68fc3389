//! Configuration management for the mentor memory engine.
//!
//! Configuration lives in a single JSON file at `~/.mentor/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (MENTOR_* prefix)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `OPENAI_API_KEY` / `MENTOR_OPENAI_API_KEY` → embedding.api_key
//! - `MENTOR_QDRANT_URL` → index.url
//! - `MENTOR_DATA_DIR` → store.data_dir

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".mentor"),
        |dirs| dirs.home_dir().join(".mentor"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Embedding Configuration
// ============================================================================

/// Embedding provider configuration.
///
/// `provider` selects the encoder variant chosen once at process start:
/// `"openai"` for the model-backed encoder (downgrades to the hash
/// fallback when unavailable) or `"hash"` to run the deterministic
/// fallback directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider selection: "openai" or "hash"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model name for the model-backed provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension D. Must match the model's native output size
    /// when the model-backed provider is selected.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// API key for the model-backed provider
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            api_key: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_dimension() -> usize {
    1536
}

// ============================================================================
// Vector Index Configuration
// ============================================================================

/// Vector index backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Backend selection: "qdrant" or "embedded"
    #[serde(default = "default_index_backend")]
    pub backend: String,

    /// Qdrant server URL. Left unset in the file, the environment
    /// (`MENTOR_QDRANT_URL`) and then the built-in default fill it; an
    /// explicit file value always wins.
    #[serde(default)]
    pub url: Option<String>,

    /// Collection name
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Per-call timeout for index operations, in milliseconds.
    /// On timeout, retrieval degrades to a recency-only ranking.
    #[serde(default = "default_index_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: None,
            collection: default_collection(),
            timeout_ms: default_index_timeout_ms(),
        }
    }
}

impl IndexConfig {
    /// Resolve the effective backend URL.
    pub fn url(&self) -> String {
        self.url.clone().unwrap_or_else(default_qdrant_url)
    }
}

fn default_index_backend() -> String {
    "qdrant".into()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_collection() -> String {
    "mentor_memories".into()
}

fn default_index_timeout_ms() -> u64 {
    3000
}

// ============================================================================
// Relational Store Configuration
// ============================================================================

/// Relational store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Data directory. The SQLite database is created at
    /// `{data_dir}/memory/mentor.db`. Defaults to `~/.mentor`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(config_dir)
    }
}

// ============================================================================
// Ranking Configuration
// ============================================================================

/// Per-category ranking boosts applied as the `w_cat` term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBoosts {
    #[serde(default = "default_boost_goal")]
    pub goal: f32,
    #[serde(default = "default_boost_habit")]
    pub habit: f32,
    #[serde(default = "default_boost_struggle")]
    pub struggle: f32,
    #[serde(default = "default_boost_achievement")]
    pub achievement: f32,
    #[serde(default = "default_boost_general")]
    pub general: f32,
    #[serde(default = "default_boost_reflection")]
    pub reflection: f32,
}

impl Default for CategoryBoosts {
    fn default() -> Self {
        Self {
            goal: default_boost_goal(),
            habit: default_boost_habit(),
            struggle: default_boost_struggle(),
            achievement: default_boost_achievement(),
            general: default_boost_general(),
            reflection: default_boost_reflection(),
        }
    }
}

fn default_boost_goal() -> f32 {
    1.0
}
fn default_boost_habit() -> f32 {
    0.6
}
fn default_boost_struggle() -> f32 {
    0.8
}
fn default_boost_achievement() -> f32 {
    0.8
}
fn default_boost_general() -> f32 {
    0.2
}
fn default_boost_reflection() -> f32 {
    0.4
}

/// Composite ranking configuration.
///
/// Composite score = `w_sim * cosine + w_rec * 2^(-age/half_life)
/// + w_cat * category_boost`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Weight for vector similarity (w_sim)
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,

    /// Weight for recency decay (w_rec)
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    /// Weight for category boost (w_cat)
    #[serde(default = "default_category_weight")]
    pub category_weight: f32,

    /// Recency half-life in days. The recency term halves every
    /// `half_life_days` of age.
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f32,

    /// Cosine similarity above which two memories count as
    /// near-duplicates; the most recent one is kept.
    #[serde(default = "default_dedupe_threshold")]
    pub dedupe_threshold: f32,

    /// Default context size N
    #[serde(default = "default_context_size")]
    pub context_size: usize,

    /// Candidate pool multiplier: the index is queried for K = N * this
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Per-category boosts
    #[serde(default)]
    pub boosts: CategoryBoosts,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            similarity_weight: default_similarity_weight(),
            recency_weight: default_recency_weight(),
            category_weight: default_category_weight(),
            half_life_days: default_half_life_days(),
            dedupe_threshold: default_dedupe_threshold(),
            context_size: default_context_size(),
            candidate_multiplier: default_candidate_multiplier(),
            boosts: CategoryBoosts::default(),
        }
    }
}

fn default_similarity_weight() -> f32 {
    0.6
}
fn default_recency_weight() -> f32 {
    0.3
}
fn default_category_weight() -> f32 {
    0.1
}
fn default_half_life_days() -> f32 {
    14.0
}
fn default_dedupe_threshold() -> f32 {
    0.95
}
fn default_context_size() -> usize {
    10
}
fn default_candidate_multiplier() -> usize {
    5
}

// ============================================================================
// Reflection Configuration
// ============================================================================

/// Reflection bundle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Lookback window in days for goals/habits and conversations
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Bounded count of recent conversation turns in the bundle
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    /// Number of theme memories retrieved for the bundle
    #[serde(default = "default_theme_count")]
    pub theme_count: usize,

    /// Bundle size budget in characters. Lowest-ranked theme items are
    /// dropped first when over budget; goals/habits are always kept.
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    /// Synthetic query used to retrieve period themes
    #[serde(default = "default_theme_query")]
    pub theme_query: String,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            max_conversations: default_max_conversations(),
            theme_count: default_theme_count(),
            budget_chars: default_budget_chars(),
            theme_query: default_theme_query(),
        }
    }
}

fn default_lookback_days() -> u32 {
    7
}
fn default_max_conversations() -> usize {
    10
}
fn default_theme_count() -> usize {
    5
}
fn default_budget_chars() -> usize {
    4000
}
fn default_theme_query() -> String {
    "goals progress struggles achievements themes of this period".into()
}

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Top-level configuration for the mentor memory engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MentorConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub reflection: ReflectionConfig,
}

impl MentorConfig {
    /// Load configuration from the default path, applying environment
    /// overrides and validating the result.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(config_path())
    }

    /// Load configuration from an explicit path. A missing file yields
    /// the defaults.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?
        } else {
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Fill gaps from environment variables.
    pub fn apply_env(&mut self) {
        if self.embedding.api_key.is_none() {
            self.embedding.api_key = std::env::var("MENTOR_OPENAI_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }
        if self.index.url.is_none() {
            if let Ok(url) = std::env::var("MENTOR_QDRANT_URL") {
                self.index.url = Some(url);
            }
        }
        if self.store.data_dir.is_none() {
            if let Ok(dir) = std::env::var("MENTOR_DATA_DIR") {
                self.store.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Validate configured values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimension must be non-zero".into(),
            ));
        }
        match self.embedding.provider.as_str() {
            "openai" | "hash" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown embedding provider '{other}' (expected 'openai' or 'hash')"
                )));
            }
        }
        match self.index.backend.as_str() {
            "qdrant" | "embedded" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown index backend '{other}' (expected 'qdrant' or 'embedded')"
                )));
            }
        }
        let r = &self.ranking;
        for (name, w) in [
            ("similarity_weight", r.similarity_weight),
            ("recency_weight", r.recency_weight),
            ("category_weight", r.category_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "ranking.{name} must be finite and non-negative, got {w}"
                )));
            }
        }
        if r.half_life_days <= 0.0 {
            return Err(ConfigError::Invalid(
                "ranking.half_life_days must be positive".into(),
            ));
        }
        if !(r.dedupe_threshold > 0.0 && r.dedupe_threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "ranking.dedupe_threshold must be in (0, 1]".into(),
            ));
        }
        if r.candidate_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "ranking.candidate_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching process environment variables take this lock so
    // they cannot race the ones that load with apply_env.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_valid() {
        let config = MentorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.ranking.context_size, 10);
        assert_eq!(config.reflection.lookback_days, 7);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        let config = MentorConfig::load_from(tmp.path().join("nope.json")).unwrap();
        assert_eq!(config.index.collection, "mentor_memories");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"index": {"collection": "custom"}}"#).unwrap();
        let config = MentorConfig::load_from(path).unwrap();
        assert_eq!(config.index.collection, "custom");
        assert_eq!(config.index.url(), "http://localhost:6334");
        assert_eq!(config.ranking.half_life_days, 14.0);
    }

    #[test]
    fn explicit_file_url_wins_over_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        // The file pins the URL to the built-in default on purpose;
        // the environment must not override it.
        fs::write(
            &path,
            r#"{"index": {"url": "http://localhost:6334"}}"#,
        )
        .unwrap();

        std::env::set_var("MENTOR_QDRANT_URL", "http://qdrant.internal:6334");
        let pinned = MentorConfig::load_from(path).unwrap();
        let from_env = MentorConfig::load_from(tmp.path().join("nope.json")).unwrap();
        std::env::remove_var("MENTOR_QDRANT_URL");

        assert_eq!(pinned.index.url(), "http://localhost:6334");
        // With no file value, the environment fills the gap
        assert_eq!(from_env.index.url(), "http://qdrant.internal:6334");
    }

    #[test]
    fn rejects_zero_dimension() {
        let mut config = MentorConfig::default();
        config.embedding.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = MentorConfig::default();
        config.embedding.provider = "sentencepiece".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_dedupe_threshold() {
        let mut config = MentorConfig::default();
        config.ranking.dedupe_threshold = 1.5;
        assert!(config.validate().is_err());
        config.ranking.dedupe_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        let mut config = MentorConfig::default();
        config.ranking.recency_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_roundtrip() {
        let config = MentorConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: MentorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.embedding.model, config.embedding.model);
        assert_eq!(parsed.ranking.boosts.goal, 1.0);
    }
}
