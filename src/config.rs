//! Environment-driven configuration.
//!
//! Every knob is read from a `MNEMON_`-prefixed environment variable with a
//! validated default. [`Config::from_env`] reads the process environment;
//! [`Config::from_lookup`] takes an arbitrary lookup function so tests can
//! supply a map without mutating global state.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::EngineError;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Local development.
    Development,
    /// Pre-production staging.
    Staging,
    /// Production.
    Production,
}

impl Environment {
    fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(EngineError::Validation(format!(
                "unknown environment {other:?}"
            ))),
        }
    }
}

/// Which chat-completion provider serves generation and extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    /// OpenAI chat completions.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Groq (OpenAI-compatible wire format).
    Groq,
}

impl LlmProviderKind {
    fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "groq" => Ok(Self::Groq),
            other => Err(EngineError::Validation(format!(
                "unknown llm provider {other:?}"
            ))),
        }
    }
}

/// Which embedding provider backs the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    /// OpenAI `/v1/embeddings`.
    OpenAi,
    /// Local Ollama `/api/embed` (model loads lazily on first call).
    Ollama,
}

impl EmbeddingProviderKind {
    fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(EngineError::Validation(format!(
                "unknown embedding provider {other:?}"
            ))),
        }
    }
}

/// LLM provider selection and credentials.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Selected provider.
    pub provider: LlmProviderKind,
    /// OpenAI chat model.
    pub openai_model: String,
    /// Anthropic model.
    pub anthropic_model: String,
    /// Groq model.
    pub groq_model: String,
    /// OpenAI API key (required when provider is openai).
    pub openai_api_key: Option<String>,
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// Groq API key.
    pub groq_api_key: Option<String>,
    /// Optional cheaper model for the extraction role (same provider).
    pub extraction_model: Option<String>,
    /// Deadline for a single generation call, in seconds.
    pub timeout_secs: u64,
}

/// Embedding provider and cache settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Selected provider.
    pub provider: EmbeddingProviderKind,
    /// Model identifier (e.g. `text-embedding-3-small`, `nomic-embed-text`).
    pub model: String,
    /// Vector dimensionality; every stored embedding must match.
    pub dimension: usize,
    /// Base URL for the Ollama server.
    pub ollama_base_url: String,
    /// Cache entry TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Deadline for a single embedding call, in seconds.
    pub timeout_secs: u64,
}

/// Retrieval tuning knobs.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Default number of memories returned per query.
    pub top_k: usize,
    /// Confidence floor applied to candidates.
    pub min_confidence: f64,
    /// Similarity floor for COLD-tier admission.
    pub cold_similarity_min: f64,
    /// Composite-score floor below which no memory is injected.
    pub silence_threshold: f64,
}

/// Write-path and lifecycle tuning knobs.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Extraction candidates below this confidence are dropped.
    pub confidence_threshold: f64,
    /// Cosine similarity at or above which a candidate is a near-duplicate.
    pub dedup_threshold: f64,
    /// How many recent memories the deduplicator compares against.
    pub dedup_window: usize,
    /// Days after which `entity` memories expire.
    pub entity_ttl_days: i64,
    /// Days a fulfilled commitment is retained before deletion.
    pub commitment_grace_days: i64,
    /// Minimum decay-score change that is written back.
    pub decay_write_threshold: f64,
    /// Cosine similarity at or above which memories are consolidated.
    pub consolidation_threshold: f64,
}

/// Row-store connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    pub path: PathBuf,
    /// Connection pool size.
    pub pool_size: u32,
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment.
    pub environment: Environment,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// Embedding settings.
    pub embedding: EmbeddingConfig,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Write-path and lifecycle settings.
    pub memory: MemoryConfig,
    /// Row-store settings.
    pub database: DatabaseConfig,
    /// Seconds between lifecycle worker passes.
    pub lifecycle_interval_secs: u64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when a variable holds an
    /// unparseable or out-of-range value.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when a variable holds an
    /// unparseable or out-of-range value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let environment =
            Environment::parse(&string_or(&lookup, "MNEMON_ENVIRONMENT", "development"))?;

        let llm = LlmConfig {
            provider: LlmProviderKind::parse(&string_or(&lookup, "MNEMON_LLM_PROVIDER", "groq"))?,
            openai_model: string_or(&lookup, "MNEMON_OPENAI_MODEL", "gpt-4o"),
            anthropic_model: string_or(
                &lookup,
                "MNEMON_ANTHROPIC_MODEL",
                "claude-3-5-sonnet-20241022",
            ),
            groq_model: string_or(&lookup, "MNEMON_GROQ_MODEL", "llama-3.3-70b-versatile"),
            openai_api_key: lookup("OPENAI_API_KEY"),
            anthropic_api_key: lookup("ANTHROPIC_API_KEY"),
            groq_api_key: lookup("GROQ_API_KEY"),
            extraction_model: lookup("MNEMON_EXTRACTION_MODEL"),
            timeout_secs: parse_or(&lookup, "MNEMON_LLM_TIMEOUT_SECS", 60)?,
        };

        let embedding = EmbeddingConfig {
            provider: EmbeddingProviderKind::parse(&string_or(
                &lookup,
                "MNEMON_EMBEDDING_PROVIDER",
                "ollama",
            ))?,
            model: string_or(&lookup, "MNEMON_EMBEDDING_MODEL", "nomic-embed-text"),
            dimension: parse_or(&lookup, "MNEMON_EMBEDDING_DIMENSION", 384)?,
            ollama_base_url: string_or(
                &lookup,
                "MNEMON_OLLAMA_BASE_URL",
                "http://127.0.0.1:11434",
            ),
            cache_ttl_secs: parse_or(&lookup, "MNEMON_EMBEDDING_CACHE_TTL_SECS", 3600)?,
            timeout_secs: parse_or(&lookup, "MNEMON_EMBEDDING_TIMEOUT_SECS", 10)?,
        };

        let retrieval = RetrievalConfig {
            top_k: parse_or(&lookup, "MNEMON_RETRIEVAL_TOP_K", 10)?,
            min_confidence: unit_interval(&lookup, "MNEMON_RETRIEVAL_MIN_CONFIDENCE", 0.5)?,
            cold_similarity_min: unit_interval(&lookup, "MNEMON_COLD_SIMILARITY_MIN", 0.75)?,
            silence_threshold: unit_interval(&lookup, "MNEMON_SILENCE_THRESHOLD", 0.30)?,
        };

        let memory = MemoryConfig {
            confidence_threshold: unit_interval(&lookup, "MNEMON_CONFIDENCE_THRESHOLD", 0.7)?,
            dedup_threshold: unit_interval(&lookup, "MNEMON_DEDUP_THRESHOLD", 0.95)?,
            dedup_window: parse_or(&lookup, "MNEMON_DEDUP_WINDOW", 50)?,
            entity_ttl_days: parse_or(&lookup, "MNEMON_ENTITY_TTL_DAYS", 180)?,
            commitment_grace_days: parse_or(&lookup, "MNEMON_COMMITMENT_GRACE_DAYS", 7)?,
            decay_write_threshold: unit_interval(&lookup, "MNEMON_DECAY_WRITE_THRESHOLD", 0.05)?,
            consolidation_threshold: unit_interval(
                &lookup,
                "MNEMON_CONSOLIDATION_THRESHOLD",
                0.90,
            )?,
        };

        let database = DatabaseConfig {
            path: lookup("MNEMON_DATABASE_PATH")
                .map(PathBuf::from)
                .map_or_else(default_db_path, Ok)?,
            pool_size: parse_or(&lookup, "MNEMON_POOL_SIZE", 10)?,
        };

        let config = Self {
            environment,
            log_level: string_or(&lookup, "MNEMON_LOG_LEVEL", "info"),
            llm,
            embedding,
            retrieval,
            memory,
            database,
            lifecycle_interval_secs: parse_or(&lookup, "MNEMON_LIFECYCLE_INTERVAL_SECS", 3600)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Returns `true` when running in production.
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.embedding.dimension == 0 {
            return Err(EngineError::Validation(
                "embedding dimension must be positive".to_owned(),
            ));
        }
        if self.database.pool_size == 0 {
            return Err(EngineError::Validation(
                "pool size must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Default runtime root (`~/.mnemon`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_dir() -> Result<PathBuf, EngineError> {
    let base = directories::BaseDirs::new()
        .ok_or_else(|| EngineError::Internal("cannot determine home directory".to_owned()))?;
    Ok(base.home_dir().join(".mnemon"))
}

fn default_db_path() -> Result<PathBuf, EngineError> {
    Ok(runtime_dir()?.join("data").join("memory.db"))
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, EngineError> {
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| EngineError::Validation(format!("invalid value for {key}: {raw:?}"))),
        None => Ok(default),
    }
}

fn unit_interval(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: f64,
) -> Result<f64, EngineError> {
    let value: f64 = parse_or(lookup, key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::Validation(format!(
            "{key} must be within [0, 1], got {value}"
        )));
    }
    Ok(value)
}
