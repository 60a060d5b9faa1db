//! Tests for `src/config.rs` — env-driven configuration.

use std::collections::HashMap;

use mnemon::config::{Config, EmbeddingProviderKind, Environment, LlmProviderKind};
use mnemon::error::EngineError;

fn from_map(vars: &[(&str, &str)]) -> Result<Config, EngineError> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    Config::from_lookup(|key| map.get(key).cloned())
}

#[test]
fn defaults_match_the_documented_knobs() {
    let config = from_map(&[]).expect("empty env should use defaults");

    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.llm.provider, LlmProviderKind::Groq);
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Ollama);
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.retrieval.top_k, 10);
    assert_eq!(config.retrieval.silence_threshold, 0.30);
    assert_eq!(config.retrieval.cold_similarity_min, 0.75);
    assert_eq!(config.memory.confidence_threshold, 0.7);
    assert_eq!(config.memory.dedup_threshold, 0.95);
    assert_eq!(config.memory.dedup_window, 50);
    assert_eq!(config.memory.entity_ttl_days, 180);
    assert_eq!(config.memory.commitment_grace_days, 7);
    assert_eq!(config.database.pool_size, 10);
    assert!(!config.is_production());
}

#[test]
fn explicit_values_override_defaults() {
    let config = from_map(&[
        ("MNEMON_ENVIRONMENT", "production"),
        ("MNEMON_LLM_PROVIDER", "anthropic"),
        ("ANTHROPIC_API_KEY", "test-key"),
        ("MNEMON_EMBEDDING_PROVIDER", "openai"),
        ("MNEMON_EMBEDDING_DIMENSION", "1536"),
        ("MNEMON_RETRIEVAL_TOP_K", "25"),
        ("MNEMON_DEDUP_THRESHOLD", "0.99"),
        ("MNEMON_DATABASE_PATH", "/tmp/mnemon-test.db"),
    ])
    .expect("valid overrides should parse");

    assert!(config.is_production());
    assert_eq!(config.llm.provider, LlmProviderKind::Anthropic);
    assert_eq!(config.llm.anthropic_api_key.as_deref(), Some("test-key"));
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
    assert_eq!(config.embedding.dimension, 1536);
    assert_eq!(config.retrieval.top_k, 25);
    assert_eq!(config.memory.dedup_threshold, 0.99);
    assert_eq!(
        config.database.path,
        std::path::PathBuf::from("/tmp/mnemon-test.db")
    );
}

#[test]
fn unknown_enum_values_are_rejected() {
    for (key, value) in [
        ("MNEMON_LLM_PROVIDER", "cohere"),
        ("MNEMON_EMBEDDING_PROVIDER", "sentence-transformers"),
        ("MNEMON_ENVIRONMENT", "prod"),
    ] {
        let err = from_map(&[(key, value)]).expect_err("bad enum must fail");
        assert!(matches!(err, EngineError::Validation(_)), "{key}={value}");
    }
}

#[test]
fn out_of_range_thresholds_are_rejected() {
    let err = from_map(&[("MNEMON_DEDUP_THRESHOLD", "1.5")])
        .expect_err("threshold above 1 must fail");
    assert!(matches!(err, EngineError::Validation(_)));

    let err = from_map(&[("MNEMON_SILENCE_THRESHOLD", "-0.1")])
        .expect_err("negative threshold must fail");
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn unparseable_numbers_are_rejected() {
    let err = from_map(&[("MNEMON_RETRIEVAL_TOP_K", "many")])
        .expect_err("non-numeric top_k must fail");
    assert!(matches!(err, EngineError::Validation(_)));

    let err = from_map(&[("MNEMON_EMBEDDING_DIMENSION", "0")])
        .expect_err("zero dimension must fail");
    assert!(matches!(err, EngineError::Validation(_)));
}
