#![allow(missing_docs)]

//! mnemon — long-form conversational memory engine.
//!
//! The transport surface (HTTP, auth, rate limiting) lives in a separate
//! collaborator; this binary wires the engine itself and exposes an
//! interactive chat adapter plus housekeeping subcommands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use mnemon::config::{Config, EmbeddingProviderKind};
use mnemon::embedding::cache::EmbeddingCache;
use mnemon::embedding::ollama::OllamaEmbedder;
use mnemon::embedding::openai::OpenAiEmbedder;
use mnemon::embedding::Embedder;
use mnemon::extract::canonical::Canonicalizer;
use mnemon::extract::dedup::Deduplicator;
use mnemon::extract::MemoryExtractor;
use mnemon::index::FlatIndex;
use mnemon::lifecycle::{LifecyclePolicy, LifecycleWorker};
use mnemon::orchestrate::{OrchestratorDeps, TurnOrchestrator, TurnRequest};
use mnemon::providers::router::ModelRouter;
use mnemon::retrieve::intent::KeywordClassifier;
use mnemon::retrieve::Retriever;
use mnemon::store::{ConversationStore, MemoryStore};

/// Bootstrap schema applied by `init-db` (idempotent).
const SCHEMA_SQL: &str = include_str!("../migrations/001_schema.sql");

#[derive(Parser)]
#[command(name = "mnemon", version, about = "Long-form conversational memory engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat loop against the memory engine.
    Chat {
        /// User id to scope memories to.
        #[arg(long)]
        user: String,
        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<Uuid>,
    },
    /// Create the database schema.
    InitDb,
    /// Print memory statistics for a user.
    Stats {
        /// User id.
        #[arg(long)]
        user: String,
    },
    /// Run one lifecycle pass (TTL, decay, consolidation, conflicts).
    Lifecycle {
        /// User id.
        #[arg(long)]
        user: String,
        /// Reference turn for decay; defaults to the user's highest turn.
        #[arg(long)]
        current_turn: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    mnemon::logging::init_cli();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Command::InitDb => {
            let pool = connect(&config).await?;
            sqlx::raw_sql(SCHEMA_SQL)
                .execute(&pool)
                .await
                .context("schema bootstrap failed")?;
            info!(path = %config.database.path.display(), "database initialised");
        }
        Command::Stats { user } => {
            let engine = Engine::build(&config).await?;
            let stats = engine.store.stats(&user).await?;
            println!("user:            {}", stats.user_id);
            println!("total memories:  {}", stats.total_memories);
            for (kind, count) in &stats.by_kind {
                println!("  {:<12} {count}", kind.as_str());
            }
            println!("avg confidence:  {:.3}", stats.avg_confidence);
            println!("turn range:      {}..{}", stats.oldest_turn, stats.newest_turn);
            println!("total accesses:  {}", stats.total_accesses);
            println!("hot memories:    {}", stats.hot_memories);
        }
        Command::Lifecycle { user, current_turn } => {
            let engine = Engine::build(&config).await?;
            let turn = match current_turn {
                Some(turn) => turn,
                None => engine.store.max_turn(&user).await?,
            };
            let worker = LifecycleWorker::new(
                Arc::clone(&engine.store),
                Arc::clone(&engine.extractor),
                LifecyclePolicy {
                    entity_ttl_days: config.memory.entity_ttl_days,
                    commitment_grace_days: config.memory.commitment_grace_days,
                    decay_write_threshold: config.memory.decay_write_threshold,
                    consolidation_threshold: config.memory.consolidation_threshold,
                },
            );
            let report = worker.run_once(&user, turn).await?;
            println!("expired entities:      {}", report.expired_entities);
            println!("removed commitments:   {}", report.removed_commitments);
            println!("decay updates:         {}", report.decay_updates);
            println!("consolidated clusters: {}", report.consolidated_clusters);
            println!("conflicts resolved:    {}", report.conflicts_resolved);
        }
        Command::Chat { user, conversation } => {
            let engine = Engine::build(&config).await?;
            run_chat(&engine, &user, conversation).await?;
        }
    }

    Ok(())
}

/// Wired engine components.
struct Engine {
    store: Arc<MemoryStore>,
    conversations: Arc<ConversationStore>,
    extractor: Arc<MemoryExtractor>,
    orchestrator: TurnOrchestrator,
}

impl Engine {
    async fn build(config: &Config) -> Result<Self> {
        let pool = connect(config).await?;
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("schema bootstrap failed")?;

        let embedder = build_embedder(config);
        let index = Arc::new(FlatIndex::new());
        let store = Arc::new(MemoryStore::new(
            pool.clone(),
            index.clone(),
            Arc::clone(&embedder),
        ));

        // The index is a derived cache; rebuild it from the rows.
        store
            .reconcile_index()
            .await
            .context("index reconciliation failed")?;

        let conversations = Arc::new(ConversationStore::new(pool));
        let router = Arc::new(ModelRouter::from_config(&config.llm)?);
        let classifier = Arc::new(KeywordClassifier::new());
        let retriever = Arc::new(Retriever::new(
            index,
            Arc::clone(&embedder),
            Arc::clone(&store),
            classifier.clone(),
            config.retrieval.cold_similarity_min,
        ));
        let extractor = Arc::new(MemoryExtractor::new(
            Arc::clone(&router),
            config.memory.confidence_threshold,
        ));

        let orchestrator = TurnOrchestrator::new(OrchestratorDeps {
            store: Arc::clone(&store),
            conversations: Arc::clone(&conversations),
            retriever,
            extractor: Arc::clone(&extractor),
            canonicalizer: Canonicalizer::new(),
            dedup: Deduplicator::new(config.memory.dedup_threshold, config.memory.dedup_window),
            router,
            classifier,
            top_k: config.retrieval.top_k,
            min_confidence: config.retrieval.min_confidence,
            silence_threshold: config.retrieval.silence_threshold,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
        });

        Ok(Self {
            store,
            conversations,
            extractor,
            orchestrator,
        })
    }
}

async fn connect(config: &Config) -> Result<SqlitePool> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create data directory {}", parent.display()))?;
    }
    let options = SqliteConnectOptions::new()
        .filename(&config.database.path)
        .create_if_missing(true)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect_with(options)
        .await
        .context("cannot open database")
}

fn build_embedder(config: &Config) -> Arc<dyn Embedder> {
    let inner: Arc<dyn Embedder> = match config.embedding.provider {
        EmbeddingProviderKind::OpenAi => Arc::new(OpenAiEmbedder::new(
            &config.embedding.model,
            config.llm.openai_api_key.as_deref().unwrap_or_default(),
            config.embedding.dimension,
            config.embedding.timeout_secs,
        )),
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(
            &config.embedding.model,
            &config.embedding.ollama_base_url,
            config.embedding.dimension,
            config.embedding.timeout_secs,
        )),
    };
    Arc::new(EmbeddingCache::new(
        inner,
        Duration::from_secs(config.embedding.cache_ttl_secs),
    ))
}

async fn run_chat(engine: &Engine, user: &str, conversation: Option<Uuid>) -> Result<()> {
    use std::io::{BufRead, Write};

    let (conversation_id, mut turn_number) = match conversation {
        Some(id) => {
            let existing = engine.conversations.get(id, user).await?;
            (Some(id), existing.turn_count)
        }
        None => (None, 0),
    };
    let mut conversation_id = conversation_id;

    println!("mnemon chat — user {user}. Empty line exits.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim().to_owned();
        if message.is_empty() {
            break;
        }

        let response = engine
            .orchestrator
            .process(TurnRequest {
                user_id: user.to_owned(),
                conversation_id,
                turn_number,
                message,
                include_memories: true,
                metadata: serde_json::Value::Object(Default::default()),
            })
            .await;

        match response {
            Ok(turn) => {
                conversation_id = Some(turn.conversation_id);
                turn_number = turn.turn_number + 1;
                println!("{}", turn.response);
                println!(
                    "  [turn {} | {} memories | {} ms]",
                    turn.turn_number,
                    turn.active_memories.len(),
                    turn.latency.total_ms
                );
            }
            Err(err) => {
                eprintln!("error ({}): {err}", err.kind());
            }
        }
    }

    Ok(())
}
