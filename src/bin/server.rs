//! Timeline HTTP server
//!
//! Run with: timeline-server

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timeline::config::{
    ChunkConfig, EmbedConfig, PromptConfig, RetrievalStrategy, TimelineConfig, WindowConfig,
};
use timeline::embedding::{create_embedder, EmbedderSettings};
use timeline::http;
use timeline::llm::{CompleterSettings, HttpCompleter};
use timeline::pipeline::Pipeline;
use timeline::storage::Storage;

#[derive(Parser, Debug)]
#[command(name = "timeline-server")]
#[command(about = "Conversational memory engine HTTP server")]
struct Args {
    /// Database path
    #[arg(
        long,
        env = "TIMELINE_DB_PATH",
        default_value = "~/.local/share/timeline/timeline.db"
    )]
    db_path: String,

    /// Bind address
    #[arg(long, env = "TIMELINE_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Embedding backend (http, local)
    #[arg(long, env = "TIMELINE_EMBEDDING_BACKEND", default_value = "local")]
    embedding_backend: String,

    /// Embedding endpoint base URL
    #[arg(
        long,
        env = "TIMELINE_EMBEDDING_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    embedding_base_url: String,

    /// Embedding endpoint API key
    #[arg(long, env = "TIMELINE_EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Embedding model name
    #[arg(
        long,
        env = "TIMELINE_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embedding_model: String,

    /// Embedding dimension
    #[arg(long, env = "TIMELINE_EMBED_DIMENSION", default_value = "768")]
    embed_dimension: usize,

    /// Embedding request timeout in ms
    #[arg(long, env = "TIMELINE_EMBED_TIMEOUT_MS", default_value = "30000")]
    embed_timeout_ms: u64,

    /// Embedding retry attempts
    #[arg(long, env = "TIMELINE_EMBED_MAX_RETRIES", default_value = "3")]
    embed_max_retries: u32,

    /// Completion endpoint base URL
    #[arg(
        long,
        env = "TIMELINE_LLM_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    llm_base_url: String,

    /// Completion endpoint API key
    #[arg(long, env = "TIMELINE_LLM_API_KEY")]
    llm_api_key: Option<String>,

    /// Completion model name
    #[arg(long, env = "TIMELINE_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    /// Completion request timeout in ms
    #[arg(long, env = "TIMELINE_LLM_TIMEOUT_MS", default_value = "30000")]
    llm_timeout_ms: u64,

    /// Completion connection pool size
    #[arg(long, env = "TIMELINE_LLM_POOL_SIZE", default_value = "8")]
    llm_pool_size: usize,

    /// Chunk size in characters
    #[arg(long, env = "TIMELINE_CHUNK_MAX_CHARS", default_value = "500")]
    chunk_max_chars: usize,

    /// Chunk overlap in characters
    #[arg(long, env = "TIMELINE_CHUNK_OVERLAP_CHARS", default_value = "50")]
    chunk_overlap_chars: usize,

    /// Rolling window size in messages
    #[arg(long, env = "TIMELINE_WINDOW_SIZE", default_value = "6")]
    window_size: usize,

    /// Running summary bound in characters
    #[arg(long, env = "TIMELINE_WINDOW_MAX_SUMMARY_CHARS", default_value = "1000")]
    window_max_summary_chars: usize,

    /// Idle window retention in hours
    #[arg(long, env = "TIMELINE_WINDOW_MAX_AGE_HOURS", default_value = "24")]
    window_max_age_hours: u64,

    /// Retention sweep interval in minutes
    #[arg(long, env = "TIMELINE_WINDOW_CLEANUP_MINUTES", default_value = "60")]
    window_cleanup_minutes: u64,

    /// Retrieval strategy (fixed, adaptive, intelligent)
    #[arg(long, env = "TIMELINE_CONTEXT_STRATEGY", default_value = "adaptive")]
    context_strategy: String,

    /// Prompt character budget
    #[arg(long, env = "TIMELINE_PROMPT_MAX_LENGTH", default_value = "4000")]
    prompt_max_length: usize,

    /// Prompt format (structured, plain)
    #[arg(long, env = "TIMELINE_PROMPT_FORMAT", default_value = "structured")]
    prompt_format: String,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<TimelineConfig> {
        let strategy: RetrievalStrategy = self
            .context_strategy
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let format = self
            .prompt_format
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(TimelineConfig {
            chunk: ChunkConfig {
                max_chars: self.chunk_max_chars,
                overlap_chars: self.chunk_overlap_chars,
            },
            embed: EmbedConfig {
                dimension: self.embed_dimension,
                timeout_ms: self.embed_timeout_ms,
                max_retries: self.embed_max_retries,
            },
            window: WindowConfig {
                size: self.window_size,
                max_summary_chars: self.window_max_summary_chars,
                max_age_hours: self.window_max_age_hours,
                cleanup_interval_minutes: self.window_cleanup_minutes,
            },
            context: timeline::config::RetrievalConfig {
                strategy,
                ..Default::default()
            },
            index: Default::default(),
            prompt: PromptConfig {
                max_length: self.prompt_max_length,
                format,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "timeline=info,timeline_server=info,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.to_config()?;

    let db_path = shellexpand::tilde(&args.db_path).to_string();
    let storage = Storage::open(&db_path)?;
    tracing::info!(db_path = %db_path, "storage opened");

    let embedder = create_embedder(&EmbedderSettings {
        backend: args.embedding_backend.clone(),
        base_url: args.embedding_base_url.clone(),
        api_key: args.embedding_api_key.clone(),
        model: args.embedding_model.clone(),
        config: config.embed.clone(),
    })?;

    let completer = Arc::new(HttpCompleter::new(CompleterSettings {
        base_url: args.llm_base_url.clone(),
        api_key: args.llm_api_key.clone(),
        model: args.llm_model.clone(),
        timeout_ms: args.llm_timeout_ms,
        pool_size: args.llm_pool_size,
        max_tokens: 1024,
    }));

    let pipeline = Arc::new(Pipeline::new(storage, embedder, completer, config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = pipeline.spawn_index_worker(shutdown_rx.clone());
    let sweeper = tokio::spawn(
        pipeline
            .window()
            .clone()
            .run_sweeper(shutdown_rx.clone()),
    );

    let app = http::router(pipeline);
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!(bind = %args.bind, "timeline server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop background tasks and let the index worker drain its queue
    let _ = shutdown_tx.send(true);
    worker.await?;
    sweeper.await?;

    Ok(())
}
