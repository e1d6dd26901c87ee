use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tickethive_engine::{
    load_config, AdminAnnotator, DialogueEngine, EngineSettings, LlmAnswerPolicy, SessionStore,
};
use tickethive_engine::config::{Config, EmbeddingConfig, LlmConfig};
use tickethive_kb::{
    EmbeddingProvider, KbIndex, KbIndexer, KbRetriever, OllamaEmbeddingProvider,
    OpenAiEmbeddingProvider, StubEmbeddingProvider,
};
use tickethive_provider::{create_provider, LlmProvider, ProviderConfig, ProviderType};
use tickethive_server::AppState;
use tickethive_store::IncidentStore;

#[derive(Parser)]
#[command(name = "tickethive", version, about = "Knowledge-grounded IT incident assistant")]
struct Cli {
    #[arg(long, default_value = "config.yaml", help = "Path to the YAML config file")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API server")]
    Serve {
        #[arg(long, help = "Override the configured port")]
        port: Option<u16>,
    },
    #[command(about = "Validate the config file and the knowledge base text")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,tower_http=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Validate => validate(config).await,
    }
}

async fn serve(config: Config, port_override: Option<u16>) -> Result<()> {
    let llm = build_llm_provider(&config.llm)?;
    let embedder = build_embedding_provider(&config.embedding);

    let store = IncidentStore::open(&config.storage.db_path)
        .map_err(|e| anyhow!("failed to open incident store: {e}"))?;

    let index = Arc::new(KbIndex::new());
    let indexer = Arc::new(KbIndexer::new(
        index.clone(),
        embedder.clone(),
        &config.storage.kb_path,
    ));
    // A broken KB file should not keep the service down: incidents route to
    // admin review until the KB is fixed.
    match indexer.load_from_disk().await {
        Ok(count) => tracing::info!(count, "knowledge base loaded"),
        Err(e) => tracing::warn!("starting without knowledge base: {e}"),
    }

    let retriever = Arc::new(KbRetriever::new(
        index,
        embedder,
        config.retrieval.similarity_threshold,
    ));

    let sessions = SessionStore::new(config.session.ttl_seconds);
    let policy = Arc::new(LlmAnswerPolicy::new(
        llm.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ));

    let engine = Arc::new(DialogueEngine::new(
        llm,
        retriever,
        store.clone(),
        sessions.clone(),
        policy,
        EngineSettings::from_config(&config),
    ));
    let annotator = Arc::new(AdminAnnotator::new(store.clone()));

    // Reap expired sessions in the background.
    let reaper_sessions = sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = reaper_sessions.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired sessions");
            }
        }
    });

    let state = AppState {
        engine,
        annotator,
        indexer,
        store,
    };

    let port = port_override.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{port}", config.server.host)
        .parse()
        .map_err(|e| anyhow!("invalid server address: {e}"))?;

    tickethive_server::serve(addr, state).await
}

async fn validate(config: Config) -> Result<()> {
    println!("config: ok ({} / {})", config.app.name, config.app.env);

    match tokio::fs::read_to_string(&config.storage.kb_path).await {
        Ok(text) => {
            let entries = tickethive_kb::parse_kb_text(&text);
            if entries.is_empty() {
                return Err(anyhow!(
                    "knowledge base {} contains no well-formed entries",
                    config.storage.kb_path
                ));
            }
            println!(
                "knowledge base: ok ({} entries: {})",
                entries.len(),
                entries
                    .iter()
                    .map(|e| e.kb_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!(
                "knowledge base: missing ({}) - incidents will route to admin review",
                config.storage.kb_path
            );
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

fn build_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider_type = match config.provider.as_str() {
        "openai" => ProviderType::OpenAI,
        "deepseek" => ProviderType::DeepSeek,
        "groq" => ProviderType::Groq,
        "ollama" => ProviderType::Ollama,
        "custom" => ProviderType::Custom,
        "stub" => ProviderType::Stub,
        other => return Err(anyhow!("unknown llm provider '{other}'")),
    };

    let mut provider_config = ProviderConfig::new(config.provider.clone(), provider_type);
    if !config.api_key.is_empty() {
        provider_config = provider_config.with_api_key(config.api_key.clone());
    }
    if !config.base_url.is_empty() {
        provider_config = provider_config.with_base_url(config.base_url.clone());
    }
    create_provider(&provider_config)
}

fn build_embedding_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        "openai" => {
            let mut provider = OpenAiEmbeddingProvider::with_model(
                config.api_key.clone(),
                config.model.clone(),
                config.dimensions,
            );
            if !config.base_url.is_empty() {
                provider = provider.with_base_url(config.base_url.clone());
            }
            Arc::new(provider)
        }
        "ollama" => {
            let mut provider =
                OllamaEmbeddingProvider::with_model(config.model.clone(), config.dimensions);
            if !config.base_url.is_empty() {
                provider = provider.with_base_url(config.base_url.clone());
            }
            Arc::new(provider)
        }
        _ => Arc::new(StubEmbeddingProvider::new(config.dimensions)),
    }
}
