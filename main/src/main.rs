use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use common::utils::{config::get_config, embedding::EmbeddingProvider};
use corpus_store::CorpusManager;
use ingestion_pipeline::IngestionPipeline;
use query_pipeline::{OpenAiChat, QueryOptions, QueryPipeline};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "arkiv", about = "Question answering over your own documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a document (.pdf, .txt, .md) into the corpus
    Ingest { path: PathBuf },
    /// Ask a question against the ingested corpus
    Query {
        question: String,
        /// Number of fragments to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Generation temperature override
        #[arg(long)]
        temperature: Option<f32>,
        /// Generation output token limit override
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// List ingested documents and their fragment counts
    List,
    /// Remove a document and all of its fragments
    Delete { name: String },
    /// Show corpus-wide counters
    Stats,
    /// Report readiness of the generation client and the corpus
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    // Get config
    let config = get_config()?;

    let corpus_dir = PathBuf::from(&config.data_dir).join("vectorstore");
    let mut corpus = CorpusManager::open_in(&corpus_dir);

    match cli.command {
        Command::Ingest { path } => {
            let embedding_provider = build_embeddings(&config).await?;
            let pipeline = IngestionPipeline::from_config(embedding_provider, &config);
            let added = pipeline.ingest_file(&mut corpus, &path).await?;
            println!("Ingested {} fragments from {}", added, path.display());
        }
        Command::Query {
            question,
            top_k,
            temperature,
            max_tokens,
        } => {
            let embedding_provider = build_embeddings(&config).await?;
            let openai_client = Arc::new(async_openai::Client::with_config(
                async_openai::config::OpenAIConfig::new()
                    .with_api_key(&config.openai_api_key)
                    .with_api_base(&config.openai_base_url),
            ));
            let chat = Arc::new(OpenAiChat::new(openai_client, config.chat_model.clone()));
            let pipeline = QueryPipeline::from_config(Some(chat), embedding_provider, &config);

            let response = pipeline
                .answer(
                    &corpus,
                    &question,
                    QueryOptions {
                        k: top_k,
                        temperature,
                        max_tokens,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::List => {
            println!("{}", serde_json::to_string_pretty(&corpus.list_documents())?);
        }
        Command::Delete { name } => {
            if corpus.delete_document(&name)? {
                println!("Deleted {name}");
            } else {
                println!("Document not found: {name}");
            }
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&corpus.stats())?);
        }
        Command::Health => {
            let embedding_provider = build_embeddings(&config).await?;
            let openai_client = Arc::new(async_openai::Client::with_config(
                async_openai::config::OpenAIConfig::new()
                    .with_api_key(&config.openai_api_key)
                    .with_api_base(&config.openai_base_url),
            ));
            let chat = Arc::new(OpenAiChat::new(openai_client, config.chat_model.clone()));
            let pipeline = QueryPipeline::from_config(Some(chat), embedding_provider, &config);
            println!("{}", serde_json::to_string_pretty(&pipeline.health(&corpus))?);
        }
    }

    Ok(())
}

async fn build_embeddings(
    config: &common::utils::config::AppConfig,
) -> Result<Arc<EmbeddingProvider>, Box<dyn std::error::Error>> {
    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let provider = EmbeddingProvider::from_config(config, Some(openai_client)).await?;
    info!(
        embedding_backend = provider.backend_label(),
        embedding_model = provider.model_code().as_deref().unwrap_or("builtin"),
        embedding_dimension = provider.dimension(),
        "Embedding provider initialized"
    );
    Ok(Arc::new(provider))
}
