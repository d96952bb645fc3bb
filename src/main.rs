//! # Health RAG CLI (`hrag`)
//!
//! The `hrag` binary ingests the healthcare knowledge base into a vector
//! store, answers questions through the RAG pipeline or the multi-agent
//! workflow, and serves the web chat UI.
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/hrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag ingest` | Chunk, embed and index the corpus |
//! | `hrag ask "<question>"` | Answer one question |
//! | `hrag search "<query>"` | Show the chunks retrieval would use |
//! | `hrag agents run "<question>"` | Answer through the agent workflow |
//! | `hrag agents list` | List agent roles |
//! | `hrag serve` | Start the web chat server |
//! | `hrag status` | Component health and collection info |
//! | `hrag collection info` / `delete` | Inspect or drop the collection |
//!
//! ## Examples
//!
//! ```bash
//! # Index the built-in documents (plus [corpus].root if set)
//! hrag ingest --recreate
//!
//! # Ask with streamed output and the sources used
//! hrag ask "What are the symptoms of type 2 diabetes?" --stream --show-context
//!
//! # Serve the chat UI on another port
//! hrag serve --bind 0.0.0.0:8080
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use health_rag::agents::{registry_from_config, Coordinator};
use health_rag::ask::{self, AskOptions};
use health_rag::config;
use health_rag::ingest::{self, IngestOptions};
use health_rag::logging::init_logging;
use health_rag::rag::RagEngine;
use health_rag::vector_store::create_store;
use health_rag::{search, server, status};

/// Health RAG CLI: a retrieval-augmented healthcare assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used (local
/// Ollama models and a local Qdrant). See `config/hrag.example.toml`.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "Health RAG: a retrieval-augmented healthcare assistant",
    version,
    long_about = "Health RAG indexes a healthcare knowledge base into a vector store and answers \
    questions by retrieving relevant passages and generating a grounded answer with a chat model. \
    A fixed-order multi-agent workflow and a web chat UI are included."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index the corpus into the vector store.
    ///
    /// Re-running is idempotent: chunk ids are deterministic, so existing
    /// points are overwritten. A collection whose vector size differs from
    /// the embedding model's is recreated.
    Ingest {
        /// Drop and recreate the collection first.
        #[arg(long)]
        recreate: bool,

        /// Load and chunk only; print counts without calling any service.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to ingest.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question through the RAG pipeline.
    Ask {
        question: String,

        /// Print tokens as they are generated.
        #[arg(long)]
        stream: bool,

        /// Print the retrieved sources after the answer.
        #[arg(long)]
        show_context: bool,

        /// Emit the full answer (context and metrics) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve matching chunks without generating an answer.
    Search {
        query: String,

        /// Show at most this many results (after top-k and threshold).
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Multi-agent workflow.
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },

    /// Start the web chat server.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show component health, collection info and available models.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Inspect or delete the vector store collection.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
}

#[derive(Subcommand)]
enum AgentsAction {
    /// Run research, analysis, synthesis and coordination for a question.
    Run {
        question: String,

        #[arg(long)]
        json: bool,
    },
    /// List the agent roles.
    List,
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Vector size, distance and point count.
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Delete the collection and all its points.
    Delete,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_or_default(&cli.config)?;
    init_logging(&cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Ingest {
            recreate,
            dry_run,
            limit,
        } => {
            let options = IngestOptions {
                recreate,
                dry_run,
                limit,
            };
            ingest::run_ingest(&cfg, &options).await?;
        }
        Commands::Ask {
            question,
            stream,
            show_context,
            json,
        } => {
            let engine = RagEngine::from_config(&cfg)?;
            let options = AskOptions {
                stream,
                show_context,
                json,
            };
            ask::run_ask(&engine, &question, options).await?;
        }
        Commands::Search { query, limit, json } => {
            let engine = RagEngine::from_config(&cfg)?;
            search::run_search(&engine, &query, limit, json).await?;
        }
        Commands::Agents { action } => {
            let engine = Arc::new(RagEngine::from_config(&cfg)?);
            let registry = registry_from_config(&cfg, engine)?;
            match action {
                AgentsAction::List => ask::list_agents(&registry),
                AgentsAction::Run { question, json } => {
                    let coordinator = Coordinator::new(&registry)?;
                    ask::run_agents(&coordinator, &question, json).await?;
                }
            }
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Status { json } => {
            let engine = RagEngine::from_config(&cfg)?;
            status::run_status(&engine, json).await?;
        }
        Commands::Collection { action } => {
            let store = create_store(&cfg.vector_store)?;
            match action {
                CollectionAction::Info { json } => {
                    status::run_collection_info(store.as_ref(), json).await?;
                }
                CollectionAction::Delete => {
                    status::run_collection_delete(store.as_ref()).await?;
                }
            }
        }
    }

    Ok(())
}
