//! # Tabular RAG CLI (`trag`)
//!
//! Embeds uploaded tables, searches them, and answers questions grounded in
//! them through a local Ollama instance.
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/trag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag init` | Open (and create if missing) the vector store |
//! | `trag embed <upload.json>` | Embed a parsed upload, replacing the file's records |
//! | `trag delete <file_id>` | Remove every record of a file |
//! | `trag search "<query>"` | Hybrid or vector search |
//! | `trag intent "<query>"` | Show the extracted intent |
//! | `trag chat "<message>"` | Answer a message |
//! | `trag serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `tabular_rag=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tabular_rag::config::{self, Config};
use tabular_rag::embedding::create_embedder;
use tabular_rag::generation::create_chat_model;
use tabular_rag::ingest;
use tabular_rag::rag::{ChatRequest, RagPipeline};
use tabular_rag::search::{self, SearchMode};
use tabular_rag::server;
use tabular_rag::store::{DocumentStore, SqliteDocumentStore};

#[derive(Parser)]
#[command(
    name = "trag",
    about = "Question answering over uploaded tables with hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the vector store, creating the database file if missing.
    Init,

    /// Embed a parsed upload (`{headers, rows, fileId, originalName}` JSON).
    Embed {
        /// Path to the upload JSON file.
        upload: PathBuf,
    },

    /// Delete every embedded record of a file.
    Delete {
        file_id: i64,
    },

    /// Search embedded rows.
    Search {
        query: String,

        /// Number of results, 1 to 100 (larger values are capped).
        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Only search rows of this file.
        #[arg(long)]
        file_id: Option<i64>,

        /// `hybrid` (vector + fuzzy) or `vector`.
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },

    /// Show how a query is classified.
    Intent {
        query: String,
    },

    /// Answer a message.
    Chat {
        message: String,

        /// Skip retrieval and answer without data.
        #[arg(long)]
        no_rag: bool,

        #[arg(long)]
        file_id: Option<i64>,
    },

    /// Start the HTTP server.
    Serve,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tabular_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_pipeline(cfg: &Config) -> Result<Arc<RagPipeline>> {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(&cfg.db.path));
    let embedder = create_embedder(&cfg.embedding)?;
    let chat = create_chat_model(&cfg.generation)?;
    Ok(Arc::new(RagPipeline::new(cfg, store, embedder, chat)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteDocumentStore::new(&cfg.db.path);
            let count = store.count_rows().await?;
            store.close().await;
            println!(
                "Vector store ready at {} ({} records)",
                cfg.db.path.display(),
                count
            );
        }
        Commands::Embed { upload } => {
            let pipeline = build_pipeline(&cfg)?;
            let result = match ingest::load_upload(&upload) {
                Ok(upload) => {
                    ingest::embed_upload(
                        pipeline.store().as_ref(),
                        pipeline.embedder().as_ref(),
                        &upload,
                        cfg.embedding.batch_size,
                    )
                    .await
                }
                Err(e) => ingest::EmbedResult::from_error(&e),
            };
            print_json(&result)?;
        }
        Commands::Delete { file_id } => {
            let pipeline = build_pipeline(&cfg)?;
            let result = ingest::delete_file_embeddings(pipeline.store().as_ref(), file_id).await;
            print_json(&result)?;
        }
        Commands::Search {
            query,
            limit,
            file_id,
            mode,
        } => {
            let mode: SearchMode = mode.parse()?;
            let limit = search::checked_limit(limit)?;
            let pipeline = build_pipeline(&cfg)?;
            let outcome = search::search(
                pipeline.store().as_ref(),
                pipeline.embedder().as_ref(),
                &query,
                limit,
                file_id,
                mode,
                pipeline.search_params(),
            )
            .await;

            if let Some(error) = &outcome.error {
                println!("Search failed: {}", error);
            } else if outcome.results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in outcome.results.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] ({}) {}",
                        i + 1,
                        result.score,
                        result.source,
                        result.text
                    );
                }
            }
        }
        Commands::Intent { query } => {
            let pipeline = build_pipeline(&cfg)?;
            let extracted = pipeline.extractor().extract(&query).await;
            print_json(&extracted)?;
        }
        Commands::Chat {
            message,
            no_rag,
            file_id,
        } => {
            let pipeline = build_pipeline(&cfg)?;
            let request = ChatRequest {
                message,
                use_rag: !no_rag,
                file_id,
            };
            let response = pipeline.chat(&request).await;

            println!("{}", response.message);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &response.sources {
                    println!(
                        "  - {} row {} (relevance {:.3})",
                        source.file_name, source.row_index, source.relevance_score
                    );
                }
            }
            if let Some(seconds) = response.response_time {
                println!();
                println!("({:.2}s, data used: {})", seconds, response.is_rag_used);
            }
            if !response.success {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            let pipeline = build_pipeline(&cfg)?;
            server::run_server(&cfg, pipeline).await?;
        }
    }

    Ok(())
}
