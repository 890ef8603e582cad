//! # Legal Assistant CLI (`lexa`)
//!
//! The `lexa` binary drives the privacy-first legal assistant: document
//! ingestion into the vector store, one-shot questions, an interactive
//! chat loop, and the HTTP query server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexa sync` | Populate the store from the documents directory (first run only) |
//! | `lexa rebuild` | Clear the store and re-ingest everything |
//! | `lexa ask "<question>"` | Run one question through the pipeline |
//! | `lexa chat` | Interactive session with conversation history |
//! | `lexa serve` | Start the JSON query server |
//!
//! ## Examples
//!
//! ```bash
//! lexa --config ./config/lexa.toml sync
//! lexa ask "Como solicitar a segunda via de uma certidão de nascimento?"
//! lexa ask --details "Meu CPF é 123.456.789-00, como me cadastro?"
//! lexa chat
//! lexa serve
//! ```
//!
//! All commands require a running Ollama server for the generation,
//! anonymization, and embedding models configured in the TOML file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use legal_assistant::assistant::LegalAssistant;
use legal_assistant::config::{self, Config};
use legal_assistant::ingest::{self, IngestSummary};
use legal_assistant::llm::{OllamaClient, OllamaEmbedder};
use legal_assistant::models::{ConversationTurn, QueryReport, QueryStatus};
use legal_assistant::privacy::SensitiveDataHandler;
use legal_assistant::server;
use legal_assistant::store::ChunkStore;

/// Legal Assistant — retrieval-augmented answers over legal PDF
/// collections, with PII anonymized before retrieval and generation.
#[derive(Parser)]
#[command(
    name = "lexa",
    about = "Privacy-first retrieval-augmented assistant for legal PDF collections",
    version,
    long_about = "Legal Assistant answers questions over a local collection of legal and \
    administrative PDFs. Queries are anonymized before they reach retrieval or generation: \
    detected personal data is replaced by category placeholders and restored in the final answer."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lexa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate the vector store from the documents directory.
    ///
    /// First-run operation: does nothing when the store already holds
    /// chunks. Use `rebuild` for an explicit refresh.
    Sync,

    /// Clear the vector store and re-ingest every document.
    Rebuild,

    /// Run a single question through the pipeline and print the answer.
    Ask {
        /// The question text.
        question: String,

        /// Also print the anonymized query, the raw model response, and
        /// the detected replacements.
        #[arg(long)]
        details: bool,
    },

    /// Interactive chat session with conversation history.
    ///
    /// Enter `0` to exit and `:update` to rebuild the document store;
    /// anything else is treated as a question.
    Chat,

    /// Start the JSON HTTP query server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sync => {
            let store = connect_store(&cfg).await?;
            match ingest::populate(&cfg, &store).await? {
                Some(summary) => print_summary("sync", &summary),
                None => println!("store already populated — use `lexa rebuild` to refresh"),
            }
            store.close().await;
        }
        Commands::Rebuild => {
            let store = connect_store(&cfg).await?;
            let summary = ingest::rebuild(&cfg, &store).await?;
            print_summary("rebuild", &summary);
            store.close().await;
        }
        Commands::Ask { question, details } => {
            let (_store, assistant) = build_pipeline(&cfg).await?;
            let report = assistant.process_query(&question, &[]).await;
            print_report(&report, details);
        }
        Commands::Chat => {
            run_chat(&cfg).await?;
        }
        Commands::Serve => {
            let (_store, assistant) = build_pipeline(&cfg).await?;
            server::run_server(&cfg.server.bind, assistant).await?;
        }
    }

    Ok(())
}

async fn connect_store(cfg: &Config) -> Result<Arc<ChunkStore>> {
    let embedder = Arc::new(OllamaEmbedder::new(&cfg.ollama)?);
    Ok(Arc::new(ChunkStore::connect(&cfg.db.path, embedder).await?))
}

/// Wire the pipeline: store, models, handler, orchestrator.
///
/// The store is returned alongside the assistant so callers that also
/// ingest (the chat loop) reuse the same connection pool.
async fn build_pipeline(cfg: &Config) -> Result<(Arc<ChunkStore>, Arc<LegalAssistant>)> {
    let store = connect_store(cfg).await?;
    let handler = SensitiveDataHandler::new(Arc::new(OllamaClient::anonymization(&cfg.ollama)?));
    let generator = Arc::new(OllamaClient::generation(&cfg.ollama)?);

    let assistant = Arc::new(LegalAssistant::new(
        handler,
        store.clone(),
        generator,
        cfg.retrieval.top_k,
    ));

    Ok((store, assistant))
}

async fn run_chat(cfg: &Config) -> Result<()> {
    let (store, assistant) = build_pipeline(cfg).await?;

    println!("Assistente Jurídico — digite sua pergunta.");
    println!("  0        sair");
    println!("  :update  atualizar a base de documentos");

    let mut history: Vec<ConversationTurn> = Vec::new();
    let stdin = std::io::stdin();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line == "0" {
            println!("Até logo!");
            break;
        }
        if line == ":update" {
            let summary = ingest::rebuild(cfg, &store).await?;
            print_summary("rebuild", &summary);
            continue;
        }

        let report = assistant.process_query(line, &history).await;
        println!("{}", report.final_response);

        if report.status == QueryStatus::Answered {
            history.push(ConversationTurn::user(line));
            history.push(ConversationTurn::assistant(report.final_response.clone()));
        }
    }

    store.close().await;
    Ok(())
}

fn print_summary(command: &str, summary: &IngestSummary) {
    println!("{}", command);
    println!("  pages loaded: {}", summary.pages);
    println!("  chunks total: {}", summary.chunks_total);
    println!("  chunks new: {}", summary.chunks_new);
    println!("  chunks refreshed: {}", summary.chunks_refreshed);
    println!("  chunks unchanged: {}", summary.chunks_unchanged);
    println!("ok");
}

fn print_report(report: &QueryReport, details: bool) {
    println!("{}", report.final_response);

    if details {
        println!("\n--- detalhes do processamento ---");
        println!("pergunta anonimizada: {}", report.anonymized_query);
        if report.replacements.is_empty() {
            println!("dados sensíveis: nenhum encontrado");
        } else {
            println!("dados sensíveis:");
            for (placeholder, value) in &report.replacements {
                println!("  {} => {}", placeholder, value);
            }
        }
        println!("resposta bruta: {}", report.raw_response);
        for source in &report.sources {
            println!("fonte: {} (score {:.4})", source.id, source.score);
        }
    }
}
