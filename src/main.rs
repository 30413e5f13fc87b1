use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{error, info};

use medlit::aggregate::{Aggregator, SourceRequest};
use medlit::db::Database;
use medlit::llm::OllamaGenerator;
use medlit::logging::configure_logging;
use medlit::pubmed::PubMedClient;
use medlit::vector::OllamaEmbedder;
use medlit::{AppConfig, Assistant, RetrievalMode, SearchReport, SummaryOutcome, SummaryStrategy};

/// Conventional exit status after SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[clap(name = "medlit", about = "Search, index and summarize PubMed literature")]
struct Cli {
    /// SQLite index file (overrides DATABASE_PATH)
    #[clap(long, global = true)]
    db: Option<String>,

    /// Generation model (overrides LLM_MODEL)
    #[clap(long, global = true)]
    model: Option<String>,

    /// Embedding model (overrides EMBEDDING_MODEL)
    #[clap(long, global = true)]
    embedding_model: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch papers from PubMed and add the new ones to the index
    Fetch {
        #[clap(required = true)]
        query: String,

        /// Maximum number of papers to request
        #[clap(short, long)]
        max: Option<usize>,
    },

    /// Find the indexed papers closest to a query
    Search {
        #[clap(required = true)]
        query: String,

        #[clap(flatten)]
        mode: ModeArgs,
    },

    /// Summarize the papers retrieved for a query
    Summarize {
        #[clap(required = true)]
        query: String,

        #[clap(flatten)]
        mode: ModeArgs,

        /// auto, single-pass or map-reduce
        #[clap(short, long, default_value = "auto")]
        strategy: SummaryStrategy,
    },

    /// Ask questions about the indexed papers
    Chat,

    /// Collect data on a target from external databases and analyse it
    Aggregate {
        #[clap(required = true)]
        target: String,

        /// Data source as key=url, with {query} standing for the target
        /// (defaults to DATA_SOURCES)
        #[clap(short, long = "source")]
        sources: Vec<String>,
    },

    /// Show index statistics
    Stats,
}

#[derive(Args)]
struct ModeArgs {
    /// Number of results in top-k mode
    #[clap(short = 'k', long, default_value = "5")]
    top_k: usize,

    /// Return every paper at or above this similarity (0.0-1.0) instead of top-k
    #[clap(short, long)]
    threshold: Option<f32>,

    /// Upper bound on results in threshold mode
    #[clap(long, default_value = "50")]
    max_k: usize,
}

impl ModeArgs {
    fn mode(&self) -> RetrievalMode {
        match self.threshold {
            Some(min_similarity) => RetrievalMode::Threshold {
                min_similarity,
                max_k: self.max_k,
            },
            None => RetrievalMode::TopK { k: self.top_k },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(model) = cli.model {
        config.llm_model = model;
    }
    if let Some(embedding_model) = cli.embedding_model {
        config.embedding_model = embedding_model;
    }
    config.validate()?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);

    let db = Database::new(&config.database_path)
        .await
        .with_context(|| format!("failed to open index at {}", config.database_path))?;
    let source = Arc::new(PubMedClient::from_config(&config)?);
    let embedder = Arc::new(OllamaEmbedder::from_config(&config));
    let generator = Arc::new(OllamaGenerator::from_config(&config)?.with_cancellation(cancel_rx));
    let assistant = Assistant::new(db, source, embedder, generator, &config).await?;

    let mut interrupts = listen_for_interrupts(cancel_tx.clone());

    if let Commands::Chat = cli.command {
        return run_chat(&assistant, &cancel_tx, &mut interrupts).await;
    }

    tokio::select! {
        biased;
        Some(()) = interrupts.recv() => {
            info!("Ctrl-C received, stopping");
            eprintln!("Interrupted");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        result = run_command(&assistant, &config, cli.command) => result,
    }
}

/// Forwards every Ctrl-C to the generation cancel flag and to the returned
/// channel. Once registered the default SIGINT handling is gone, so every
/// wait in `main` has to watch the channel.
fn listen_for_interrupts(cancel: Arc<watch::Sender<bool>>) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        loop {
            if signal::ctrl_c().await.is_err() {
                error!("Failed to listen for ctrl-c");
                return;
            }
            cancel.send_replace(true);
            if let Err(TrySendError::Closed(_)) = tx.try_send(()) {
                return;
            }
        }
    });
    rx
}

async fn run_command(assistant: &Assistant, config: &AppConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Fetch { query, max } => {
            let report = assistant.fetch_and_store(&query, max, None).await?;
            println!(
                "Fetched {} papers, {} new to the index",
                report.fetched, report.added
            );
        }
        Commands::Search { query, mode } => match assistant.search(&query, mode.mode()).await {
            SearchReport::Found(results) => {
                for (index, result) in results.iter().enumerate() {
                    println!("{}. [{}] {}", index + 1, result.similarity, result.title());
                    println!("   {}", result.url());
                }
            }
            SearchReport::NoResults => println!("No results found"),
            SearchReport::Failed(reason) => bail!("Search failed: {}", reason),
        },
        Commands::Summarize {
            query,
            mode,
            strategy,
        } => {
            let outcome = assistant
                .summarize_query(&query, mode.mode(), strategy)
                .await?;
            println!("{}", outcome);
            if let SummaryOutcome::Summary(result) = &outcome {
                println!("\nBased on:");
                for title in &result.contributing_titles {
                    println!("  - {}", title);
                }
            }
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Chat => bail!("chat runs interactively"),
        Commands::Aggregate { target, sources } => {
            let sources = if sources.is_empty() {
                &config.data_sources
            } else {
                &sources
            };
            if sources.is_empty() {
                bail!("no data sources given; pass --source key=url or set DATA_SOURCES");
            }
            let sources = sources
                .iter()
                .map(|s| SourceRequest::parse(s))
                .collect::<medlit::Result<Vec<_>>>()?;
            let aggregator = Aggregator::new()?;
            let analysis = assistant
                .therapeutic_analysis(&aggregator, &sources, &target)
                .await?;
            println!("{}", analysis.trim());
        }
        Commands::Stats => {
            let stats = assistant.stats().await?;
            println!("Documents:           {}", stats.documents);
            println!(
                "Embedding model:     {}",
                stats.embedding_model.as_deref().unwrap_or("(none yet)")
            );
            match stats.embedding_dimension {
                Some(dimension) => println!("Embedding dimension: {}", dimension),
                None => println!("Embedding dimension: (none yet)"),
            }
        }
    }

    Ok(())
}

/// Reads questions from stdin until EOF or `exit`, answering each within a
/// single session. Ctrl-C abandons the current answer, or quits at the prompt.
async fn run_chat(
    assistant: &Assistant,
    cancel: &watch::Sender<bool>,
    interrupts: &mut mpsc::Receiver<()>,
) -> Result<()> {
    let session = assistant.start_session().await;
    println!("Ask about the indexed papers. Type 'exit' to quit, Ctrl-C stops an answer.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            biased;
            Some(()) = interrupts.recv() => {
                interrupted = true;
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        // Re-arm generation after a Ctrl-C during the previous answer.
        cancel.send_replace(false);
        tokio::select! {
            biased;
            Some(()) = interrupts.recv() => println!("\n(answer interrupted)\n"),
            reply = assistant.chat(session.id, question) => match reply {
                Ok(reply) => println!("\n{}\n", reply.format_with_references()),
                Err(e) => eprintln!("Could not answer: {}", e),
            },
        }
    }

    assistant.sessions().remove(session.id).await;
    if interrupted {
        // A blocking stdin read is still pending and would hold up runtime
        // shutdown until the next newline.
        println!();
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
    Ok(())
}
