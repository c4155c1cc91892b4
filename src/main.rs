//! # Ask2 CLI (`ask2`)
//!
//! Operator interface for the Sustainacore ask service.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ask2 init` | Create the SQLite candidate-store schema |
//! | `ask2 check` | Verify store reachability and embedding parity |
//! | `ask2 ask "<question>"` | Run one question through the full pipeline |
//! | `ask2 serve` | Start the HTTP service (`POST /ask2`, `GET /health`) |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the store
//! ask2 init --config ./config/ask2.toml
//!
//! # Parity and health probe (non-zero exit on strict-parity mismatch)
//! ask2 check --config ./config/ask2.toml
//!
//! # One-shot question with a scope override
//! ask2 ask "Is Microsoft in the TECH100 index?" --docset membership
//!
//! # Serve traffic
//! ask2 serve --config ./config/ask2.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sustainacore_ask::config;
use sustainacore_ask::migrate;
use sustainacore_ask::models::ScopeHint;
use sustainacore_ask::orchestrate::{AskRequest, Orchestrator};
use sustainacore_ask::server;

/// Sustainacore ask service — retrieval and answer orchestration for the
/// `/ask2` endpoint.
#[derive(Parser)]
#[command(
    name = "ask2",
    about = "Sustainacore ask service — retrieval and answer orchestration for /ask2",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ask2.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the candidate-store schema.
    ///
    /// Creates the SQLite database file, the documents table, and the
    /// corpus_meta row. Idempotent — running it multiple times is safe.
    /// Document rows themselves are written by external ingestion jobs.
    Init,

    /// Verify store reachability and embedding parity.
    ///
    /// Prints the corpus embedding identity, the configured identity, and
    /// the document count. Exits non-zero when strict parity is on and the
    /// two disagree — wire this into the deploy gate.
    Check,

    /// Run one question through the full pipeline and print the answer.
    Ask {
        /// The question text.
        question: String,

        /// Candidate pool size per query variant.
        #[arg(long)]
        k: Option<i64>,

        /// Restrict retrieval to one docset (membership, profiles,
        /// regulatory, site).
        #[arg(long)]
        docset: Option<String>,

        /// Restrict retrieval to one ticker symbol.
        #[arg(long)]
        ticker: Option<String>,

        /// Restrict retrieval to documents about one company.
        #[arg(long)]
        company: Option<String>,
    },

    /// Start the HTTP service.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sustainacore_ask=info,ask2=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Candidate store initialized successfully.");
        }
        Commands::Check => {
            run_check(&cfg).await?;
        }
        Commands::Ask {
            question,
            k,
            docset,
            ticker,
            company,
        } => {
            Orchestrator::validate(&question, k)?;
            let orchestrator = Orchestrator::from_config(&cfg).await?;
            let request = AskRequest {
                q: question,
                k,
                hint: ScopeHint {
                    docset,
                    namespace: None,
                    ticker,
                    company,
                },
            };
            let payload = orchestrator.handle(&request).await;

            println!("{}", payload.answer);
            if !payload.sources.is_empty() {
                println!();
                println!("Sources:");
                for (i, source) in payload.sources.iter().enumerate() {
                    println!("  {}. {}", i + 1, source);
                }
            }
            println!();
            println!(
                "top_score: {:.3}  total: {}ms (plan {} / retrieve {} / fuse {} / compose {})",
                payload.meta.top_score,
                payload.meta.latency_ms.total,
                payload.meta.latency_ms.plan,
                payload.meta.latency_ms.retrieve,
                payload.meta.latency_ms.fuse,
                payload.meta.latency_ms.compose,
            );
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Parity and health probe backing `ask2 check`.
async fn run_check(cfg: &config::Config) -> anyhow::Result<()> {
    use sustainacore_ask::db;
    use sustainacore_ask::embedding;
    use sustainacore_ask::store::CandidateStore;

    let provider = embedding::create_provider(&cfg.embedding)?;
    let pool = db::connect(cfg).await?;
    let store = CandidateStore::new(pool, provider.model_name().to_string(), provider.dims());

    println!(
        "configured embedding: {}/{}",
        provider.model_name(),
        provider.dims()
    );

    match store.corpus_identity().await? {
        Some((model, dims)) => println!("corpus embedding:     {}/{}", model, dims),
        None => println!("corpus embedding:     (corpus_meta empty)"),
    }

    let count = store.document_count().await?;
    println!("documents:            {}", count);

    match store.verify_parity().await {
        Ok(()) => {
            println!("parity:               ok");
            Ok(())
        }
        Err(e) => {
            println!("parity:               MISMATCH");
            if cfg.embedding.strict_parity {
                Err(e.into())
            } else {
                println!("(strict_parity is off; service would degrade at request time)");
                Ok(())
            }
        }
    }
}
