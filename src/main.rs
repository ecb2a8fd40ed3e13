//! MedGraph RAG command line
//!
//! Entry point for asking questions against a prepared knowledge graph.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use medgraph_rag::config::{AppConfig, Cli, Command, EmbeddingProvider, StoreProvider, load_llm_settings};
use medgraph_rag::domain::ReasoningOutcome;
use medgraph_rag::llm::{ChatCompletionsModel, LanguageModel};
use medgraph_rag::persistence::providers::{InMemoryGraphStore, InMemoryVectorIndex, SurrealStore};
use medgraph_rag::persistence::{GraphSeed, GraphStore, VectorIndex};
use medgraph_rag::rag::embedding::{Embedder, FastEmbedder, HashingEmbedder};
use medgraph_rag::{Engine, ReasoningError, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();
    telemetry::init();

    let cli = Cli::parse();
    let config = AppConfig::load_from_cli(&cli).context("loading configuration")?;
    let command = cli.command.clone().unwrap_or(Command::Repl);

    let (graph, vectors) = open_stores(&config).await?;
    let embedder = build_embedder(&config).await?;

    if let Command::Load { file } = &command {
        let count = load_seed(file, graph.as_ref(), vectors.as_ref(), embedder.as_ref()).await?;
        println!("Loaded {count} chunks from {}", file.display());
        return Ok(());
    }
    if let Some(seed) = &config.persistence.seed_file {
        load_seed(std::path::Path::new(seed), graph.as_ref(), vectors.as_ref(), embedder.as_ref()).await?;
    }

    let settings = load_llm_settings().context("Configuration error")?;
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        "LLM configuration loaded"
    );
    let model: Arc<dyn LanguageModel> = Arc::new(ChatCompletionsModel::new(
        settings,
        config.resilience.llm_requests_per_second,
    ));

    let engine = Engine::build(config, graph, vectors, embedder, model).await?;

    match command {
        Command::Ask { question, json } => ask(&engine, &question.join(" "), json).await,
        Command::Repl => repl(&engine).await,
        Command::Communities { summarize } => {
            let count = engine.refresh_communities(summarize).await?;
            println!("{count} communities");
            for community in engine.communities().await? {
                println!("  {:<14} {:>4}  {}", community.id, community.size, community.summary);
            }
            Ok(())
        }
        Command::Load { .. } => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

async fn open_stores(config: &AppConfig) -> anyhow::Result<(Arc<dyn GraphStore>, Arc<dyn VectorIndex>)> {
    match config.persistence.provider {
        StoreProvider::Memory => {
            info!(name: "store.opened", provider = "memory", "Store opened");
            Ok((Arc::new(InMemoryGraphStore::new()), Arc::new(InMemoryVectorIndex::new())))
        }
        StoreProvider::Surrealdb => {
            let url = &config.persistence.database_url;
            let store = Arc::new(
                SurrealStore::new(url)
                    .await
                    .with_context(|| format!("connecting to SurrealDB at {url}"))?,
            );
            info!(name: "store.opened", provider = "surrealdb", url = %url, "Store opened");
            let graph: Arc<dyn GraphStore> = store.clone();
            Ok((graph, store))
        }
    }
}

/// Load the embedding model up front so queries never pay for it.
async fn build_embedder(config: &AppConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.embedding.provider {
        EmbeddingProvider::Fastembed => {
            let embedder = FastEmbedder::new();
            embedder.initialize().await?;
            Ok(Arc::new(embedder))
        }
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.embedding.dimension))),
    }
}

async fn load_seed(
    path: &std::path::Path,
    graph: &dyn GraphStore,
    vectors: &dyn VectorIndex,
    embedder: &dyn Embedder,
) -> anyhow::Result<usize> {
    let mut seed = GraphSeed::from_file(path)?;
    let embedded = seed.embed_missing(embedder).await?;
    info!(embedded, "Seed chunks embedded");
    seed.load_into(graph, vectors).await?;
    Ok(seed.chunks.len())
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Run one question; Ctrl-C cancels it at the next state boundary.
async fn run_cancellable(engine: &Engine, question: &str) -> Result<ReasoningOutcome, ReasoningError> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let result = engine.ask(question, &cancel).await;
    watcher.abort();
    result
}

async fn ask(engine: &Engine, question: &str, json: bool) -> anyhow::Result<()> {
    let result = run_cancellable(engine, question).await;
    if json {
        let value = match &result {
            Ok(outcome) => serde_json::json!({
                "outcome": outcome,
                "evaluation": outcome.evaluation_record(),
            }),
            Err(e) => serde_json::json!({ "error": e.report() }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return result.map(|_| ()).map_err(Into::into);
    }

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(())
        }
        Err(e) => {
            print_failure(&e);
            Err(e.into())
        }
    }
}

async fn repl(engine: &Engine) -> anyhow::Result<()> {
    println!("Ask a question (exit, quit or q to leave).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit" | "q") {
            break;
        }

        match run_cancellable(engine, question).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => print_failure(&e),
        }
    }
    Ok(())
}

fn print_outcome(outcome: &ReasoningOutcome) {
    println!("Plan:");
    for (i, step) in outcome.state.plan.iter().enumerate() {
        println!("  {}. {step}", i + 1);
    }
    println!(
        "Hops: {}  Verdict: {:?}  Evidence: {}  Confidence: {:?}",
        outcome.state.hop_count,
        outcome.verdict,
        outcome.state.evidence.len(),
        outcome.answer.confidence
    );
    println!();
    println!("{}", outcome.answer.text);
    println!();
    println!("Sources:");
    for (i, item) in outcome.state.evidence.iter().enumerate() {
        println!("  [E{}] {:?} {} ({:.2})", i + 1, item.kind, item.source_ref, item.score);
    }
}

fn print_failure(err: &ReasoningError) {
    eprintln!("{} [{}]", err, err.code());
    for event in err.trace() {
        eprintln!("  {:?} {:?}", event.phase, event.kind);
    }
}
