//! Layered configuration.
//!
//! Priority, highest first: CLI flags, `MEDGRAPH_`-prefixed environment
//! variables (`MEDGRAPH_REASONING__MAX_HOPS=4`), the config file, defaults.

use crate::llm::{LlmSettings, Provider};
use crate::rag::community::louvain::LouvainConfig;
use crate::rag::retrieval::HybridRetrieverConfig;
use crate::reasoning::ReasoningConfig;
use anyhow::bail;
use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Command Line
// =============================================================================

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<String>,

    /// Maximum retrieval hops per question
    #[arg(long, global = true)]
    pub max_hops: Option<usize>,

    /// Evidence items kept per hop
    #[arg(long, global = true)]
    pub top_k: Option<usize>,

    /// Store backend: memory or surrealdb
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// JSON graph loaded into the store at startup
    #[arg(long, global = true)]
    pub seed_file: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Answer one question
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// Print the outcome and its evaluation record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive question loop
    Repl,
    /// Detect communities and write the assignment back to the store
    Communities {
        /// Ask the language model for community summaries
        #[arg(long)]
        summarize: bool,
    },
    /// Upsert a prepared JSON graph into the configured store
    Load { file: PathBuf },
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub reasoning: ReasoningSettings,
    pub retrieval: RetrievalSettings,
    pub community: CommunitySettings,
    pub resilience: ResilienceSettings,
    pub persistence: PersistenceSettings,
    pub embedding: EmbeddingSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReasoningSettings {
    pub max_hops: usize,
    pub min_evidence: usize,
    pub top_k: usize,
    pub max_plan_steps: usize,
    pub synthesis_retries: usize,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        let d = ReasoningConfig::default();
        Self {
            max_hops: d.max_hops,
            min_evidence: d.min_evidence,
            top_k: d.top_k,
            max_plan_steps: d.max_plan_steps,
            synthesis_retries: d.synthesis_retries,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalSettings {
    pub graph_max_hops: usize,
    pub min_vector_score: f32,
    pub graph_base_score: f32,
    pub fallback_communities: usize,
    pub fallback_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        let d = HybridRetrieverConfig::default();
        Self {
            graph_max_hops: d.graph_max_hops,
            min_vector_score: d.min_vector_score,
            graph_base_score: d.graph_base_score,
            fallback_communities: d.fallback_communities,
            fallback_score: d.fallback_score,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommunitySettings {
    pub resolution: f64,
    pub max_levels: usize,
    /// Run detection once the stores are ready
    pub detect_on_startup: bool,
    /// Use the language model for summaries
    pub summarize: bool,
}

impl Default for CommunitySettings {
    fn default() -> Self {
        let d = LouvainConfig::default();
        Self {
            resolution: d.resolution,
            max_levels: d.max_levels,
            detect_on_startup: true,
            summarize: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ResilienceSettings {
    pub backend_timeout_ms: u64,
    pub llm_timeout_ms: u64,
    pub llm_requests_per_second: u32,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 5_000,
            llm_timeout_ms: 30_000,
            llm_requests_per_second: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    #[default]
    Memory,
    Surrealdb,
}

impl std::str::FromStr for StoreProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "surrealdb" | "surreal" => Ok(Self::Surrealdb),
            other => Err(format!("unknown store provider '{other}'")),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceSettings {
    pub provider: StoreProvider,
    /// `mem://`, `surrealkv://path` or `ws://host`
    pub database_url: String,
    pub seed_file: Option<String>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            provider: StoreProvider::Memory,
            database_url: "mem://".to_string(),
            seed_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Fastembed,
    Hashing,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    /// Only used by the hashing embedder; fastembed is fixed at 384
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Fastembed,
            dimension: 384,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::load_from_cli(&cli)
    }

    pub fn load_from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // Config file: explicit path must exist, ./config.yaml is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::from(Path::new(path)).required(true)),
            None => builder.add_source(File::from(Path::new("config.yaml")).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("MEDGRAPH")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(hops) = cli.max_hops {
            builder = builder.set_override("reasoning.max_hops", hops as u64)?;
        }
        if let Some(k) = cli.top_k {
            builder = builder.set_override("reasoning.top_k", k as u64)?;
        }
        if let Some(store) = &cli.store {
            let provider: StoreProvider = store.parse().map_err(config::ConfigError::Message)?;
            let value = match provider {
                StoreProvider::Memory => "memory",
                StoreProvider::Surrealdb => "surrealdb",
            };
            builder = builder.set_override("persistence.provider", value)?;
        }
        if let Some(seed) = &cli.seed_file {
            builder = builder.set_override("persistence.seed_file", seed.as_str())?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn reasoning_config(&self) -> ReasoningConfig {
        ReasoningConfig {
            max_hops: self.reasoning.max_hops,
            min_evidence: self.reasoning.min_evidence,
            top_k: self.reasoning.top_k,
            max_plan_steps: self.reasoning.max_plan_steps,
            synthesis_retries: self.reasoning.synthesis_retries,
            llm_timeout: Duration::from_millis(self.resilience.llm_timeout_ms),
        }
    }

    pub fn retriever_config(&self) -> HybridRetrieverConfig {
        HybridRetrieverConfig {
            graph_max_hops: self.retrieval.graph_max_hops,
            min_vector_score: self.retrieval.min_vector_score,
            graph_base_score: self.retrieval.graph_base_score,
            fallback_communities: self.retrieval.fallback_communities,
            fallback_score: self.retrieval.fallback_score,
            backend_timeout: Duration::from_millis(self.resilience.backend_timeout_ms),
        }
    }

    pub fn louvain_config(&self) -> LouvainConfig {
        LouvainConfig {
            resolution: self.community.resolution,
            max_levels: self.community.max_levels,
            ..LouvainConfig::default()
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.resilience.llm_timeout_ms)
    }
}

// =============================================================================
// Language Model Connection
// =============================================================================

/// Read the language-model endpoint from `LLM_*` / `AZURE_*` variables.
pub fn load_llm_settings() -> anyhow::Result<LlmSettings> {
    let base_url = std::env::var("LLM_BASE_URL").unwrap_or_default();
    if base_url.trim().is_empty() {
        bail!("Missing required env var: LLM_BASE_URL");
    }

    let model = std::env::var("LLM_MODEL").unwrap_or_default();
    if model.trim().is_empty() {
        bail!("Missing required env var: LLM_MODEL");
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let provider = Provider::detect_from_url(&base_url).with_azure_deployment(
        std::env::var("AZURE_DEPLOYMENT_NAME").ok(),
        std::env::var("AZURE_API_VERSION").ok(),
    );

    let temperature = std::env::var("LLM_TEMPERATURE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        provider,
        temperature,
    })
}
