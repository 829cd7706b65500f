use anyhow::Context;
use clap::{Parser, Subcommand};
use providers::chroma::{ChromaClient, ChromaConfig};
use providers::noop::NoopProvider;
use providers::ollama::{OllamaConfig, OllamaProvider};
use providers::ProviderRegistry;
use smartsort_cli::{folders, walk};
use smartsort_core::analysis::AnalysisClient;
use smartsort_core::config::{self, AppConfig};
use smartsort_core::index::{ChromaIndex, MemoryIndex, VectorIndex};
use smartsort_core::matcher::FolderMatcher;
use smartsort_core::models::SmartFolder;
use smartsort_core::pipeline::Orchestrator;
use smartsort_core::writeback::WriteBackQueue;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "smartsort", about = "Classify files into smart folders")]
struct Cli {
    /// Path to a config file (TOML); defaults to config/default.toml.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze files or directories, printing one JSON result per file.
    Analyze {
        paths: Vec<PathBuf>,
        /// Directory of folder-catalog TOML files.
        #[arg(long)]
        folders: Option<PathBuf>,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Glob patterns to skip while walking directories.
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        pretty: bool,
    },
    /// Probe backend and vector-index health.
    Status,
    /// Rebuild folder vectors in the index from the catalog.
    RebuildFolders {
        #[arg(long)]
        folders: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            paths,
            folders,
            concurrency,
            exclude,
            pretty,
        } => run_analyze(cfg, paths, folders, concurrency, exclude, pretty).await,
        Commands::Status => run_status(cfg).await,
        Commands::RebuildFolders { folders } => run_rebuild(cfg, folders).await,
    }
}

struct Services {
    orchestrator: Orchestrator,
    matcher: Arc<FolderMatcher>,
    writeback: Arc<WriteBackQueue>,
    index: Arc<dyn VectorIndex>,
}

fn build_registry(cfg: &AppConfig) -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new()
        .with_embedding("noop", Arc::new(NoopProvider))
        .with_generation("noop", Arc::new(NoopProvider));

    if cfg.backend.provider == "ollama" {
        let provider = OllamaProvider::new(OllamaConfig {
            base_url: cfg.backend.host.clone(),
            generate_model: cfg.backend.generate_model.clone(),
            embed_model: cfg.backend.embed_model.clone(),
            timeout_secs: cfg.backend.timeout_secs,
            max_retries: cfg.backend.max_retries,
        })
        .context("building ollama provider")?;
        registry = registry
            .with_generation("ollama", Arc::new(provider.clone()))
            .with_embedding("ollama", Arc::new(provider));
    }

    Ok(registry
        .set_preferred_embedding(&cfg.backend.provider)
        .set_preferred_generation(&cfg.backend.provider))
}

fn build_index(cfg: &AppConfig) -> Arc<dyn VectorIndex> {
    match &cfg.index.url {
        Some(url) => {
            let client = ChromaClient::new(ChromaConfig { url: url.clone() });
            Arc::new(ChromaIndex::new(client, cfg.index.clone()))
        }
        None => {
            info!("no vector index configured, using the in-memory index");
            Arc::new(MemoryIndex::new())
        }
    }
}

/// Composes every service once; the orchestrator and its collaborators
/// share these instances for the whole run.
fn build_services(cfg: AppConfig) -> anyhow::Result<Services> {
    let registry = build_registry(&cfg)?;
    let generation = registry.generation(None)?;
    let embedding = registry.embedding(None)?;
    let index = build_index(&cfg);

    let matcher = Arc::new(FolderMatcher::new(
        embedding,
        index.clone(),
        cfg.matching.clone(),
        Duration::from_secs(cfg.backend.embed_budget_secs),
        cfg.caches.embedding_capacity,
        cfg.caches.query_capacity,
        Duration::from_secs(cfg.caches.query_ttl_secs),
    ));
    let writeback = Arc::new(WriteBackQueue::new(index.clone(), cfg.writeback.clone()));
    let analysis = AnalysisClient::new(
        generation,
        Duration::from_secs(cfg.backend.generate_budget_secs),
        cfg.backend.preflight_attempts,
        Duration::from_millis(cfg.backend.preflight_delay_ms),
        cfg.matching.min_heuristic_score,
    );
    let orchestrator = Orchestrator::new(cfg, analysis, matcher.clone(), writeback.clone());
    Ok(Services {
        orchestrator,
        matcher,
        writeback,
        index,
    })
}

fn load_catalog(dir: Option<&PathBuf>) -> anyhow::Result<Vec<SmartFolder>> {
    match dir {
        Some(dir) => folders::load_folders_from_dir(dir),
        None => Ok(Vec::new()),
    }
}

async fn run_analyze(
    cfg: AppConfig,
    paths: Vec<PathBuf>,
    folders_dir: Option<PathBuf>,
    concurrency: usize,
    exclude: Vec<String>,
    pretty: bool,
) -> anyhow::Result<()> {
    let catalog = load_catalog(folders_dir.as_ref())?;
    let files = walk::collect_files(&paths, &exclude)?;
    if files.is_empty() {
        warn!("nothing to analyze");
        return Ok(());
    }
    info!(files = files.len(), folders = catalog.len(), "starting analysis");

    let services = build_services(cfg)?;
    if !catalog.is_empty() {
        // Best effort: analysis still works without folder vectors.
        if let Err(e) = services.matcher.rebuild_folders(&catalog).await {
            warn!(error = %e, "folder vector rebuild failed, refinement degraded");
        }
    }

    let results = services
        .orchestrator
        .analyze_many(&files, &catalog, concurrency)
        .await;
    for (path, result) in &results {
        let line = serde_json::json!({
            "path": path.to_string_lossy(),
            "result": result,
        });
        if pretty {
            println!("{}", serde_json::to_string_pretty(&line)?);
        } else {
            println!("{}", serde_json::to_string(&line)?);
        }
    }

    // One-shot process: drain pending vector writes before exiting.
    services.writeback.flush().await;
    Ok(())
}

async fn run_status(cfg: AppConfig) -> anyhow::Result<()> {
    let services = build_services(cfg)?;
    let backend_ok = services.orchestrator.preflight().await;
    let index_ok = services.index.health_check().await;
    let status = serde_json::json!({
        "backend": if backend_ok { "ok" } else { "unreachable" },
        "index": match &index_ok {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_rebuild(cfg: AppConfig, folders_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let catalog = load_catalog(folders_dir.as_ref())?;
    anyhow::ensure!(!catalog.is_empty(), "no folder catalog found");
    let services = build_services(cfg)?;
    let report = services.matcher.rebuild_folders(&catalog).await?;
    info!(
        written = report.written,
        skipped = report.skipped.len(),
        "folder vectors rebuilt"
    );
    for (id, reason) in report.skipped {
        warn!(id, reason, "folder vector skipped");
    }
    Ok(())
}
