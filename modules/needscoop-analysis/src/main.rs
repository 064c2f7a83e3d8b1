use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use needscoop_common::{
    load_config, AppConfig, PipelineConfig, PostSource, ReportBuilder, RuleSource,
};
use needscoop_store::{MemoryPostStore, MemoryVectorStore, ResultBoard, StoreSnapshot};

use needscoop_analysis::infra::{ClaudeOracle, Embedder, JsonReportWriter, JsonlPostSource};
use needscoop_analysis::pipeline::{
    rescan_posts, search, PipelineCoordinator, RunOptions, SearchFilter,
};
use needscoop_analysis::signals::{FileRuleSource, RuleBook};

#[derive(Parser)]
#[command(name = "needscoop", about = "Find clusters of unmet needs in social posts")]
struct Cli {
    /// Pipeline config TOML. Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Signal rules TOML. Overrides `signals.rules_path`.
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Store snapshot carried between runs.
    #[arg(long, global = true, default_value = "./data/needscoop-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify, embed, cluster, score and publish a ranking.
    Analyze {
        /// Collector feed, one JSON post per line.
        #[arg(long)]
        posts: PathBuf,
        /// Where to write the published ranking.
        #[arg(long, default_value = "./data/report.json")]
        report: PathBuf,
    },
    /// Classify and embed only. Marks the published ranking stale.
    Embed {
        #[arg(long)]
        posts: PathBuf,
    },
    /// Re-classify stored posts under the current rules.
    Rescan,
    /// Semantic search over stored posts.
    Search {
        query: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        min_likes: Option<u64>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("needscoop=info".parse()?))
        .init();

    let cli = Cli::parse();
    let env = AppConfig::from_env()?;

    let config_path = cli
        .config
        .clone()
        .or_else(|| env.config_path.as_ref().map(PathBuf::from));
    let config = match &config_path {
        Some(path) => {
            info!(config = %path.display(), "Loading config");
            load_config(path)?
        }
        None => PipelineConfig::default(),
    };
    config.validate()?;

    let rules_path = cli.rules.clone().unwrap_or_else(|| config.signals.rules_path.clone());
    let rule_config = FileRuleSource::new(&rules_path).load_rules().await?;
    let rules = RuleBook::compile(&rule_config)?;
    info!(rules = %rules_path.display(), version = rules.version(), "Signal rules loaded");

    let snapshot = StoreSnapshot::load(&cli.state)?;
    let (vectors, posts, published) = snapshot.into_stores()?;
    let vectors = Arc::new(vectors);
    let posts = Arc::new(posts);
    let board = Arc::new(ResultBoard::with_run(published));

    match cli.command {
        Command::Rescan => {
            let report = rescan_posts(posts.as_ref(), &rules).await?;
            println!("{report}");
            save_state(&cli.state, &vectors, &posts, &board)?;
        }
        Command::Search {
            query,
            category,
            min_likes,
            limit,
        } => {
            let filter = SearchFilter {
                category,
                min_likes,
            };
            let embedder = build_embedder(&env, &config)?;
            let hits = search(
                &embedder,
                vectors.as_ref(),
                posts.as_ref(),
                &query,
                limit,
                &filter,
            )
            .await?;
            for hit in hits {
                println!(
                    "{:.4}  [{}]  {}  {}",
                    hit.distance,
                    hit.primary.as_deref().unwrap_or("-"),
                    hit.post.id,
                    hit.post.text.replace('\n', " "),
                );
            }
        }
        command => {
            let oracle = Arc::new(ClaudeOracle::new(
                env.require_anthropic_key()?,
                &config.oracle.model,
            ));
            let coordinator = PipelineCoordinator::builder()
                .embedder(Arc::new(build_embedder(&env, &config)?))
                .oracle(oracle)
                .vectors(vectors.clone())
                .posts(posts.clone())
                .board(board.clone())
                .build();

            let options = RunOptions::default();
            spawn_cancel_on_ctrl_c(options.cancel.clone());

            let outcome = execute(command, &coordinator, &config, &rules, options).await;
            // Vectors and annotations written before a failure are kept.
            save_state(&cli.state, &vectors, &posts, &board)?;
            outcome?;
        }
    }

    Ok(())
}

async fn execute(
    command: Command,
    coordinator: &PipelineCoordinator,
    config: &PipelineConfig,
    rules: &RuleBook,
    options: RunOptions,
) -> Result<()> {
    match command {
        Command::Analyze { posts, report } => {
            let corpus = JsonlPostSource::new(&posts).snapshot().await?;
            let run = coordinator.run(corpus, config, rules, options).await?;
            JsonReportWriter::new(&report).build(&run).await?;
            info!(report = %report.display(), "Report written");
            println!("{}", run.summary);
        }
        Command::Embed { posts } => {
            let corpus = JsonlPostSource::new(&posts).snapshot().await?;
            let report = coordinator.embed_only(corpus, config, rules, options).await?;
            println!("{}", report.stats);
            if report.marked_stale {
                println!("Published ranking marked stale; run `needscoop analyze` to refresh.");
            }
        }
        Command::Rescan | Command::Search { .. } => {}
    }
    Ok(())
}

/// Only the commands that call the embedding provider need its key.
fn build_embedder(env: &AppConfig, config: &PipelineConfig) -> Result<Embedder> {
    Ok(Embedder::new(
        env.require_openai_key()?,
        &config.embedding,
        env.embedding_base_url.as_deref(),
    ))
}

fn spawn_cancel_on_ctrl_c(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current step");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

fn save_state(
    path: &Path,
    vectors: &MemoryVectorStore,
    posts: &MemoryPostStore,
    board: &ResultBoard,
) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    }
    let published = board.current().map(|run| (*run).clone());
    StoreSnapshot::capture(vectors, posts, published)?.save(path)
}
