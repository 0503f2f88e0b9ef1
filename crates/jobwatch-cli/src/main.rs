use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jobwatch_match::{MatchingEngine, RecommendationCategory};
use jobwatch_storage::PgPostingStore;
use jobwatch_sync::{
    build_pipeline, open_store, start_periodic_crawling, CrawlPipeline, CycleOutcome, LoggingNotifier,
    StaticProfileDirectory, SyncConfig,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobwatch")]
#[command(about = "Government job listing crawler and learner matcher")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one crawl cycle over the enabled sources.
    Crawl,
    /// Crawl now and then on the configured interval until ctrl-c.
    Schedule,
    /// Mark postings past their deadline as expired.
    Cleanup,
    /// Ranked matches for a learner.
    Match {
        learner_id: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Category recommendations for a learner.
    Recommend {
        learner_id: String,
        #[arg(long, default_value = "recent")]
        category: RecommendationCategory,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Serve the JSON API.
    Serve {
        /// Also run the periodic crawler.
        #[arg(long)]
        schedule: bool,
    },
    /// Apply database migrations.
    Migrate,
}

fn init_tracing() {
    let json = std::env::var("JOBWATCH_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,jobwatch=info".into()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .init();
}

async fn pipeline(config: &SyncConfig) -> Result<Arc<CrawlPipeline>> {
    let store = open_store(config).await?;
    let profiles = Arc::new(StaticProfileDirectory::load(&config.profiles_path).await?);
    let pipeline = build_pipeline(config, store, profiles, Arc::new(LoggingNotifier)).await?;
    Ok(Arc::new(pipeline))
}

async fn engine(config: &SyncConfig) -> Result<MatchingEngine> {
    let store = open_store(config).await?;
    let profiles = StaticProfileDirectory::load(&config.profiles_path).await?;
    Ok(MatchingEngine::new(store, Arc::new(profiles)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Crawl) {
        Commands::Crawl => {
            let pipeline = pipeline(&config).await?;
            match pipeline.crawl_all_sources().await {
                CycleOutcome::Completed(report) => print_json(&report)?,
                CycleOutcome::Skipped => bail!("a crawl cycle is already running"),
            }
        }
        Commands::Schedule => {
            let pipeline = pipeline(&config).await?;
            let mut sched = start_periodic_crawling(pipeline, config.crawl_interval).await?;
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Cleanup => {
            let pipeline = pipeline(&config).await?;
            let expired = pipeline.cleanup_expired_jobs().await?;
            println!("expired {expired} postings");
        }
        Commands::Match { learner_id, limit } => {
            let engine = engine(&config).await?;
            print_json(&engine.find_matching_jobs(&learner_id, limit).await?)?;
        }
        Commands::Recommend {
            learner_id,
            category,
            limit,
        } => {
            let engine = engine(&config).await?;
            print_json(&engine.get_job_recommendations(&learner_id, category, limit).await?)?;
        }
        Commands::Serve { schedule } => jobwatch_web::serve(&config, schedule).await?,
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            PgPostingStore::connect(url).await?.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
