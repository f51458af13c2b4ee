use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use qc_coaching_engine::cache::ReportCache;
use qc_coaching_engine::config::EngineConfig;
use qc_coaching_engine::db::{self, PgStore};
use qc_coaching_engine::models::ReportLookup;
use qc_coaching_engine::period::PeriodKey;
use qc_coaching_engine::pipeline::Pipeline;
use qc_coaching_engine::report;
use qc_coaching_engine::store::{EvaluationStore, InMemoryStore};

const BATCH_SECRET_ENV: &str = "COACHING_BATCH_SECRET";

#[derive(Parser)]
#[command(name = "qc-coaching")]
#[command(about = "QC coaching engine for contact-center agents", long_about = None)]
struct Cli {
    /// YAML engine configuration; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct PeriodArgs {
    /// First day of the period (defaults to the current Thursday-Wednesday week)
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,
    /// Last day of the period, inclusive
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
}

impl PeriodArgs {
    fn resolve(self) -> anyhow::Result<PeriodKey> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Ok(PeriodKey::new(start, end)?),
            _ => Ok(PeriodKey::thursday_week(Utc::now().date_naive())),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed evaluations
    Seed,
    /// Import evaluations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate and cache weekly reports for many agents
    Generate {
        #[command(flatten)]
        period: PeriodArgs,
        /// Restrict the batch to these agents (repeatable)
        #[arg(long = "agent")]
        agents: Vec<String>,
        #[arg(long)]
        workers: Option<usize>,
        /// Shared batch secret
        #[arg(long)]
        key: String,
    },
    /// Read one agent's report, generating it on a cache miss
    Report {
        #[arg(long)]
        agent: String,
        #[command(flatten)]
        period: PeriodArgs,
        /// Regenerate even when a cached report exists
        #[arg(long)]
        refresh: bool,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Emit the full report as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Run the pipeline against a CSV file without a database
    Preview {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        agent: String,
        #[command(flatten)]
        period: PeriodArgs,
        /// Print the full report as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(error = %err, "configuration rejected");
            return Err(err).context("refusing to start with an invalid configuration");
        }
    };

    match cli.command {
        Commands::CheckConfig => {
            println!(
                "Configuration v{} is valid: {} categories, {} error codes.",
                config.version,
                config.categories.len(),
                config.error_codes.len()
            );
        }
        Commands::Preview {
            csv,
            agent,
            period,
            json,
        } => {
            let period = period.resolve()?;
            let (rows, rejected) = db::read_evaluations_csv(&csv, &config)?;
            if rejected > 0 {
                warn!(rejected, "some CSV rows were rejected");
            }
            let store = Arc::new(InMemoryStore::with_records(
                rows.into_iter().map(|row| row.record).collect(),
            ));
            let cache = ReportCache::new(Pipeline::new(config, Arc::clone(&store)), store);
            let lookup = cache.generate(&agent, period).await?;
            print!("{}", render(&lookup, json)?);
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new evaluations).");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let summary = db::import_csv(&pool, &csv, &config).await?;
            println!(
                "Inserted {} evaluations from {} ({} rejected).",
                summary.inserted,
                csv.display(),
                summary.rejected
            );
        }
        Commands::Generate {
            period,
            agents,
            workers,
            key,
        } => {
            let expected = std::env::var(BATCH_SECRET_ENV)
                .with_context(|| format!("{BATCH_SECRET_ENV} must be set to run batches"))?;
            if !secrets_match(&key, &expected) {
                anyhow::bail!("batch key rejected");
            }

            let period = period.resolve()?;
            let cache = Arc::new(open_cache(Arc::clone(&config)).await?);
            let workers = workers.unwrap_or(config.batch.workers);
            let agents = (!agents.is_empty()).then_some(agents);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; finishing in-flight agents");
                    let _ = shutdown_tx.send(true);
                }
            });

            let job = cache
                .generate_batch(agents, period, workers, shutdown_rx)
                .await?;
            println!(
                "Job {} {}: generated {} of {} reports for {} ({} skipped) in {:.1}s.",
                job.job_id,
                job.status.as_str(),
                job.generated,
                job.requested,
                job.period,
                job.skipped,
                job.elapsed_seconds()
            );
        }
        Commands::Report {
            agent,
            period,
            refresh,
            out,
            json,
        } => {
            let period = period.resolve()?;
            let cache = open_cache(config).await?;
            let lookup = if refresh {
                cache.generate(&agent, period).await?
            } else {
                cache.get_or_generate(&agent, period).await?
            };
            let rendered = render(&lookup, json)?;
            match out {
                Some(out) => {
                    std::fs::write(&out, rendered)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!(
                        "Report for {} ({}) written to {}.",
                        agent,
                        lookup.source.as_str(),
                        out.display()
                    );
                }
                None => print!("{rendered}"),
            }
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Connects, checks the stored error codes against the catalog and builds the cache.
async fn open_cache(config: Arc<EngineConfig>) -> anyhow::Result<ReportCache<PgStore, PgStore>> {
    let store = Arc::new(PgStore::new(connect().await?));
    let codes = store.error_codes_in_use().await?;
    if let Err(err) = config.validate_store_codes(codes.iter().map(String::as_str)) {
        error!(error = %err, "evaluation store carries unclassifiable error codes");
        return Err(err).context("configuration does not cover the evaluation store");
    }
    Ok(ReportCache::new(
        Pipeline::new(config, Arc::clone(&store)),
        store,
    ))
}

fn render(lookup: &ReportLookup, json: bool) -> anyhow::Result<String> {
    if json {
        let mut rendered = serde_json::to_string_pretty(&lookup.report)
            .context("failed to serialize report")?;
        rendered.push('\n');
        Ok(rendered)
    } else {
        Ok(report::build_report(&lookup.report, lookup.source))
    }
}

fn secrets_match(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}
