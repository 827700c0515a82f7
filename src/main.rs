//! SnapStep Guide Export Worker Service
//!
//! Polls the Redis job store for pending export jobs and renders each guide to a PDF
//! stored in blob storage.
//!
//! ## Architecture
//!
//! - **Jobs**: Redis JSON records (`snapstep:export:job:{job_id}`) plus a pending
//!   index (`snapstep:export:pending`)
//! - **Guides**: Postgres (`guides`, `steps`, `annotations`)
//! - **Blobs**: S3/MinIO bucket or a local directory
//! - **Telemetry**: OpenTelemetry OTLP export
//!
//! ## Configuration
//!
//! Environment variables (a `.env` file is loaded when present):
//! - `REDIS_URL`: Redis connection string (default: redis://127.0.0.1/)
//! - `DATABASE_URL`: Postgres connection string
//! - `BLOB_BACKEND`: `s3` (default) or `local`
//! - `WORKER_CONCURRENCY`: Jobs claimed per poll (default: 2)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: Log level (default: info)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use snapstep_export_worker::blob::{BlobStore, LocalBlobStore, S3BlobStore};
use snapstep_export_worker::clock::SystemClock;
use snapstep_export_worker::config::{BlobBackend, WorkerConfig};
use snapstep_export_worker::credentials;
use snapstep_export_worker::guides::PgGuideStore;
use snapstep_export_worker::job::{ExportJob, JobStatus, DEFAULT_FORMAT};
use snapstep_export_worker::normalize::ImageNormalizer;
use snapstep_export_worker::processor::{ExportProcessor, JobOutcome};
use snapstep_export_worker::queue::{JobStore, RedisJobStore};
use snapstep_export_worker::telemetry;
use snapstep_export_worker::worker::WorkerLoop;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "snapstep-export-worker", version, about = "Renders SnapStep guides to PDF")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for pending export jobs until Ctrl+C (default)
    Run,
    /// Claim and process one job immediately
    Process { job_id: String },
    /// Create a pending export job
    Enqueue {
        #[arg(long)]
        tenant_id: i64,
        #[arg(long)]
        guide_id: i64,
        #[arg(long, default_value = DEFAULT_FORMAT)]
        format: String,
    },
    /// Show a job's status, and a download link once it has completed
    Status { job_id: String },
    /// Print an Argon2 hash for an account password
    HashPassword { password: String },
    /// Check a password against a stored account hash
    VerifyPassword { password: String, hash: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::HashPassword { password }) => {
            println!("{}", credentials::hash_password(password)?);
            return Ok(());
        }
        Some(Command::VerifyPassword { password, hash }) => {
            let matches = credentials::verify_password(password, hash)?;
            println!("match:  {}", matches);
            if matches && credentials::needs_rehash(hash) {
                println!("rehash: {}", credentials::hash_password(password)?);
            }
            return Ok(());
        }
        _ => {}
    }

    telemetry::init_logging();
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Process { job_id } => {
            let processor = build_processor(&config).await?;
            match processor.process(&job_id).await? {
                JobOutcome::Completed { output_key } => println!("completed: {}", output_key),
                JobOutcome::Failed { error } => println!("failed: {}", error),
                JobOutcome::Skipped => println!("skipped: job {} is not pending", job_id),
            }
            Ok(())
        }
        Command::Enqueue {
            tenant_id,
            guide_id,
            format,
        } => {
            let jobs = connect_jobs(&config).await?;
            let job = ExportJob::new(tenant_id, guide_id, Some(format), Utc::now());
            jobs.enqueue(&job).await?;
            println!("{}", job.job_id);
            Ok(())
        }
        Command::Status { job_id } => status(&config, &job_id).await,
        Command::HashPassword { .. } | Command::VerifyPassword { .. } => Ok(()),
    }
}

async fn run(config: WorkerConfig) -> Result<()> {
    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting export worker service");
    info!(
        "Configuration: redis_url={}, concurrency={}, image_max_width={}",
        config.redis_url, config.loop_settings.concurrency, config.image_max_width
    );

    let processor = build_processor(&config).await?;
    let handle = WorkerLoop::new(Arc::new(processor), config.loop_settings).start();

    info!("Worker service ready, press Ctrl+C to shutdown");
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;

    info!("Received shutdown signal, waiting for the current batch to finish...");
    handle.stop().await;

    info!("Worker service shutdown complete");
    Ok(())
}

async fn status(config: &WorkerConfig, job_id: &str) -> Result<()> {
    let jobs = connect_jobs(config).await?;
    let job = jobs
        .load_job(job_id)
        .await?
        .with_context(|| format!("Export job {} not found", job_id))?;

    println!("job:    {}", job.job_id);
    println!("guide:  {}", job.guide_id);
    println!("status: {}", job.status);
    if job.status == JobStatus::Pending {
        println!("queue:  {} pending", jobs.pending_count().await?);
    }
    if let Some(error) = &job.error_message {
        println!("error:  {}", error);
    }
    if let (JobStatus::Completed, Some(key)) = (job.status, &job.output_key) {
        let url = connect_blobs(config)
            .await
            .presign_get(key, config.download_url_ttl)
            .await
            .context("Failed to create download link")?;
        println!("output: {}", key);
        println!("url:    {}", url);
    }
    Ok(())
}

async fn build_processor(config: &WorkerConfig) -> Result<ExportProcessor> {
    let jobs = connect_jobs(config).await?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    info!("Connected to Postgres");

    Ok(ExportProcessor::new(
        Arc::new(jobs),
        Arc::new(PgGuideStore::new(pool)),
        connect_blobs(config).await,
        ImageNormalizer::new(config.image_max_width),
        Arc::new(SystemClock),
    ))
}

async fn connect_jobs(config: &WorkerConfig) -> Result<RedisJobStore> {
    let client =
        redis::Client::open(config.redis_url.as_str()).context("Failed to create Redis client")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");
    Ok(RedisJobStore::new(conn))
}

async fn connect_blobs(config: &WorkerConfig) -> Arc<dyn BlobStore> {
    match &config.blob_backend {
        BlobBackend::S3(settings) => {
            info!("Blob storage: s3 bucket={}", settings.bucket);
            Arc::new(S3BlobStore::connect(settings).await)
        }
        BlobBackend::Local(root) => {
            info!("Blob storage: local dir={}", root.display());
            Arc::new(LocalBlobStore::new(root.clone()))
        }
    }
}
