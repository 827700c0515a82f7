//! SnapStep Guide Export Worker Library
//!
//! Turns pending export jobs into PDF documents: a guide's steps, their screenshots and
//! annotation overlays are composed into pages, uploaded to blob storage, and the job
//! record is moved to `completed` or `failed`.
//!
//! ## Module Overview
//!
//! - `job`: Export job model and state transitions
//! - `queue`: Redis-backed job store with an atomic claim
//! - `guides`: Guide, step and annotation reads from Postgres
//! - `blob`: Screenshot and document storage (S3/MinIO or local directory)
//! - `normalize`: Screenshot resizing to the document width
//! - `overlay`: Annotation shapes as SVG overlays
//! - `compose`: Block layout, pagination and document assembly
//! - `render`: PDF serialisation
//! - `processor`: Claim and process a single job
//! - `worker`: Polling loop with bounded concurrency
//! - `config`: Environment configuration
//! - `credentials`: Account password hashing
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use snapstep_export_worker::{
//!     blob::LocalBlobStore,
//!     clock::SystemClock,
//!     guides::PgGuideStore,
//!     normalize::ImageNormalizer,
//!     processor::ExportProcessor,
//!     queue::RedisJobStore,
//!     worker::{LoopSettings, WorkerLoop},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = redis::Client::open("redis://127.0.0.1/")?;
//!     let jobs = RedisJobStore::new(redis::aio::ConnectionManager::new(client).await?);
//!     let pool = sqlx::PgPool::connect("postgresql://localhost/snapstep").await?;
//!
//!     let processor = ExportProcessor::new(
//!         Arc::new(jobs),
//!         Arc::new(PgGuideStore::new(pool)),
//!         Arc::new(LocalBlobStore::new("./blobs")),
//!         ImageNormalizer::default(),
//!         Arc::new(SystemClock),
//!     );
//!
//!     let handle = WorkerLoop::new(Arc::new(processor), LoopSettings::default()).start();
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod blob;
pub mod clock;
pub mod compose;
pub mod config;
pub mod credentials;
pub mod guides;
pub mod job;
pub mod normalize;
pub mod overlay;
pub mod processor;
pub mod queue;
pub mod render;
pub mod telemetry;
pub mod worker;
