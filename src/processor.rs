//! Export job state machine: pending -> processing -> completed | failed.
//!
//! The loop and direct dispatch both go through [`ExportProcessor::process`]. Only the
//! worker whose atomic claim succeeds moves a job past `processing`, so the terminal
//! write needs no further coordination.

use crate::blob::{BlobError, BlobStore};
use crate::clock::Clock;
use crate::compose::{ComposeError, DocumentComposer};
use crate::guides::{GuideStore, GuideStoreError};
use crate::job::{output_key, ExportJob, JobStatus};
use crate::normalize::ImageNormalizer;
use crate::queue::{JobStore, JobStoreError};
use crate::telemetry;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Job-local failures. The display text is what gets stored as the job's error message.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Guide not found")]
    GuideNotFound,
    #[error("Guide has no steps")]
    NoSteps,
    #[error("Unsupported export format '{0}'")]
    UnsupportedFormat(String),
    #[error("Error loading guide: {0}")]
    GuideStore(#[from] GuideStoreError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error("Error uploading PDF: {0}")]
    Upload(#[source] BlobError),
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller owns the job; it is persisted as processing.
    Claimed(ExportJob),
    /// The job was already past pending when read.
    NotPending(JobStatus),
    /// Another worker won the race between read and claim.
    Lost,
    Missing,
}

/// Result of [`ExportProcessor::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { output_key: String },
    Failed { error: String },
    /// Claim was a no-op: the job is gone, owned elsewhere or already finished.
    Skipped,
}

pub struct ExportProcessor {
    jobs: Arc<dyn JobStore>,
    guides: Arc<dyn GuideStore>,
    blobs: Arc<dyn BlobStore>,
    composer: DocumentComposer,
    clock: Arc<dyn Clock>,
}

impl ExportProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        guides: Arc<dyn GuideStore>,
        blobs: Arc<dyn BlobStore>,
        normalizer: ImageNormalizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let composer = DocumentComposer::new(blobs.clone(), normalizer);
        Self {
            jobs,
            guides,
            blobs,
            composer,
            clock,
        }
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Takes ownership of a pending job. Any other state is a no-op, and an id that
    /// cannot be claimed (missing, finished or corrupt record) is dropped from the
    /// pending listing so it is not offered again.
    pub async fn claim(&self, job_id: &str) -> Result<ClaimOutcome, JobStoreError> {
        let job = match self.jobs.load_job(job_id).await {
            Ok(job) => job,
            Err(err @ JobStoreError::Corrupt { .. }) => {
                warn!(job_id, error = %err, "Unreadable export job record");
                self.jobs.discard_pending(job_id).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let Some(job) = job else {
            self.jobs.discard_pending(job_id).await?;
            return Ok(ClaimOutcome::Missing);
        };
        if job.status != JobStatus::Pending {
            self.jobs.discard_pending(job_id).await?;
            return Ok(ClaimOutcome::NotPending(job.status));
        }
        if !self.jobs.try_claim(job_id).await? {
            return Ok(ClaimOutcome::Lost);
        }

        match self.jobs.load_job(job_id).await? {
            Some(job) if job.status == JobStatus::Processing => Ok(ClaimOutcome::Claimed(job)),
            Some(_) | None => Ok(ClaimOutcome::Lost),
        }
    }

    /// Claims the job and, if this caller owns it, renders, uploads and records the
    /// terminal state. Errors are job-store failures only; everything that goes wrong
    /// with the export itself ends up on the job record.
    pub async fn process(&self, job_id: &str) -> Result<JobOutcome, JobStoreError> {
        let mut job = match self.claim(job_id).await? {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::NotPending(status) if status.is_terminal() => {
                info!("Export job {} already finished (status: {})", job_id, status);
                return Ok(JobOutcome::Skipped);
            }
            ClaimOutcome::NotPending(status) => {
                info!("Export job {} is not pending (status: {})", job_id, status);
                return Ok(JobOutcome::Skipped);
            }
            ClaimOutcome::Lost => {
                info!("Export job {} was claimed by another worker", job_id);
                return Ok(JobOutcome::Skipped);
            }
            ClaimOutcome::Missing => {
                warn!("Export job {} not found", job_id);
                return Ok(JobOutcome::Skipped);
            }
        };

        info!(job_id, guide_id = job.guide_id, "Processing export job");

        let outcome = match self.export(&job).await {
            Ok(key) => {
                job.mark_completed(key.clone(), self.clock.now());
                JobOutcome::Completed { output_key: key }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(job_id, guide_id = job.guide_id, error = %message, "Export job failed");
                job.mark_failed(message.clone(), self.clock.now());
                JobOutcome::Failed { error: message }
            }
        };

        self.jobs.save_job(&job).await?;
        telemetry::record_job_telemetry(&job);
        info!("Export job {} finished with status {}", job_id, job.status);
        Ok(outcome)
    }

    /// Renders the guide and uploads the document, returning its key.
    async fn export(&self, job: &ExportJob) -> Result<String, ExportError> {
        let extension = supported_extension(&job.format)?;

        let guide = self
            .guides
            .load_guide(job.guide_id)
            .await?
            .ok_or(ExportError::GuideNotFound)?;

        let steps = self.guides.load_steps_ordered(guide.id).await?;
        if steps.is_empty() {
            return Err(ExportError::NoSteps);
        }

        let annotations = match self.guides.load_annotations(guide.id).await {
            Ok(annotations) => annotations,
            Err(err) => {
                warn!(guide_id = guide.id, error = %err, "Annotations unavailable, rendering without them");
                Vec::new()
            }
        };

        let document = self.composer.compose(&guide, &steps, &annotations).await?;
        let key = output_key(guide.id, extension, self.clock.now());
        self.blobs
            .put(&key, document, PDF_CONTENT_TYPE)
            .await
            .map_err(ExportError::Upload)
    }
}

/// File extension for a requested format. Only PDF is rendered.
fn supported_extension(format: &str) -> Result<&'static str, ExportError> {
    if format.trim().eq_ignore_ascii_case("pdf") {
        Ok("pdf")
    } else {
        Err(ExportError::UnsupportedFormat(format.to_string()))
    }
}
