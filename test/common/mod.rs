//! In-memory stores shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, ImageFormat, RgbImage};
use snapstep_export_worker::blob::{BlobError, BlobStore};
use snapstep_export_worker::clock::Clock;
use snapstep_export_worker::guides::{Annotation, Guide, GuideStore, GuideStoreError, Step};
use snapstep_export_worker::job::{ExportJob, JobStatus};
use snapstep_export_worker::normalize::ImageNormalizer;
use snapstep_export_worker::processor::ExportProcessor;
use snapstep_export_worker::queue::{JobStore, JobStoreError};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 2024-03-01T12:00:00Z
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, ExportJob>>,
}

impl MemoryJobStore {
    pub fn get(&self, job_id: &str) -> Option<ExportJob> {
        self.jobs.lock().unwrap().get(job_id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn list_pending(&self, limit: usize) -> Result<Vec<String>, JobStoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut pending: Vec<&ExportJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .collect();
        pending.sort_by_key(|job| job.created_at);
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|job| job.job_id.clone())
            .collect())
    }

    async fn try_claim(&self, job_id: &str) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .get_mut(job_id)
            .map(ExportJob::start_processing)
            .unwrap_or(false))
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<ExportJob>, JobStoreError> {
        Ok(self.get(job_id))
    }

    async fn save_job(&self, job: &ExportJob) -> Result<(), JobStoreError> {
        self.jobs
            .lock()
            .unwrap()
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn enqueue(&self, job: &ExportJob) -> Result<(), JobStoreError> {
        self.save_job(job).await
    }

    // Pending listing is derived from record status, so there is no separate index.
    async fn discard_pending(&self, _job_id: &str) -> Result<(), JobStoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGuideStore {
    pub guides: HashMap<i64, Guide>,
    pub steps: Vec<Step>,
    pub annotations: Vec<Annotation>,
    pub offline: bool,
}

impl MemoryGuideStore {
    fn check(&self) -> Result<(), GuideStoreError> {
        if self.offline {
            return Err(GuideStoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GuideStore for MemoryGuideStore {
    async fn load_guide(&self, guide_id: i64) -> Result<Option<Guide>, GuideStoreError> {
        self.check()?;
        Ok(self.guides.get(&guide_id).cloned())
    }

    async fn load_steps_ordered(&self, guide_id: i64) -> Result<Vec<Step>, GuideStoreError> {
        self.check()?;
        let mut steps: Vec<Step> = self
            .steps
            .iter()
            .filter(|step| step.guide_id == guide_id)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.index);
        Ok(steps)
    }

    async fn load_annotations(&self, guide_id: i64) -> Result<Vec<Annotation>, GuideStoreError> {
        self.check()?;
        Ok(self
            .annotations
            .iter()
            .filter(|a| a.guide_id == guide_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    reject_uploads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn with(blobs: &[(&str, Vec<u8>)]) -> Self {
        let store = Self::default();
        for (key, bytes) in blobs {
            store
                .blobs
                .lock()
                .unwrap()
                .insert(key.to_string(), bytes.clone());
        }
        store
    }

    pub fn reject_uploads(&self) {
        self.reject_uploads.store(true, Ordering::SeqCst);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.object(key)
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, BlobError> {
        if self.reject_uploads.load(Ordering::SeqCst) {
            return Err(BlobError::TransientIo("bucket unreachable".to_string()));
        }
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
        Ok(key.to_string())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        if self.object(key).is_none() {
            return Err(BlobError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{}?expires={}", key, expires_in.as_secs()))
    }
}

pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub processor: Arc<ExportProcessor>,
}

impl Harness {
    pub fn new(guides: MemoryGuideStore, blobs: MemoryBlobStore) -> Self {
        let jobs = Arc::new(MemoryJobStore::default());
        let blobs = Arc::new(blobs);
        let processor = ExportProcessor::new(
            jobs.clone(),
            Arc::new(guides),
            blobs.clone(),
            ImageNormalizer::default(),
            Arc::new(FixedClock(fixed_now())),
        );
        Self {
            jobs,
            blobs,
            processor: Arc::new(processor),
        }
    }

    pub async fn enqueue(&self, guide_id: i64, format: Option<&str>) -> ExportJob {
        self.enqueue_aged(guide_id, format, 2).await
    }

    /// Enqueues a job created `age_secs` before [`fixed_now`].
    pub async fn enqueue_aged(&self, guide_id: i64, format: Option<&str>, age_secs: i64) -> ExportJob {
        let job = ExportJob::new(
            1,
            guide_id,
            format.map(str::to_string),
            fixed_now() - chrono::Duration::seconds(age_secs),
        );
        self.jobs.enqueue(&job).await.unwrap();
        job
    }
}

pub fn guide(id: i64, title: &str) -> Guide {
    Guide {
        id,
        tenant_id: 1,
        title: Some(title.to_string()),
        description: None,
    }
}

pub fn step(id: i64, guide_id: i64, index: i32, title: &str, screenshot_key: Option<&str>) -> Step {
    Step {
        id,
        guide_id,
        index,
        title: Some(title.to_string()),
        description: None,
        screenshot_key: screenshot_key.map(str::to_string),
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([30, 30, 30])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}
