//! Polling loop that drives the export state machine.

use crate::processor::{ExportProcessor, JobOutcome};
use crate::queue::JobStoreError;
use crate::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Maximum jobs claimed per poll.
    pub concurrency: usize,
    /// Pause when nothing was pending, and after an infrastructure error.
    pub idle_backoff: Duration,
    /// Pause after a non-empty batch.
    pub batch_gap: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            idle_backoff: Duration::from_secs(5),
            batch_gap: Duration::from_secs(1),
        }
    }
}

pub struct WorkerLoop {
    processor: Arc<ExportProcessor>,
    settings: LoopSettings,
}

/// Running loop started by [`WorkerLoop::start`].
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Requests shutdown, lets the current batch finish, and waits for the loop.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!("Worker loop task failed: {}", err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl WorkerLoop {
    pub fn new(processor: Arc<ExportProcessor>, settings: LoopSettings) -> Self {
        Self {
            processor,
            settings,
        }
    }

    pub fn start(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        WorkerHandle { cancel, task }
    }

    /// Polls until `cancel` fires. Job failures stay on their job records and store
    /// outages only lengthen the pause; neither ends the loop.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Worker started, polling for export jobs: concurrency={}",
            self.settings.concurrency
        );

        while !cancel.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(0) => self.settings.idle_backoff,
                Ok(_) => self.settings.batch_gap,
                Err(err) => {
                    error!("Error in worker loop: {}", err);
                    self.settings.idle_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Worker stopped");
    }

    /// Lists up to `concurrency` pending jobs and runs claim+process on each of them
    /// concurrently. Returns how many jobs were found.
    pub async fn poll_once(&self) -> Result<usize, JobStoreError> {
        let pending = self
            .processor
            .job_store()
            .list_pending(self.settings.concurrency)
            .await?;
        telemetry::record_worker_heartbeat(pending.len());

        let mut batch = JoinSet::new();
        for job_id in pending.iter().cloned() {
            let processor = self.processor.clone();
            batch.spawn(async move {
                let result = processor.process(&job_id).await;
                (job_id, result)
            });
        }

        while let Some(joined) = batch.join_next().await {
            match joined {
                Ok((job_id, Ok(JobOutcome::Skipped))) => debug!("Skipped export job {}", job_id),
                Ok((_, Ok(_))) => {}
                Ok((job_id, Err(err))) => {
                    error!(job_id = %job_id, error = %err, "Export job left unfinished");
                }
                Err(err) => error!("Export task aborted: {}", err),
            }
        }

        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobError, BlobStore};
    use crate::clock::SystemClock;
    use crate::guides::{Annotation, Guide, GuideStore, GuideStoreError, Step};
    use crate::job::ExportJob;
    use crate::normalize::ImageNormalizer;
    use crate::queue::MockJobStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoGuides;

    #[async_trait]
    impl GuideStore for NoGuides {
        async fn load_guide(&self, _guide_id: i64) -> Result<Option<Guide>, GuideStoreError> {
            Ok(None)
        }

        async fn load_steps_ordered(&self, _guide_id: i64) -> Result<Vec<Step>, GuideStoreError> {
            Ok(Vec::new())
        }

        async fn load_annotations(&self, _guide_id: i64) -> Result<Vec<Annotation>, GuideStoreError> {
            Ok(Vec::new())
        }
    }

    struct NoBlobs;

    #[async_trait]
    impl BlobStore for NoBlobs {
        async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
            Err(BlobError::NotFound(key.to_string()))
        }

        async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, BlobError> {
            Ok(key.to_string())
        }

        async fn presign_get(&self, key: &str, _expires_in: Duration) -> Result<String, BlobError> {
            Err(BlobError::NotFound(key.to_string()))
        }
    }

    fn worker(jobs: MockJobStore, concurrency: usize) -> WorkerLoop {
        let processor = ExportProcessor::new(
            Arc::new(jobs),
            Arc::new(NoGuides),
            Arc::new(NoBlobs),
            ImageNormalizer::default(),
            Arc::new(SystemClock),
        );
        WorkerLoop::new(
            Arc::new(processor),
            LoopSettings {
                concurrency,
                ..LoopSettings::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_loop_polls_every_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut jobs = MockJobStore::new();
        jobs.expect_list_pending().returning(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });

        let handle = worker(jobs, 2).start();
        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.stop().await;

        // t = 0s, 5s, 10s
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_backs_off_and_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut jobs = MockJobStore::new();
        jobs.expect_list_pending().returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(JobStoreError::Unavailable("connection refused".to_string()))
            } else {
                Ok(Vec::new())
            }
        });

        let handle = worker(jobs, 2).start();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!handle.is_finished());
        handle.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_gap_after_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut jobs = MockJobStore::new();
        jobs.expect_list_pending().returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec!["j1".to_string()])
            } else {
                Ok(Vec::new())
            }
        });
        jobs.expect_load_job()
            .withf(|job_id| job_id == "j1")
            .returning(|_| {
                let mut job = ExportJob::new(1, 1, None, Utc::now());
                job.start_processing();
                job.mark_completed("exports/guide_1_0.pdf".to_string(), Utc::now());
                Ok(Some(job))
            });
        jobs.expect_discard_pending().returning(|_| Ok(()));

        let handle = worker(jobs, 2).start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop().await;

        // t = 0s (one job, 1s gap), t = 1s (idle, 5s backoff)
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_poll_once_asks_for_concurrency_limit() {
        let mut jobs = MockJobStore::new();
        jobs.expect_list_pending()
            .withf(|limit| *limit == 3)
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let found = worker(jobs, 3).poll_once().await.unwrap();
        assert_eq!(found, 0);
    }

    #[tokio::test]
    async fn test_poll_once_runs_listed_jobs() {
        let mut jobs = MockJobStore::new();
        jobs.expect_list_pending()
            .returning(|_| Ok(vec!["a".to_string(), "b".to_string()]));
        jobs.expect_load_job().returning(|job_id| {
            let mut job = ExportJob::new(1, 999, None, Utc::now());
            job.job_id = job_id.to_string();
            job.start_processing();
            Ok(Some(job))
        });
        jobs.expect_discard_pending().times(2).returning(|_| Ok(()));

        // Both jobs are already processing elsewhere: claim is a no-op.
        let found = worker(jobs, 2).poll_once().await.unwrap();
        assert_eq!(found, 2);
    }

    /// A pending entry whose record is gone must not come back on every poll.
    #[tokio::test]
    async fn test_stale_pending_entry_is_dropped() {
        let discarded = Arc::new(AtomicUsize::new(0));
        let listed = discarded.clone();
        let dropped = discarded.clone();

        let mut jobs = MockJobStore::new();
        jobs.expect_list_pending().returning(move |_| {
            if listed.load(Ordering::SeqCst) == 0 {
                Ok(vec!["ghost".to_string()])
            } else {
                Ok(Vec::new())
            }
        });
        jobs.expect_load_job().returning(|_| Ok(None));
        jobs.expect_try_claim().never();
        jobs.expect_discard_pending()
            .withf(|job_id| job_id == "ghost")
            .times(1)
            .returning(move |_| {
                dropped.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let worker = worker(jobs, 1);
        assert_eq!(worker.poll_once().await.unwrap(), 1);
        assert_eq!(worker.poll_once().await.unwrap(), 0);
        assert_eq!(worker.poll_once().await.unwrap(), 0);
        assert_eq!(discarded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_dropped_from_pending() {
        let mut jobs = MockJobStore::new();
        jobs.expect_list_pending()
            .times(1)
            .returning(|_| Ok(vec!["bad".to_string()]));
        jobs.expect_load_job().returning(|job_id| {
            Err(JobStoreError::Corrupt {
                job_id: job_id.to_string(),
                source: serde_json::from_str::<ExportJob>("{").unwrap_err(),
            })
        });
        jobs.expect_try_claim().never();
        jobs.expect_discard_pending()
            .withf(|job_id| job_id == "bad")
            .times(1)
            .returning(|_| Ok(()));

        assert_eq!(worker(jobs, 1).poll_once().await.unwrap(), 1);
    }

    #[test]
    fn test_default_settings() {
        let settings = LoopSettings::default();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.idle_backoff, Duration::from_secs(5));
        assert_eq!(settings.batch_gap, Duration::from_secs(1));
    }
}
