//! Redis-backed export job store.

use crate::job::{ExportJob, JobStatus};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use thiserror::Error;
use tracing::{debug, info};

/// Key prefix for job records. Clients poll these for status.
const JOB_KEY_PREFIX: &str = "snapstep:export:job";

/// Sorted set of pending job ids, scored by creation time in milliseconds.
const PENDING_KEY: &str = "snapstep:export:pending";

/// Compare-and-set claim: swap in the processing record only if the stored record is
/// still exactly the one the caller read.
///
/// KEYS[1] job record, KEYS[2] pending index.
/// ARGV[1] expected record, ARGV[2] processing record, ARGV[3] job id.
const CLAIM_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('ZREM', KEYS[2], ARGV[3])
return 1
"#;

/// Removes an id from the pending index unless its record is still a readable pending
/// job. A missing, finished or undecodable record leaves the index.
///
/// KEYS[1] job record, KEYS[2] pending index. ARGV[1] job id.
const DISCARD_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if raw then
    local ok, job = pcall(cjson.decode, raw)
    if ok and type(job) == 'table' and job.status == 'pending' then
        return 0
    end
end
return redis.call('ZREM', KEYS[2], ARGV[1])
"#;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt job record {job_id}: {source}")]
    Corrupt {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<redis::RedisError> for JobStoreError {
    fn from(err: redis::RedisError) -> Self {
        JobStoreError::Unavailable(err.to_string())
    }
}

/// Persistence for [`ExportJob`] records.
///
/// `try_claim` is the single synchronisation point between workers: it must move a
/// job from pending to processing atomically, and return `true` to exactly one caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Ids of up to `limit` pending jobs, oldest first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<String>, JobStoreError>;

    async fn try_claim(&self, job_id: &str) -> Result<bool, JobStoreError>;

    async fn load_job(&self, job_id: &str) -> Result<Option<ExportJob>, JobStoreError>;

    async fn save_job(&self, job: &ExportJob) -> Result<(), JobStoreError>;

    /// Stores a new pending job.
    async fn enqueue(&self, job: &ExportJob) -> Result<(), JobStoreError>;

    /// Drops `job_id` from the pending listing when its record is gone, no longer
    /// pending, or unreadable. A still-pending job is left alone.
    async fn discard_pending(&self, job_id: &str) -> Result<(), JobStoreError>;
}

fn job_key(job_id: &str) -> String {
    format!("{}:{}", JOB_KEY_PREFIX, job_id)
}

fn encode(job: &ExportJob) -> Result<String, JobStoreError> {
    serde_json::to_string(job).map_err(|source| JobStoreError::Corrupt {
        job_id: job.job_id.clone(),
        source,
    })
}

fn decode(job_id: &str, raw: &str) -> Result<ExportJob, JobStoreError> {
    serde_json::from_str(raw).map_err(|source| JobStoreError::Corrupt {
        job_id: job_id.to_string(),
        source,
    })
}

/// Job store on a shared Redis connection.
///
/// Each job is a JSON value under its own key, so a terminal status is always written
/// together with its output key or error message.
#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
    claim_script: Script,
    discard_script: Script,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            claim_script: Script::new(CLAIM_SCRIPT),
            discard_script: Script::new(DISCARD_SCRIPT),
        }
    }

    /// Number of jobs waiting in the pending index.
    pub async fn pending_count(&self) -> Result<usize, JobStoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.zcard(PENDING_KEY).await?;
        Ok(len)
    }

    async fn drop_from_index(&self, job_id: &str) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(PENDING_KEY, job_id).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn list_pending(&self, limit: usize) -> Result<Vec<String>, JobStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<String> = conn.zrange(PENDING_KEY, 0, stop).await?;
        Ok(ids)
    }

    async fn try_claim(&self, job_id: &str) -> Result<bool, JobStoreError> {
        let mut conn = self.conn.clone();
        let key = job_key(job_id);

        let raw: Option<String> = conn.get(&key).await?;
        let Some(raw) = raw else {
            debug!("Dropping stale pending entry: job_id={}", job_id);
            self.drop_from_index(job_id).await?;
            return Ok(false);
        };

        let mut job = decode(job_id, &raw)?;
        if !job.start_processing() {
            debug!("Job not pending: job_id={}, status={}", job_id, job.status);
            self.drop_from_index(job_id).await?;
            return Ok(false);
        }
        let claimed_json = encode(&job)?;

        let claimed: i32 = self
            .claim_script
            .key(&key)
            .key(PENDING_KEY)
            .arg(&raw)
            .arg(&claimed_json)
            .arg(job_id)
            .invoke_async(&mut conn)
            .await?;

        Ok(claimed == 1)
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<ExportJob>, JobStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(job_key(job_id)).await?;
        raw.map(|json| decode(job_id, &json)).transpose()
    }

    async fn save_job(&self, job: &ExportJob) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let json = encode(job)?;
        let key = job_key(&job.job_id);

        let mut pipe = redis::pipe();
        pipe.atomic().set(&key, &json).ignore();
        if job.status == JobStatus::Pending {
            pipe.zadd(PENDING_KEY, &job.job_id, job.created_at.timestamp_millis())
                .ignore();
        } else {
            pipe.zrem(PENDING_KEY, &job.job_id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!("Saved job: job_id={}, status={}", job.job_id, job.status);
        Ok(())
    }

    async fn enqueue(&self, job: &ExportJob) -> Result<(), JobStoreError> {
        self.save_job(job).await?;
        info!(
            "Enqueued job: job_id={}, guide_id={}, format={}",
            job.job_id, job.guide_id, job.format
        );
        Ok(())
    }

    async fn discard_pending(&self, job_id: &str) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let removed: i32 = self
            .discard_script
            .key(job_key(job_id))
            .key(PENDING_KEY)
            .arg(job_id)
            .invoke_async(&mut conn)
            .await?;
        if removed == 1 {
            info!("Dropped stale pending entry: job_id={}", job_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    // These tests require a running Redis instance.
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    async fn store() -> RedisJobStore {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        RedisJobStore::new(conn)
    }

    #[test]
    fn test_job_key_layout() {
        assert_eq!(job_key("abc"), "snapstep:export:job:abc");
    }

    #[tokio::test]
    #[ignore]
    async fn test_enqueue_then_claim_once() {
        let store = store().await;
        let job = ExportJob::new(1, 10, None, Utc::now());
        store.enqueue(&job).await.unwrap();

        let pending = store.list_pending(1000).await.unwrap();
        assert!(pending.contains(&job.job_id));

        assert!(store.try_claim(&job.job_id).await.unwrap());
        assert!(!store.try_claim(&job.job_id).await.unwrap());

        let loaded = store.load_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        let pending = store.list_pending(1000).await.unwrap();
        assert!(!pending.contains(&job.job_id));
    }

    #[tokio::test]
    #[ignore]
    async fn test_concurrent_claims_have_one_winner() {
        let store = store().await;
        let job = ExportJob::new(1, 11, None, Utc::now());
        store.enqueue(&job).await.unwrap();

        let (a, b) = tokio::join!(store.try_claim(&job.job_id), store.try_claim(&job.job_id));
        let winners = [a.unwrap(), b.unwrap()].iter().filter(|won| **won).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_terminal_save_leaves_index() {
        let store = store().await;
        let mut job = ExportJob::new(1, 12, None, Utc::now());
        store.enqueue(&job).await.unwrap();
        assert!(store.try_claim(&job.job_id).await.unwrap());

        job.start_processing();
        job.mark_failed("Guide not found".to_string(), Utc::now());
        store.save_job(&job).await.unwrap();

        let loaded = store.load_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("Guide not found"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_discard_pending_keeps_only_live_jobs() {
        let store = store().await;
        let mut conn = store.conn.clone();

        let live = ExportJob::new(1, 13, None, Utc::now());
        store.enqueue(&live).await.unwrap();
        store.discard_pending(&live.job_id).await.unwrap();
        assert!(store.list_pending(1000).await.unwrap().contains(&live.job_id));

        let ghost = uuid::Uuid::new_v4().to_string();
        conn.zadd::<_, _, _, ()>(PENDING_KEY, &ghost, 0).await.unwrap();
        store.discard_pending(&ghost).await.unwrap();

        let corrupt = uuid::Uuid::new_v4().to_string();
        conn.set::<_, _, ()>(job_key(&corrupt), "{not json").await.unwrap();
        conn.zadd::<_, _, _, ()>(PENDING_KEY, &corrupt, 0).await.unwrap();
        store.discard_pending(&corrupt).await.unwrap();

        let pending = store.list_pending(1000).await.unwrap();
        assert!(!pending.contains(&ghost));
        assert!(!pending.contains(&corrupt));
    }
}
