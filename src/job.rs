//! Export job model and state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Format requested when the caller does not name one.
pub const DEFAULT_FORMAT: &str = "pdf";

/// One request to render a guide into a downloadable document.
///
/// `output_key` is only ever set on a completed job and `error_message` only on a
/// failed one. The transition methods below are the only writers of `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub job_id: String,
    pub tenant_id: i64,
    pub guide_id: i64,
    pub status: JobStatus,
    #[serde(default = "default_format")]
    pub format: String,
    pub output_key: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl ExportJob {
    pub fn new(tenant_id: i64, guide_id: i64, format: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            tenant_id,
            guide_id,
            status: JobStatus::Pending,
            format: format.unwrap_or_else(default_format),
            output_key: None,
            error_message: None,
            created_at,
            completed_at: None,
        }
    }

    /// Pending -> processing. Returns false (and changes nothing) from any other state.
    pub fn start_processing(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        true
    }

    pub fn mark_completed(&mut self, output_key: String, at: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.output_key = Some(output_key);
        self.error_message = None;
        self.completed_at = Some(at);
    }

    pub fn mark_failed(&mut self, error: String, at: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.output_key = None;
        self.error_message = Some(error);
        self.completed_at = Some(at);
    }

    /// Time from creation to the terminal transition, if there was one.
    pub fn processing_duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| done.signed_duration_since(self.created_at).num_milliseconds())
    }

    /// Whether the record satisfies the output/error exclusivity rule for its status.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            JobStatus::Completed => self.output_key.is_some() && self.error_message.is_none(),
            JobStatus::Failed => self.error_message.is_some() && self.output_key.is_none(),
            JobStatus::Pending | JobStatus::Processing => {
                self.output_key.is_none() && self.error_message.is_none()
            }
        }
    }
}

/// Blob key for a rendered guide: `exports/guide_{id}_{unix_seconds}.{ext}`.
pub fn output_key(guide_id: i64, extension: &str, at: DateTime<Utc>) -> String {
    format!("exports/guide_{}_{}.{}", guide_id, at.timestamp(), extension)
}
