use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status of an analysis job in the backend queue.
///
/// `Cancelled` is client-side only: the backend reports the other four, and
/// a tracked job moves to `Cancelled` when polling is cancelled locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states permit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Snapshot of a tracked analysis job, delivered on every poll.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisJob {
    pub job_id: String,
    pub status: JobStatus,
    /// 0-100, monotonic non-decreasing until terminal.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Analysis payload, present once the job completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Response body of `POST analyze`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    #[serde(alias = "jobId")]
    pub job_id: String,
}

/// Response body of `GET status/{jobId}`.
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}
