use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::Method;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::batch::SiteRequest;
use crate::models::job::{AnalysisJob, JobStatus, JobStatusResponse, SubmitResponse};
use crate::services::cache::ResultCache;
use crate::services::classifier;
use crate::services::transport::{Transport, TransportError};

/// How long a completed result stays in the cache.
const RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Pacing of a polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

/// Handle to stop a polling loop.
///
/// `cancel` is idempotent. The loop re-checks the flag after every await, so
/// no update is delivered once cancellation is requested, even for a
/// response already in flight.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

/// Tracks one analysis job from submission to a terminal state.
///
/// Transport and cache are injected at construction so tests can substitute
/// fakes; nothing here reaches for globals.
pub struct JobStatusTracker {
    transport: Arc<dyn Transport>,
    cache: Arc<ResultCache>,
}

impl JobStatusTracker {
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<ResultCache>) -> Self {
        Self { transport, cache }
    }

    /// Submit a single analysis job. Returns the backend-assigned job id.
    pub async fn submit(&self, site: &SiteRequest) -> Result<String, TransportError> {
        let body = serde_json::to_value(site)?;
        let value = self
            .transport
            .request(Method::POST, "analyze", Some(body))
            .await?;
        let response: SubmitResponse = serde_json::from_value(value)?;
        info!(job_id = %response.job_id, site = %site.name, "analysis job submitted");
        counter!("analysis_jobs_submitted_total").increment(1);
        Ok(response.job_id)
    }

    /// Poll `status/{jobId}` until terminal or the attempt budget runs out.
    ///
    /// The loop is self-rescheduling: the next request is issued only after
    /// the previous one settles, so ticks never overlap. Every status
    /// snapshot is delivered through `on_update`; on success the result
    /// payload is fetched and persisted into the cache keyed by the job id.
    pub fn start<F>(&self, job_id: impl Into<String>, on_update: F, options: PollOptions) -> CancelHandle
    where
        F: Fn(AnalysisJob) + Send + Sync + 'static,
    {
        let handle = CancelHandle::new();
        tokio::spawn(poll_job(
            Arc::clone(&self.transport),
            Arc::clone(&self.cache),
            job_id.into(),
            Box::new(on_update),
            handle.clone(),
            options,
        ));
        handle
    }
}

async fn poll_job(
    transport: Arc<dyn Transport>,
    cache: Arc<ResultCache>,
    job_id: String,
    on_update: Box<dyn Fn(AnalysisJob) + Send + Sync>,
    handle: CancelHandle,
    options: PollOptions,
) {
    let created_at = Utc::now();
    let mut max_progress: u8 = 0;
    let mut attempts: u32 = 0;

    loop {
        if handle.is_cancelled() {
            return;
        }
        attempts += 1;

        let outcome = transport
            .request(Method::GET, &format!("status/{job_id}"), None)
            .await;
        if handle.is_cancelled() {
            // response arrived after cancellation: discard it
            return;
        }

        let mut delay = options.interval;
        match outcome {
            Ok(value) => match serde_json::from_value::<JobStatusResponse>(value) {
                Ok(status) => {
                    max_progress = max_progress.max(clamp_progress(status.progress));
                    let mut job = AnalysisJob {
                        job_id: job_id.clone(),
                        status: status.status,
                        progress: max_progress,
                        message: status.message,
                        result: None,
                        created_at,
                    };

                    match status.status {
                        JobStatus::Completed => {
                            job.progress = 100;
                            job.result = fetch_result(&*transport, &cache, &job_id).await;
                            if handle.is_cancelled() {
                                return;
                            }
                            counter!("analysis_jobs_completed_total").increment(1);
                            on_update(job);
                            return;
                        }
                        JobStatus::Failed | JobStatus::Cancelled => {
                            counter!("analysis_jobs_failed_total").increment(1);
                            on_update(job);
                            return;
                        }
                        JobStatus::Pending | JobStatus::Processing => on_update(job),
                    }
                }
                Err(e) => {
                    // malformed status body: transient, consumes an attempt
                    warn!(job_id = %job_id, error = %e, "unparseable status response");
                }
            },
            Err(error) => {
                let class = classifier::classify(&error);
                if !class.retryable {
                    warn!(job_id = %job_id, error = %error, "job polling aborted");
                    counter!("analysis_jobs_failed_total").increment(1);
                    on_update(failed_job(&job_id, class.message, max_progress, created_at));
                    return;
                }
                debug!(job_id = %job_id, error = %error, "transient polling error");
                if let Some(secs) = class.retry_after_seconds {
                    delay = delay.max(Duration::from_secs(secs));
                }
            }
        }

        if attempts >= options.max_attempts {
            counter!("analysis_jobs_failed_total").increment(1);
            on_update(failed_job(
                &job_id,
                format!("Analysis timed out after {attempts} status checks"),
                max_progress,
                created_at,
            ));
            return;
        }

        sleep(delay).await;
    }
}

async fn fetch_result(
    transport: &dyn Transport,
    cache: &ResultCache,
    job_id: &str,
) -> Option<Value> {
    match transport
        .request(Method::GET, &format!("results/{job_id}"), None)
        .await
    {
        Ok(payload) => {
            cache.set(job_id, payload.clone(), RESULT_TTL);
            Some(payload)
        }
        Err(error) => {
            warn!(job_id, error = %error, "job completed but result fetch failed");
            None
        }
    }
}

fn failed_job(
    job_id: &str,
    message: String,
    progress: u8,
    created_at: DateTime<Utc>,
) -> AnalysisJob {
    AnalysisJob {
        job_id: job_id.to_string(),
        status: JobStatus::Failed,
        progress,
        message: Some(message),
        result: None,
        created_at,
    }
}

fn clamp_progress(progress: Option<f64>) -> u8 {
    progress.map(|p| p.clamp(0.0, 100.0) as u8).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(None), 0);
        assert_eq!(clamp_progress(Some(-3.0)), 0);
        assert_eq!(clamp_progress(Some(42.9)), 42);
        assert_eq!(clamp_progress(Some(250.0)), 100);
    }

    #[test]
    fn test_cancel_handle_is_idempotent() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
