use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use garde::Validate;
use reqwest::Method;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::batch::{
    BatchJobState, BatchOverallStatus, BatchStatusResponse, BatchUpdate, SiteRequest,
    SubmitBatchResponse,
};
use crate::models::job::JobStatus;
use crate::models::validation::ValidationOutcome;
use crate::services::classifier;
use crate::services::tracker::{CancelHandle, PollOptions};
use crate::services::transport::{Transport, TransportError};

const MAX_BATCH_SITES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

type StopFlags = Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>;

/// Submits and polls a set of analysis jobs as one unit.
pub struct BatchOrchestrator {
    transport: Arc<dyn Transport>,
    active: StopFlags,
}

impl BatchOrchestrator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pre-flight validation; never touches the network.
    ///
    /// Violations are collected per site as one indexed message each.
    pub fn validate(sites: &[SiteRequest]) -> ValidationOutcome {
        if sites.is_empty() {
            return ValidationOutcome::from_errors(vec![
                "At least one site is required".to_string()
            ]);
        }

        let mut errors = Vec::new();
        if sites.len() > MAX_BATCH_SITES {
            errors.push(format!(
                "Maximum {MAX_BATCH_SITES} sites per batch, got {}",
                sites.len()
            ));
        }

        for (i, site) in sites.iter().enumerate() {
            if let Err(report) = site.validate() {
                let fields: Vec<String> = report
                    .iter()
                    .map(|(path, error)| format!("{path} {error}"))
                    .collect();
                errors.push(format!("Site {}: {}", i + 1, fields.join(", ")));
            }
        }

        ValidationOutcome::from_errors(errors)
    }

    /// Validate locally, then `POST batch-analyze`. Invalid input fails
    /// without any request being sent.
    pub async fn submit(&self, sites: &[SiteRequest]) -> Result<String, BatchError> {
        let outcome = Self::validate(sites);
        if !outcome.valid {
            return Err(BatchError::Validation(outcome.errors));
        }

        let body = serde_json::json!({ "sites": sites });
        let value = self
            .transport
            .request(Method::POST, "batch-analyze", Some(body))
            .await?;
        let response: SubmitBatchResponse = serde_json::from_value(value)?;
        info!(batch_id = %response.batch_id, sites = sites.len(), "batch submitted");
        Ok(response.batch_id)
    }

    /// Poll `batch-status/{batchId}` until the derived overall status is
    /// terminal or the attempt budget runs out.
    pub fn poll<F>(&self, batch_id: impl Into<String>, on_update: F, options: PollOptions) -> CancelHandle
    where
        F: Fn(BatchUpdate) + Send + Sync + 'static,
    {
        let batch_id = batch_id.into();
        let handle = CancelHandle::new();
        self.flags().insert(batch_id.clone(), handle.flag());

        tokio::spawn(poll_batch(
            Arc::clone(&self.transport),
            Arc::clone(&self.active),
            batch_id,
            Box::new(on_update),
            handle.clone(),
            options,
        ));
        handle
    }

    /// Stop delivering updates for a batch, then ask the backend to cancel
    /// it. The local stop takes effect even when the backend request fails.
    /// Safe to call repeatedly.
    pub async fn cancel(&self, batch_id: &str) {
        if let Some(flag) = self.flags().get(batch_id) {
            flag.store(true, Ordering::SeqCst);
        }

        match self
            .transport
            .request(Method::DELETE, &format!("batch-status/{batch_id}"), None)
            .await
        {
            Ok(_) => info!(batch_id, "batch cancellation requested"),
            Err(error) => warn!(
                batch_id,
                error = %error,
                "batch cancellation request failed; local polling already stopped"
            ),
        }
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Aggregate child job states into the batch status.
///
/// Any non-terminal child keeps the batch `Processing`. Once all children
/// are terminal: all completed → `Completed`; none completed → `Failed`
/// (cancelled children count as non-success); otherwise →
/// `PartiallyCompleted`.
fn derive_overall_status(jobs: &[BatchJobState]) -> BatchOverallStatus {
    if jobs.is_empty() || jobs.iter().any(|j| !j.status.is_terminal()) {
        return BatchOverallStatus::Processing;
    }

    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    if completed == jobs.len() {
        BatchOverallStatus::Completed
    } else if completed == 0 {
        BatchOverallStatus::Failed
    } else {
        BatchOverallStatus::PartiallyCompleted
    }
}

async fn poll_batch(
    transport: Arc<dyn Transport>,
    active: StopFlags,
    batch_id: String,
    on_update: Box<dyn Fn(BatchUpdate) + Send + Sync>,
    handle: CancelHandle,
    options: PollOptions,
) {
    let mut attempts: u32 = 0;

    loop {
        if handle.is_cancelled() {
            break;
        }
        attempts += 1;

        let outcome = transport
            .request(Method::GET, &format!("batch-status/{batch_id}"), None)
            .await;
        if handle.is_cancelled() {
            break;
        }

        match outcome {
            Ok(value) => match serde_json::from_value::<BatchStatusResponse>(value) {
                Ok(response) => {
                    let overall = derive_overall_status(&response.jobs);
                    let terminal = overall.is_terminal();
                    on_update(BatchUpdate {
                        batch_id: batch_id.clone(),
                        overall_status: overall,
                        jobs: response.jobs,
                        message: None,
                    });
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    warn!(batch_id = %batch_id, error = %e, "unparseable batch status response");
                }
            },
            Err(error) => {
                let class = classifier::classify(&error);
                if !class.retryable {
                    warn!(batch_id = %batch_id, error = %error, "batch polling aborted");
                    on_update(BatchUpdate {
                        batch_id: batch_id.clone(),
                        overall_status: BatchOverallStatus::Failed,
                        jobs: Vec::new(),
                        message: Some(class.message),
                    });
                    break;
                }
                debug!(batch_id = %batch_id, error = %error, "transient batch polling error");
            }
        }

        if attempts >= options.max_attempts {
            on_update(BatchUpdate {
                batch_id: batch_id.clone(),
                overall_status: BatchOverallStatus::Failed,
                jobs: Vec::new(),
                message: Some(format!(
                    "Batch timed out after {attempts} status checks"
                )),
            });
            break;
        }

        sleep(options.interval).await;
    }

    active
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&batch_id);
}
