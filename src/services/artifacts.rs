//! Artifact discovery for completed analysis jobs.
//!
//! The backend has shipped the artifact listing under several route names
//! over time (`files`, `artifacts`, `attachments`). We probe them in
//! priority order and take the first non-empty listing. Filenames carry a
//! known double-extension defect (`slope.png.png`) that is corrected once
//! here, at the boundary, together with any signed URL referencing the
//! defective name.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::services::transport::{Transport, TransportError};

/// Equivalent listing endpoints, most current first.
const ARTIFACT_PROBES: [&str; 3] = ["files", "artifacts", "attachments"];

/// One downloadable artifact of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    #[serde(alias = "fileName", alias = "name")]
    pub filename: String,
    #[serde(default, alias = "signedUrl", alias = "signed_url")]
    pub url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

pub struct ArtifactLocator {
    transport: Arc<dyn Transport>,
}

impl ArtifactLocator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Probe the listing endpoints in order; the first response with a
    /// non-empty list wins. HTTP failures fall through to the next probe;
    /// connectivity and auth failures abort, since every probe would fail
    /// the same way.
    pub async fn list(&self, job_id: &str) -> Result<Vec<Artifact>, TransportError> {
        for endpoint in ARTIFACT_PROBES {
            match self
                .transport
                .request(Method::GET, &format!("{endpoint}/{job_id}"), None)
                .await
            {
                Ok(value) => {
                    let artifacts = parse_artifact_list(value);
                    if !artifacts.is_empty() {
                        debug!(job_id, endpoint, count = artifacts.len(), "artifact probe hit");
                        return Ok(artifacts.into_iter().map(sanitize_artifact).collect());
                    }
                    debug!(job_id, endpoint, "artifact probe returned empty list");
                }
                Err(TransportError::Http { status, .. }) => {
                    debug!(job_id, endpoint, status, "artifact probe failed, trying next");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(Vec::new())
    }
}

/// Accept both a bare array and an object wrapping the list under one of the
/// usual keys.
fn parse_artifact_list(value: Value) -> Vec<Artifact> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            match ["files", "artifacts", "attachments", "items"]
                .iter()
                .find_map(|key| map.remove(*key))
            {
                Some(Value::Array(items)) => items,
                _ => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

fn sanitize_artifact(mut artifact: Artifact) -> Artifact {
    let fixed = sanitize_filename(&artifact.filename);
    if fixed != artifact.filename {
        if let Some(url) = artifact.url.take() {
            artifact.url = Some(url.replace(&artifact.filename, &fixed));
        }
        artifact.filename = fixed;
    }
    artifact
}

/// Collapse the upstream double-extension defect: a filename whose last two
/// extension segments are identical (case-insensitive) loses the duplicate.
pub fn sanitize_filename(name: &str) -> String {
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() >= 3 {
        let last = segments[segments.len() - 1];
        let previous = segments[segments.len() - 2];
        if !last.is_empty() && last.eq_ignore_ascii_case(previous) {
            return segments[..segments.len() - 1].join(".");
        }
    }
    name.to_string()
}
