use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::JobStatus;

/// One site in a batch analysis request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SiteRequest {
    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(custom(finite_coordinate), range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[garde(custom(finite_coordinate), range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    /// Side length of the analysis window around the site.
    #[garde(skip)]
    #[serde(default = "default_bbox_size_meters")]
    pub bbox_size_meters: f64,
}

fn default_bbox_size_meters() -> f64 {
    1000.0
}

fn finite_coordinate(value: &f64, _context: &()) -> garde::Result {
    if value.is_finite() {
        Ok(())
    } else {
        Err(garde::Error::new("must be a finite number"))
    }
}

/// Aggregated batch status, derived from the child jobs rather than taken
/// from the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchOverallStatus {
    Processing,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl BatchOverallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchOverallStatus::Processing)
    }
}

/// Response body of `POST batch-analyze`.
#[derive(Debug, Deserialize)]
pub struct SubmitBatchResponse {
    #[serde(alias = "batchId")]
    pub batch_id: String,
}

/// One child job entry in a batch status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJobState {
    #[serde(alias = "jobId")]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response body of `GET batch-status/{batchId}`.
///
/// The backend also sends an `overall_status` field; it is deserialized but
/// ignored in favor of the locally derived aggregate.
#[derive(Debug, Deserialize)]
pub struct BatchStatusResponse {
    #[serde(default)]
    pub overall_status: Option<String>,
    #[serde(default)]
    pub jobs: Vec<BatchJobState>,
}

/// Aggregated snapshot delivered to batch poll subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct BatchUpdate {
    pub batch_id: String,
    pub overall_status: BatchOverallStatus,
    pub jobs: Vec<BatchJobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_request_valid() {
        let site = SiteRequest {
            name: "North ridge".to_string(),
            latitude: 39.74,
            longitude: -105.01,
            bbox_size_meters: 1000.0,
        };
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_site_request_rejects_out_of_range() {
        let site = SiteRequest {
            name: "Bad".to_string(),
            latitude: 91.0,
            longitude: -181.0,
            bbox_size_meters: 1000.0,
        };
        let report = site.validate().unwrap_err();
        assert_eq!(report.iter().count(), 2);
    }

    #[test]
    fn test_site_request_rejects_nan() {
        let site = SiteRequest {
            name: "NaN site".to_string(),
            latitude: f64::NAN,
            longitude: 0.0,
            bbox_size_meters: 1000.0,
        };
        assert!(site.validate().is_err());
    }

    #[test]
    fn test_bbox_size_defaults_on_the_wire() {
        let site: SiteRequest =
            serde_json::from_str(r#"{"name":"A","latitude":1.0,"longitude":2.0}"#).unwrap();
        assert_eq!(site.bbox_size_meters, 1000.0);
    }
}
