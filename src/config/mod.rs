use std::time::Duration;

use serde::Deserialize;

use crate::services::tracker::PollOptions;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Base URL of the analysis backend API (e.g., "https://api.example.com/v1")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Path of the persisted result-cache document
    #[serde(default = "default_cache_path")]
    pub cache_path: String,

    /// Delay between status polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of status polls before a job is reported as timed out
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// How long completed results stay cached, in hours
    #[serde(default = "default_result_ttl_hours")]
    pub result_ttl_hours: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_cache_path() -> String {
    ".cache/terrain-analysis/results.json".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_max_attempts() -> u32 {
    150
}

fn default_result_ttl_hours() -> u64 {
    24
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_hours * 3600)
    }
}
