//! Test helpers: a scripted transport fake for polling scenarios.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use terrain_analysis_client::services::transport::{RequestOptions, Transport, TransportError};

/// One canned outcome for a scripted request.
#[derive(Clone)]
pub enum Scripted {
    Ok(Value),
    Http(u16),
    Network,
}

impl Scripted {
    fn into_result(self) -> Result<Value, TransportError> {
        match self {
            Scripted::Ok(value) => Ok(value),
            Scripted::Http(status) => Err(TransportError::Http {
                status,
                message: "scripted failure".to_string(),
                retry_after: None,
            }),
            Scripted::Network => Err(TransportError::Network("scripted outage".to_string())),
        }
    }
}

/// Transport fake that plays back a script of responses in order.
///
/// `results/{id}` requests answer with `results_payload`, DELETEs succeed,
/// everything else consumes the script; when the script runs dry the
/// `fallback` (if any) repeats forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    results_payload: Value,
    delay: Duration,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            results_payload: Value::Null,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Scripted) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_results(mut self, payload: Value) -> Self {
        self.results_payload = payload;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of status polls issued so far.
    pub fn status_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, path)| path.starts_with("status/") || path.starts_with("batch-status/"))
            .count()
    }

    pub fn recorded_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request_opts(
        &self,
        method: Method,
        path: &str,
        _body: Option<Value>,
        _options: RequestOptions,
    ) -> Result<Value, TransportError> {
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string()));

        if path.starts_with("results/") {
            return Ok(self.results_payload.clone());
        }
        if method == Method::DELETE {
            return Ok(Value::Null);
        }

        let next = self.script.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(scripted) => scripted.into_result(),
            None => Err(TransportError::Http {
                status: 404,
                message: "script exhausted".to_string(),
                retry_after: None,
            }),
        }
    }
}

/// Opt-in log output while debugging tests: `RUST_LOG=debug cargo test`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
