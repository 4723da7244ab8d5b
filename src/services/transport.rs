use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by the injected token refresh callback.
pub type RefreshFuture =
    Pin<Box<dyn Future<Output = Result<String, Box<dyn std::error::Error + Send + Sync>>> + Send>>;

/// Async callback that obtains a fresh bearer token from the auth
/// collaborator (e.g., by exchanging a refresh token).
pub type RefreshCallback = Arc<dyn Fn() -> RefreshFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No response was received from the backend.
    #[error("network error: {0}")]
    Network(String),

    /// The backend responded with a failure status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Server-supplied Retry-After, seconds.
        retry_after: Option<u64>,
    },

    /// A 401 that could not be resolved by one token refresh.
    #[error("authentication required")]
    Auth,

    /// The backend returned a body that is not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("transport configuration error: {0}")]
    Config(String),
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Skip the Authorization header and the 401 refresh-replay path.
    pub skip_auth: bool,
}

/// Seam between the polling components and the HTTP layer; implemented by
/// `AuthenticatedTransport` and by scripted fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_opts(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, TransportError>;

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        self.request_opts(method, path, body, RequestOptions::default())
            .await
    }
}

/// Bearer token plus a generation counter.
///
/// The generation lets a 401 handler that waited on the refresh gate tell
/// whether another caller already settled the refresh while it was queued:
/// a newer generation means reuse that outcome instead of refreshing again.
#[derive(Default)]
struct TokenCell {
    bearer: Option<String>,
    generation: u64,
}

/// HTTP transport that attaches bearer credentials and performs a single
/// refresh-and-replay on the first 401 of a request.
///
/// The token lives in process memory only. Refreshes are single-flight:
/// concurrent 401s share one in-flight refresh through `refresh_gate`.
pub struct AuthenticatedTransport {
    http: reqwest::Client,
    base_url: String,
    token: Mutex<TokenCell>,
    refresh: Mutex<Option<RefreshCallback>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl AuthenticatedTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(TokenCell::default()),
            refresh: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn set_token(&self, bearer: impl Into<String>) {
        let mut cell = self.cell();
        cell.bearer = Some(bearer.into());
        cell.generation += 1;
    }

    pub fn clear_token(&self) {
        let mut cell = self.cell();
        cell.bearer = None;
        cell.generation += 1;
    }

    pub fn is_authenticated(&self) -> bool {
        self.cell().bearer.is_some()
    }

    pub fn set_refresh_callback(&self, callback: RefreshCallback) {
        *self
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn cell(&self) -> MutexGuard<'_, TokenCell> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_token(&self) -> (Option<String>, u64) {
        let cell = self.cell();
        (cell.bearer.clone(), cell.generation)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = self.http.request(method.clone(), url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(json) = body {
            request = request.json(json);
        }
        request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    /// Refresh the token under the single-flight gate.
    ///
    /// `seen_generation` is the generation the failed request was sent with.
    /// A waiter that observes a newer generation on wake-up adopts that
    /// refresh's outcome: a present token means success, an absent one means
    /// the shared refresh failed.
    async fn refresh_token(&self, seen_generation: u64) -> Result<(), TransportError> {
        let _gate = self.refresh_gate.lock().await;

        {
            let cell = self.cell();
            if cell.generation > seen_generation {
                return if cell.bearer.is_some() {
                    Ok(())
                } else {
                    Err(TransportError::Auth)
                };
            }
        }

        let callback = self
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(callback) = callback else {
            self.clear_token();
            return Err(TransportError::Auth);
        };

        counter!("analysis_token_refreshes_total").increment(1);
        match callback().await {
            Ok(bearer) => {
                let mut cell = self.cell();
                cell.bearer = Some(bearer);
                cell.generation += 1;
                debug!("bearer token refreshed");
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "token refresh failed, clearing session");
                self.clear_token();
                Err(TransportError::Auth)
            }
        }
    }

    async fn shape_response(response: reqwest::Response) -> Result<Value, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: extract_error_message(&body, status),
                retry_after,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Transport for AuthenticatedTransport {
    async fn request_opts(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, TransportError> {
        let request_id = Uuid::new_v4();
        let url = self.url(path);
        counter!("analysis_requests_total").increment(1);
        debug!(%request_id, %method, path, "dispatching request");

        let (bearer, generation) = self.current_token();
        let sent_bearer = if options.skip_auth { None } else { bearer };
        let response = self
            .send_once(&method, &url, body.as_ref(), sent_bearer.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && !options.skip_auth {
            debug!(%request_id, path, "401 received, refreshing token before replay");
            counter!("analysis_auth_retries_total").increment(1);
            self.refresh_token(generation).await?;

            let (bearer, _) = self.current_token();
            let replay = self
                .send_once(&method, &url, body.as_ref(), bearer.as_deref())
                .await?;
            return Self::shape_response(replay).await;
        }

        Self::shape_response(response).await
    }
}

/// Pull a human-readable message out of a JSON error body; fall back to the
/// raw body, then to the status line.
fn extract_error_message(body: &str, status: StatusCode) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "detail", "error"] {
            if let Some(Value::String(text)) = map.get(key) {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message_prefers_json_fields() {
        let body = r#"{"detail":"site not found"}"#;
        assert_eq!(
            extract_error_message(body, StatusCode::NOT_FOUND),
            "site not found"
        );
    }

    #[test]
    fn test_extract_error_message_falls_back_to_body() {
        assert_eq!(
            extract_error_message("upstream exploded", StatusCode::BAD_GATEWAY),
            "upstream exploded"
        );
    }

    #[test]
    fn test_extract_error_message_falls_back_to_status() {
        assert_eq!(
            extract_error_message("", StatusCode::SERVICE_UNAVAILABLE),
            "Service Unavailable"
        );
    }

    #[test]
    fn test_token_accessors() {
        let transport = AuthenticatedTransport::new("http://localhost:9").unwrap();
        assert!(!transport.is_authenticated());
        transport.set_token("abc");
        assert!(transport.is_authenticated());
        transport.clear_token();
        assert!(!transport.is_authenticated());
    }

    #[test]
    fn test_url_join_normalizes_slashes() {
        let transport = AuthenticatedTransport::new("http://localhost:9/api/").unwrap();
        assert_eq!(transport.url("/status/abc"), "http://localhost:9/api/status/abc");
        assert_eq!(transport.url("status/abc"), "http://localhost:9/api/status/abc");
    }
}
