//! JSON request façade over `reqwest`.
//!
//! Every call is bounded by a timeout (12s by default) and can be cut short
//! by a caller-owned cancellation token. Errors come back as values; the
//! message of a non-2xx response is lifted out of the body.

use std::time::Duration;

use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use livesync_async_utils::AbortSignal;
use livesync_async_utils::Aborted;
use livesync_async_utils::OrAbortExt;

use crate::config::LiveSyncConfig;
use crate::config::join_url;
use crate::error::RequestError;
use crate::error::RequestResult;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(12_000);

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Overrides the client default. Zero disables the deadline.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl CallOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
            timeout: None,
            cancel: None,
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RequestClient {
    http: reqwest::Client,
    base_url: String,
    default_timeout: Duration,
}

impl RequestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Useful for testing or custom TLS/proxy setups.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &LiveSyncConfig) -> Self {
        Self::new(config.base_url.clone()).with_default_timeout(config.request_timeout())
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Perform one JSON exchange.
    ///
    /// A 204 response yields an empty object. Non-2xx responses become
    /// [`RequestError::Status`] carrying the best message found in the body.
    pub async fn call(&self, path: &str, options: CallOptions) -> RequestResult<Value> {
        let url = self.url_for(path);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let mut signal = AbortSignal::new().with_timeout(timeout);
        if let Some(token) = options.cancel {
            signal = signal.with_token(token);
        }

        let mut request = self
            .http
            .request(options.method.clone(), &url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        tracing::debug!(method = %options.method, %url, "request");
        let exchange = async move {
            let response = request.send().await?;
            read_response(response).await
        };

        match exchange.or_abort(&signal).await {
            Ok(result) => {
                if let Err(err) = &result {
                    tracing::debug!(%url, error = %err, "request failed");
                }
                result
            }
            Err(Aborted::TimedOut) => {
                tracing::warn!(%url, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(RequestError::Timeout(timeout))
            }
            Err(Aborted::Cancelled) => Err(RequestError::Cancelled),
        }
    }

    /// [`call`](Self::call) followed by typed decoding.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        path: &str,
        options: CallOptions,
    ) -> RequestResult<T> {
        let value = self.call(path, options).await?;
        Ok(serde_json::from_value(value)?)
    }
}

async fn read_response(response: reqwest::Response) -> RequestResult<Value> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        return Err(RequestError::Status {
            status: status.as_u16(),
            message: error_message(status, &body),
        });
    }
    if status == StatusCode::NO_CONTENT || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_slice(&body)?)
}

/// Message for a failed response: the first non-empty `detail`, `message`
/// or `error` string of a JSON body, else a non-JSON text body, else the
/// status line.
pub fn error_message(status: StatusCode, body: &[u8]) -> String {
    let status_line = || match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {reason}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    };

    if let Ok(parsed) = serde_json::from_slice::<Value>(body) {
        return parsed
            .as_object()
            .and_then(|map| livesync_protocol::value::first_str(map, &["detail", "message", "error"]))
            .map(str::to_string)
            .unwrap_or_else(status_line);
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        status_line()
    } else {
        text.to_string()
    }
}
