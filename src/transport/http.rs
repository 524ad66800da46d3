//! Streamable HTTP transport
//!
//! Every message is a single POST. Replies come back either as plain JSON or
//! as an event stream; event streams are decoded single-shot by taking the
//! first `data:` line of the buffered body.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::{Client, header};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, RequestId, SESSION_HEADER};
use crate::{Error, Result};

/// Per-call headers
#[derive(Debug, Default, Clone, Copy)]
pub struct CallOptions<'a> {
    /// Upstream session id
    pub session_id: Option<&'a str>,
    /// Bearer token
    pub bearer_token: Option<&'a str>,
}

/// Reply to a POSTed message
#[derive(Debug)]
pub struct RawReply {
    /// Session id returned by the upstream, if any
    pub session_id: Option<String>,
    /// Decoded JSON body
    pub body: Value,
}

/// HTTP transport shared by every provider
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// Request ID counter
    request_id: AtomicI64,
}

impl HttpTransport {
    /// Create a transport whose every call is bounded by `timeout`
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self::with_client(client))
    }

    /// Create a transport from an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            request_id: AtomicI64::new(1),
        }
    }

    /// Underlying HTTP client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a JSON-RPC request and decode the reply body
    pub async fn request(
        &self,
        url: &str,
        method: &str,
        params: Value,
        options: CallOptions<'_>,
    ) -> Result<RawReply> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        self.post(url, &request, options).await
    }

    /// Send a JSON-RPC notification; failures are logged, not returned
    pub async fn notify(&self, url: &str, method: &str, options: CallOptions<'_>) {
        let notification = JsonRpcNotification::new(method);
        if let Err(e) = self.post(url, &notification, options).await {
            warn!(url = %url, method = %method, error = %e, "Notification failed");
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        message: &T,
        options: CallOptions<'_>,
    ) -> Result<RawReply> {
        // Accept both JSON and SSE - some servers return SSE for POST requests
        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .json(message);

        if let Some(session_id) = options.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }
        if let Some(token) = options.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request to {url} failed: {e}")))?;

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response from {url}: {e}")))?;

        if !status.is_success() {
            // JSON-RPC errors are classified by the caller whatever the HTTP status
            if let Some(body) = rpc_error_body(&content_type, &text) {
                debug!(url = %url, status = %status, "Upstream error reply carries a JSON-RPC error");
                return Ok(RawReply { session_id, body });
            }
            return Err(Error::Transport(format!("HTTP {status}: {text}")));
        }

        debug!(url = %url, status = %status, content_type = %content_type, "Upstream reply");
        let body = decode_body(&content_type, &text)?;
        Ok(RawReply { session_id, body })
    }

    /// Get next request ID
    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// A non-2xx body that is a JSON-RPC error object, if it decodes as one
fn rpc_error_body(content_type: &str, body: &str) -> Option<Value> {
    let value = decode_body(content_type, body).ok()?;
    let error = value.get("error")?;
    (error.get("code")?.is_i64() && error.get("message")?.is_string()).then_some(value)
}

/// Decode a reply body according to its content type
///
/// Event streams yield the JSON of the first `data:` line; anything else is
/// parsed whole. An empty body decodes to `{}`.
pub fn decode_body(content_type: &str, body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    if content_type.contains("text/event-stream") {
        let data = body
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .ok_or_else(|| Error::Transport("No data in SSE response".to_string()))?;
        return serde_json::from_str(data.trim())
            .map_err(|e| Error::Transport(format!("Failed to parse SSE data: {e}")));
    }

    serde_json::from_str(body)
        .map_err(|e| Error::Transport(format!("Failed to parse response: {e}")))
}
