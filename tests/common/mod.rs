//! Shared fixtures: an in-process mock upstream (OAuth provider, MCP server
//! and scheduler) plus a wired token manager.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use mcp_auth_gateway::config::{OAuthSpec, ProviderConfig};
use mcp_auth_gateway::gateway::SessionGateway;
use mcp_auth_gateway::oauth::{
    DEFAULT_ACCOUNT, MemoryTokenStore, OAuthFlowEngine, Token, TokenManager, TokenStore, now_ms,
};
use mcp_auth_gateway::refresh::{RefreshPublisher, ScheduleInput};
use mcp_auth_gateway::registry::ProviderRegistry;
use mcp_auth_gateway::transport::HttpTransport;
use mcp_auth_gateway::{Error, Result};

pub const REDIRECT_URI: &str = "http://127.0.0.1:39500/oauth/callback";

/// One JSON-RPC message received by the mock MCP endpoint
#[derive(Debug, Clone)]
pub struct McpCall {
    pub provider: String,
    pub method: String,
    pub session_id: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

/// Everything the mock upstream has seen, plus knobs for its behavior
#[derive(Default)]
pub struct MockState {
    pub token_requests: Mutex<Vec<HashMap<String, String>>>,
    pub token_replies: Mutex<VecDeque<(u16, Value)>>,
    pub registrations: AtomicUsize,
    pub registration_replies: Mutex<VecDeque<(u16, Value)>>,
    pub initializes: AtomicUsize,
    pub mcp_calls: Mutex<Vec<McpCall>>,
    pub schedule_events: Mutex<Vec<(Option<String>, Vec<u8>)>>,
    pub sse: AtomicBool,
    pub fail_initialize: AtomicBool,
    pub omit_session_id: AtomicBool,
    pub fail_schedule: AtomicBool,
}

impl MockState {
    /// Queue a reply for the next token request
    pub fn script_token_reply(&self, status: u16, body: Value) {
        self.token_replies.lock().push_back((status, body));
    }

    /// Queue a reply for the next registration request
    pub fn script_registration_reply(&self, status: u16, body: Value) {
        self.registration_replies.lock().push_back((status, body));
    }

    pub fn token_request_count(&self) -> usize {
        self.token_requests.lock().len()
    }

    pub fn last_token_request(&self) -> HashMap<String, String> {
        self.token_requests.lock().last().cloned().unwrap_or_default()
    }

    pub fn calls(&self, method: &str) -> Vec<McpCall> {
        self.mcp_calls
            .lock()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }
}

pub struct MockUpstream {
    pub base: String,
    pub state: Arc<MockState>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let router = Router::new()
            .route("/token", post(token_endpoint))
            .route("/register", post(register))
            .route("/mcp/{provider}", post(mcp))
            .route("/schedule", post(schedule))
            .with_state(Arc::clone(&state));

        Self {
            base: serve(router).await,
            state,
        }
    }
}

/// Serve a router on an ephemeral local port and return its base URL
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn token_endpoint(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.lock().push(form);
    let n = state.token_request_count();

    let scripted = state.token_replies.lock().pop_front();
    if let Some((status, body)) = scripted {
        return (StatusCode::from_u16(status).unwrap(), Json(body)).into_response();
    }

    Json(json!({
        "access_token": format!("access-{n}"),
        "refresh_token": format!("refresh-{n}"),
        "expires_in": 3600,
        "token_type": "Bearer"
    }))
    .into_response()
}

async fn register(State(state): State<Arc<MockState>>, Json(_body): Json<Value>) -> Response {
    state.registrations.fetch_add(1, Ordering::SeqCst);

    let scripted = state.registration_replies.lock().pop_front();
    if let Some((status, body)) = scripted {
        return (StatusCode::from_u16(status).unwrap(), Json(body)).into_response();
    }

    Json(json!({ "client_id": "registered-client" })).into_response()
}

async fn schedule(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = header_value(&headers, "x-signature");
    state.schedule_events.lock().push((signature, body.to_vec()));
    if state.fail_schedule.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn mcp(
    State(state): State<Arc<MockState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    state.mcp_calls.lock().push(McpCall {
        provider,
        method: method.clone(),
        session_id: header_value(&headers, "mcp-session-id"),
        authorization: header_value(&headers, "authorization"),
        body: body.clone(),
    });
    let id = body.get("id").cloned().unwrap_or(Value::Null);

    match method.as_str() {
        "initialize" => {
            let n = state.initializes.fetch_add(1, Ordering::SeqCst) + 1;
            if state.fail_initialize.load(Ordering::SeqCst) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
            }
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2025-11-25",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock", "version": "1.0.0"}
                }
            });
            if state.omit_session_id.load(Ordering::SeqCst) {
                return Json(reply).into_response();
            }
            ([("mcp-session-id", format!("session-{n}"))], Json(reply)).into_response()
        }
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => reply(
            &state,
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [
                        {"name": "search", "description": "Search things", "inputSchema": {"type": "object"}},
                        {"description": "no name, not a tool"},
                        {"name": "echo"}
                    ]
                }
            }),
        ),
        "tools/call" => {
            let name = body["params"]["name"].as_str().unwrap_or_default();
            if name == "fail-http" {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32602, "message": "bad arguments"}
                    })),
                )
                    .into_response();
            }
            if name == "fail" {
                reply(
                    &state,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32000, "message": "tool exploded"}
                    }),
                )
            } else {
                reply(
                    &state,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "content": [{"type": "text", "text": name}],
                            "arguments": body["params"]["arguments"]
                        }
                    }),
                )
            }
        }
        _ => reply(
            &state,
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            }),
        ),
    }
}

fn reply(state: &MockState, message: Value) -> Response {
    if state.sse.load(Ordering::SeqCst) {
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("event: message\ndata: {message}\n\n"),
        )
            .into_response()
    } else {
        Json(message).into_response()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Publisher that records schedules instead of sending them
#[derive(Default)]
pub struct RecordingPublisher {
    pub inputs: Mutex<Vec<ScheduleInput>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl RefreshPublisher for RecordingPublisher {
    async fn schedule_refresh(&self, input: &ScheduleInput) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::PublishFailed {
                status: Some(503),
                message: "scheduler unavailable".to_string(),
            });
        }
        self.inputs.lock().push(input.clone());
        Ok(())
    }
}

/// Confidential client with a configured id and secret
pub fn confidential_spec(base: &str) -> OAuthSpec {
    OAuthSpec {
        auth_url: format!("{base}/authorize"),
        token_url: format!("{base}/token"),
        client_id: Some("client-1".to_string()),
        client_secret: Some("secret-1".to_string()),
        use_pkce: false,
        scopes: vec!["read".to_string(), "write".to_string()],
        registration_url: None,
    }
}

/// Public PKCE client resolved through dynamic registration
pub fn pkce_spec(base: &str) -> OAuthSpec {
    OAuthSpec {
        auth_url: format!("{base}/authorize"),
        token_url: format!("{base}/token"),
        client_id: None,
        client_secret: Some("never-sent".to_string()),
        use_pkce: true,
        scopes: Vec::new(),
        registration_url: Some(format!("{base}/register")),
    }
}

pub fn oauth_provider(base: &str, id: &str, spec: OAuthSpec) -> ProviderConfig {
    ProviderConfig {
        id: id.to_string(),
        url: format!("{base}/mcp/{id}"),
        oauth: Some(spec),
        refresh_lead_ms: None,
    }
}

pub fn open_provider(base: &str, id: &str) -> ProviderConfig {
    ProviderConfig {
        id: id.to_string(),
        url: format!("{base}/mcp/{id}"),
        oauth: None,
        refresh_lead_ms: None,
    }
}

pub fn token(access: &str, refresh: Option<&str>, expires_at: Option<i64>) -> Token {
    Token {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_at,
        issued_at: now_ms() - 1_000,
        token_type: "Bearer".to_string(),
    }
}

pub fn fresh_token(access: &str, refresh: Option<&str>) -> Token {
    token(access, refresh, Some(now_ms() + 3_600_000))
}

pub fn expired_token(access: &str, refresh: Option<&str>) -> Token {
    token(access, refresh, Some(now_ms() - 1_000))
}

/// Value of a query parameter in a URL
pub fn query_param(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Mock upstream plus a token manager wired to it
pub struct Harness {
    pub upstream: MockUpstream,
    pub registry: Arc<ProviderRegistry>,
    pub flow: Arc<OAuthFlowEngine>,
    pub store: Arc<MemoryTokenStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub tokens: Arc<TokenManager>,
}

impl Harness {
    pub async fn start(providers: impl FnOnce(&str) -> Vec<ProviderConfig>) -> Self {
        Self::start_with_flow(providers, |flow| flow).await
    }

    /// Like [`Harness::start`], with a hook to tune the flow engine
    pub async fn start_with_flow(
        providers: impl FnOnce(&str) -> Vec<ProviderConfig>,
        tune: impl FnOnce(OAuthFlowEngine) -> OAuthFlowEngine,
    ) -> Self {
        let upstream = MockUpstream::start().await;
        let registry = Arc::new(ProviderRegistry::new(providers(&upstream.base)));
        let flow = Arc::new(tune(OAuthFlowEngine::new(
            Client::new(),
            Arc::clone(&registry),
            REDIRECT_URI.to_string(),
            "Test Gateway".to_string(),
        )));
        let store = Arc::new(MemoryTokenStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&flow),
            Arc::clone(&store) as Arc<dyn TokenStore>,
            Arc::clone(&publisher) as Arc<dyn RefreshPublisher>,
        ));

        Self {
            upstream,
            registry,
            flow,
            store,
            publisher,
            tokens,
        }
    }

    pub fn mock(&self) -> &MockState {
        &self.upstream.state
    }

    pub fn sessions(&self) -> SessionGateway {
        SessionGateway::new(
            HttpTransport::with_client(Client::new()),
            Arc::clone(&self.tokens),
        )
    }

    pub async fn seed(&self, user: &str, provider: &str, token: Token) {
        self.store
            .set_token(user, provider, DEFAULT_ACCOUNT, token)
            .await
            .unwrap();
    }

    pub async fn stored(&self, user: &str, provider: &str) -> Option<Token> {
        self.store.get_token(user, provider, None).await.unwrap()
    }

    /// Start an authorization and return `(url, state)`
    pub async fn begin(&self, provider: &str, user: &str) -> (String, String) {
        let url = self.flow.authorization_url(provider, user).await.unwrap();
        let state = query_param(&url, "state").unwrap();
        (url, state)
    }
}
