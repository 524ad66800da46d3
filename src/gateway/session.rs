//! Protocol session gateway
//!
//! Holds one upstream MCP session per (user, provider) pair. A session is
//! created lazily by an `initialize` handshake and reused for every later call
//! for the lifetime of the gateway instance.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::planner::{CatalogEntry, ToolPlanner};
use crate::config::ProviderConfig;
use crate::oauth::TokenManager;
use crate::protocol::{CallToolParams, InitializeParams, RpcOutcome, Tool};
use crate::registry::ProviderRegistry;
use crate::transport::{CallOptions, HttpTransport};
use crate::{Error, Result};

type SessionKey = (String, String);

/// Multiplexes authorized MCP sessions across users and providers
pub struct SessionGateway {
    transport: HttpTransport,
    tokens: Arc<TokenManager>,
    /// (user, provider) -> upstream session id
    sessions: DashMap<SessionKey, String>,
}

impl SessionGateway {
    /// Create a gateway
    #[must_use]
    pub fn new(transport: HttpTransport, tokens: Arc<TokenManager>) -> Self {
        Self {
            transport,
            tokens,
            sessions: DashMap::new(),
        }
    }

    /// Number of cached sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Cached session id for a pair, if any
    #[must_use]
    pub fn cached_session(&self, user_id: &str, provider_id: &str) -> Option<String> {
        self.sessions
            .get(&(user_id.to_string(), provider_id.to_string()))
            .map(|s| s.value().clone())
    }

    /// Make sure a session exists for this pair and return its id
    pub async fn ensure_session(&self, provider: &ProviderConfig, user_id: &str) -> Result<String> {
        let (session_id, _) = self.session_for(provider, user_id).await?;
        Ok(session_id)
    }

    /// List the tools a provider exposes to this user
    pub async fn provider_tools(&self, provider: &ProviderConfig, user_id: &str) -> Result<Vec<Tool>> {
        let result = self.call(provider, user_id, "tools/list", json!({})).await?;

        let Some(tools) = result.get("tools").and_then(Value::as_array) else {
            debug!(provider = %provider.id, "tools/list result has no tools field");
            return Ok(Vec::new());
        };

        let parsed: Vec<Tool> = tools
            .iter()
            .filter_map(|t| match serde_json::from_value(t.clone()) {
                Ok(tool) => Some(tool),
                Err(e) => {
                    warn!(provider = %provider.id, error = %e, "Skipping malformed tool definition");
                    None
                }
            })
            .collect();

        debug!(provider = %provider.id, count = parsed.len(), "Listed provider tools");
        Ok(parsed)
    }

    /// Invoke a tool on a provider and return its result payload
    pub async fn execute_provider_tool(
        &self,
        provider_id: &str,
        tool_name: &str,
        arguments: Value,
        user_id: &str,
        registry: &ProviderRegistry,
    ) -> Result<Value> {
        let provider = registry.require(provider_id)?;
        let params = serde_json::to_value(CallToolParams {
            name: tool_name.to_string(),
            arguments,
        })?;

        let result = self.call(provider, user_id, "tools/call", params).await?;
        info!(provider = %provider_id, tool = %tool_name, "Tool call completed");
        Ok(result)
    }

    /// Ask a planner for tool invocations over every reachable provider's
    /// catalog and run them in order
    ///
    /// Providers whose tools cannot be listed are left out of the catalog.
    /// Execution stops at the first failing invocation.
    pub async fn execute_plan(
        &self,
        planner: &dyn ToolPlanner,
        prompt: &str,
        user_id: &str,
        registry: &ProviderRegistry,
    ) -> Result<Vec<Value>> {
        let mut catalog = Vec::new();
        for provider in registry.all() {
            match self.provider_tools(provider, user_id).await {
                Ok(tools) => catalog.extend(tools.into_iter().map(|tool| CatalogEntry {
                    provider_id: provider.id.clone(),
                    tool,
                })),
                Err(e) => {
                    warn!(provider = %provider.id, error = %e, "Provider left out of tool catalog");
                }
            }
        }

        let plan = planner.plan(prompt, &catalog).await?;
        debug!(steps = plan.len(), "Executing tool plan");

        let mut results = Vec::with_capacity(plan.len());
        for step in plan {
            let result = self
                .execute_provider_tool(
                    &step.provider_id,
                    &step.tool_name,
                    step.arguments,
                    user_id,
                    registry,
                )
                .await?;
            results.push(result);
        }
        Ok(results)
    }

    /// Issue a JSON-RPC call on the pair's session
    async fn call(
        &self,
        provider: &ProviderConfig,
        user_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let (session_id, token) = self.session_for(provider, user_id).await?;

        let reply = self
            .transport
            .request(
                &provider.url,
                method,
                params,
                CallOptions {
                    session_id: Some(&session_id),
                    bearer_token: token.as_deref(),
                },
            )
            .await?;

        match RpcOutcome::from_value(reply.body) {
            RpcOutcome::Result(result) => Ok(result),
            RpcOutcome::Error(error) => {
                warn!(provider = %provider.id, method = %method, code = error.code, message = %error.message, "Upstream returned an error");
                Err(Error::ToolCallFailed {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                })
            }
        }
    }

    /// Session id plus the current bearer token, handshaking on first use
    async fn session_for(
        &self,
        provider: &ProviderConfig,
        user_id: &str,
    ) -> Result<(String, Option<String>)> {
        let token = self.bearer_token(provider, user_id).await?;

        let key = (user_id.to_string(), provider.id.clone());
        if let Some(session_id) = self.sessions.get(&key) {
            return Ok((session_id.value().clone(), token));
        }

        let session_id = self.initialize(provider, token.as_deref()).await?;
        self.sessions.insert(key, session_id.clone());
        info!(provider = %provider.id, user = %user_id, "Upstream session established");

        Ok((session_id, token))
    }

    /// Run the `initialize` handshake without a session header
    async fn initialize(&self, provider: &ProviderConfig, token: Option<&str>) -> Result<String> {
        let params = serde_json::to_value(InitializeParams::gateway())?;
        let reply = self
            .transport
            .request(
                &provider.url,
                "initialize",
                params,
                CallOptions {
                    session_id: None,
                    bearer_token: token,
                },
            )
            .await
            .map_err(|e| Error::SessionInitFailed(format!("{}: {e}", provider.id)))?;

        if let RpcOutcome::Error(error) = RpcOutcome::from_value(reply.body) {
            return Err(Error::SessionInitFailed(format!(
                "{}: {} ({})",
                provider.id, error.message, error.code
            )));
        }

        let session_id = reply.session_id.unwrap_or_else(|| {
            debug!(provider = %provider.id, "No session id from upstream, using local placeholder");
            format!("local-{}", Uuid::new_v4())
        });

        self.transport
            .notify(
                &provider.url,
                "notifications/initialized",
                CallOptions {
                    session_id: Some(&session_id),
                    bearer_token: token,
                },
            )
            .await;

        Ok(session_id)
    }

    /// Access token for OAuth providers; `None` for providers without OAuth
    async fn bearer_token(&self, provider: &ProviderConfig, user_id: &str) -> Result<Option<String>> {
        if !provider.uses_oauth() {
            return Ok(None);
        }
        Ok(self
            .tokens
            .get_token(user_id, &provider.id)
            .await?
            .map(|t| t.access_token))
    }
}
