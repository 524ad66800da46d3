//! Session gateway against a mock MCP upstream: session reuse, auth headers,
//! SSE decoding, tool errors and plan execution.

mod common;

use std::sync::atomic::Ordering;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use common::{Harness, confidential_spec, expired_token, fresh_token, oauth_provider, open_provider};
use mcp_auth_gateway::gateway::{CatalogEntry, ToolInvocation, ToolPlanner};
use mcp_auth_gateway::protocol::PROTOCOL_VERSION;
use mcp_auth_gateway::{Error, Result};

async fn harness() -> Harness {
    Harness::start(|base| {
        vec![
            oauth_provider(base, "alpha", confidential_spec(base)),
            open_provider(base, "open"),
        ]
    })
    .await
}

#[tokio::test]
async fn one_initialize_serves_repeated_calls() {
    let h = harness().await;
    h.seed("user-1", "alpha", fresh_token("access-a", Some("rt"))).await;
    let sessions = h.sessions();
    let provider = h.registry.require("alpha").unwrap();

    let first = sessions.provider_tools(provider, "user-1").await.unwrap();
    let second = sessions.provider_tools(provider, "user-1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.mock().initializes.load(Ordering::SeqCst), 1);
    assert_eq!(
        sessions.cached_session("user-1", "alpha").as_deref(),
        Some("session-1")
    );

    let init = &h.mock().calls("initialize")[0];
    assert!(init.session_id.is_none());
    assert_eq!(init.body["params"]["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(init.authorization.as_deref(), Some("Bearer access-a"));

    let initialized = h.mock().calls("notifications/initialized");
    assert_eq!(initialized.len(), 1);
    assert!(initialized[0].body.get("id").is_none());

    for call in h.mock().calls("tools/list") {
        assert_eq!(call.session_id.as_deref(), Some("session-1"));
        assert_eq!(call.authorization.as_deref(), Some("Bearer access-a"));
    }
}

#[tokio::test]
async fn sessions_are_kept_per_user() {
    let h = harness().await;
    let sessions = h.sessions();
    let provider = h.registry.require("open").unwrap();

    let a = sessions.ensure_session(provider, "user-a").await.unwrap();
    let b = sessions.ensure_session(provider, "user-b").await.unwrap();
    let again = sessions.ensure_session(provider, "user-a").await.unwrap();

    assert_ne!(a, b);
    assert_eq!(a, again);
    assert_eq!(sessions.session_count(), 2);
    assert_eq!(h.mock().initializes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn provider_without_oauth_gets_no_bearer() {
    let h = harness().await;
    let sessions = h.sessions();
    let provider = h.registry.require("open").unwrap();

    sessions.provider_tools(provider, "user-1").await.unwrap();
    assert!(
        h.mock()
            .mcp_calls
            .lock()
            .iter()
            .all(|c| c.authorization.is_none())
    );
}

#[tokio::test]
async fn malformed_tool_entries_are_skipped() {
    let h = harness().await;
    let sessions = h.sessions();
    let provider = h.registry.require("open").unwrap();

    let tools = sessions.provider_tools(provider, "user-1").await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "echo"]);
    assert_eq!(tools[0].description.as_deref(), Some("Search things"));
    assert_eq!(tools[1].input_schema, json!({}));
}

#[tokio::test]
async fn event_stream_replies_are_decoded() {
    let h = harness().await;
    h.mock().sse.store(true, Ordering::SeqCst);
    let sessions = h.sessions();

    let result = sessions
        .execute_provider_tool("open", "search", json!({"q": "rust"}), "user-1", &h.registry)
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "search");
    assert_eq!(result["arguments"], json!({"q": "rust"}));
}

#[tokio::test]
async fn tool_call_sends_name_and_arguments() {
    let h = harness().await;
    h.seed("user-1", "alpha", fresh_token("access-a", None)).await;
    let sessions = h.sessions();

    sessions
        .execute_provider_tool("alpha", "echo", json!({"text": "hi"}), "user-1", &h.registry)
        .await
        .unwrap();

    let call = &h.mock().calls("tools/call")[0];
    assert_eq!(call.body["params"], json!({"name": "echo", "arguments": {"text": "hi"}}));
    assert_eq!(call.provider, "alpha");
}

#[tokio::test]
async fn protocol_errors_surface_verbatim() {
    let h = harness().await;
    let sessions = h.sessions();

    let err = sessions
        .execute_provider_tool("open", "fail", json!({}), "user-1", &h.registry)
        .await
        .unwrap_err();
    match err {
        Error::ToolCallFailed { code, message, .. } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "tool exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn protocol_errors_on_error_status_surface_verbatim() {
    let h = harness().await;
    let sessions = h.sessions();

    let err = sessions
        .execute_provider_tool("open", "fail-http", json!({}), "user-1", &h.registry)
        .await
        .unwrap_err();
    match err {
        Error::ToolCallFailed { code, message, .. } => {
            assert_eq!(code, -32602);
            assert_eq!(message, "bad arguments");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let h = harness().await;
    let sessions = h.sessions();

    let err = sessions
        .execute_provider_tool("ghost", "search", json!({}), "user-1", &h.registry)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderNotFound(ref id) if id == "ghost"));
    assert!(h.mock().mcp_calls.lock().is_empty());
}

#[tokio::test]
async fn failed_handshake_is_not_cached() {
    let h = harness().await;
    h.mock().fail_initialize.store(true, Ordering::SeqCst);
    let sessions = h.sessions();
    let provider = h.registry.require("open").unwrap();

    let err = sessions.ensure_session(provider, "user-1").await.unwrap_err();
    assert!(matches!(err, Error::SessionInitFailed(_)), "got {err:?}");
    assert_eq!(sessions.session_count(), 0);

    h.mock().fail_initialize.store(false, Ordering::SeqCst);
    sessions.ensure_session(provider, "user-1").await.unwrap();
    assert_eq!(h.mock().initializes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_session_header_caches_a_local_id() {
    let h = harness().await;
    h.mock().omit_session_id.store(true, Ordering::SeqCst);
    let sessions = h.sessions();
    let provider = h.registry.require("open").unwrap();

    let session_id = sessions.ensure_session(provider, "user-1").await.unwrap();
    assert!(session_id.starts_with("local-"), "session id {session_id}");

    sessions.provider_tools(provider, "user-1").await.unwrap();
    sessions.provider_tools(provider, "user-1").await.unwrap();
    assert_eq!(h.mock().initializes.load(Ordering::SeqCst), 1);
    assert_eq!(
        sessions.cached_session("user-1", "open").as_deref(),
        Some(session_id.as_str())
    );

    let lists = h.mock().calls("tools/list");
    assert_eq!(lists.len(), 2);
    assert!(lists.iter().all(|c| c.session_id.as_deref() == Some(session_id.as_str())));
}

#[tokio::test]
async fn expired_token_is_refreshed_before_calling_upstream() {
    let h = harness().await;
    h.seed("user-1", "alpha", expired_token("stale", Some("rt"))).await;
    let sessions = h.sessions();

    sessions
        .execute_provider_tool("alpha", "search", json!({}), "user-1", &h.registry)
        .await
        .unwrap();

    let call = &h.mock().calls("tools/call")[0];
    assert_eq!(call.authorization.as_deref(), Some("Bearer access-1"));
}

struct FixedPlanner;

#[async_trait]
impl ToolPlanner for FixedPlanner {
    async fn plan(&self, prompt: &str, catalog: &[CatalogEntry]) -> Result<Vec<ToolInvocation>> {
        Ok(catalog
            .iter()
            .filter(|entry| entry.tool.name == "echo")
            .map(|entry| ToolInvocation {
                provider_id: entry.provider_id.clone(),
                tool_name: entry.tool.name.clone(),
                arguments: json!({"prompt": prompt}),
            })
            .collect())
    }
}

#[tokio::test]
async fn plan_runs_over_reachable_providers_in_order() {
    let h = harness().await;
    h.seed("user-1", "alpha", fresh_token("access-a", None)).await;
    let sessions = h.sessions();

    let results: Vec<Value> = sessions
        .execute_plan(&FixedPlanner, "say hi", "user-1", &h.registry)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    let providers: Vec<_> = h
        .mock()
        .calls("tools/call")
        .into_iter()
        .map(|c| c.provider)
        .collect();
    assert_eq!(providers, vec!["alpha", "open"]);
    assert_eq!(results[0]["arguments"], json!({"prompt": "say hi"}));
}
