//! Inbound refresh trigger
//!
//! The external scheduler calls back here when a scheduled refresh is due.
//! Requests are signed with the shared signing key; the signature is checked
//! against the raw body before anything else happens.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::oauth::{DEFAULT_ACCOUNT, RefreshSummary, TokenManager};
use crate::refresh::signing::{self, SIGNATURE_HEADER};

/// Route the scheduler posts to
pub const REFRESH_TRIGGER_PATH: &str = "/auth/refresh/{provider}";

/// Trigger payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerBody {
    user_id: Option<String>,
    account_id: Option<String>,
}

/// State for the trigger handler
#[derive(Clone)]
struct TriggerState {
    tokens: Arc<TokenManager>,
    signing_key: Option<Arc<str>>,
}

/// Router serving the refresh trigger
///
/// Without a signing key every request is rejected as unsigned.
pub fn refresh_trigger_routes(tokens: Arc<TokenManager>, signing_key: Option<String>) -> Router {
    if signing_key.is_none() {
        warn!("No scheduler signing key configured, refresh trigger will reject all requests");
    }

    Router::new()
        .route(REFRESH_TRIGGER_PATH, post(refresh_trigger_handler))
        .with_state(TriggerState {
            tokens,
            signing_key: signing_key.map(Arc::from),
        })
}

async fn refresh_trigger_handler(
    State(state): State<TriggerState>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request_id = uuid::Uuid::new_v4().to_string();
    debug!(request_id = %request_id, provider = %provider_id, body_len = body.len(), "Received refresh trigger");

    if let Err(e) = check_signature(&headers, &body, state.signing_key.as_deref()) {
        warn!(request_id = %request_id, provider = %provider_id, "Refresh trigger signature rejected");
        return error_reply(StatusCode::UNAUTHORIZED, &e, None);
    }

    let parsed = serde_json::from_slice::<TriggerBody>(&body)
        .ok()
        .and_then(|b| b.user_id.filter(|u| !u.is_empty()).map(|u| (u, b.account_id)));
    let Some((user_id, account_id)) = parsed else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "userId is required", "code": "MISSING_PARAMS" })),
        );
    };
    let account_id = account_id.unwrap_or_else(|| DEFAULT_ACCOUNT.to_string());

    match state
        .tokens
        .refresh_account(&user_id, &provider_id, &account_id)
        .await
    {
        Ok(outcome) => {
            info!(request_id = %request_id, provider = %provider_id, user = %user_id, "Scheduled refresh completed");
            let summary = RefreshSummary::from(&outcome);
            (StatusCode::OK, Json(json!(summary)))
        }
        Err(e) if e.is_refresh_failure() => {
            warn!(request_id = %request_id, provider = %provider_id, user = %user_id, error = %e, "Refresh needs reauthorization");
            let reauthorize_url = match state
                .tokens
                .flow()
                .authorization_url(&provider_id, &user_id)
                .await
            {
                Ok(url) => Some(url),
                Err(url_err) => {
                    warn!(provider = %provider_id, error = %url_err, "Could not build reauthorization URL");
                    None
                }
            };
            error_reply(StatusCode::CONFLICT, &e, Some(reauthorize_url))
        }
        Err(e) => {
            error!(request_id = %request_id, provider = %provider_id, user = %user_id, error = %e, "Scheduled refresh failed");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e, None)
        }
    }
}

fn check_signature(headers: &HeaderMap, body: &[u8], key: Option<&str>) -> Result<(), Error> {
    let key = key.ok_or(Error::SignatureInvalid)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::SignatureInvalid)?;
    signing::verify(key, body, signature)
}

/// `reauthorize` is `Some` only for the reauthorization class of errors
fn error_reply(
    status: StatusCode,
    error: &Error,
    reauthorize: Option<Option<String>>,
) -> (StatusCode, Json<Value>) {
    let mut body = json!({ "error": error.to_string(), "code": error.code() });
    if let Some(url) = reauthorize {
        body["reauthorizeUrl"] = json!(url);
    }
    (status, Json(body))
}
