//! OAuth redirect callback endpoint
//!
//! Receives `?code&state` from the provider after the user authorized in the
//! browser and completes the exchange through the [`TokenManager`].

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::lifecycle::TokenManager;
use crate::Error;

/// Path the redirect URI points at
pub const CALLBACK_PATH: &str = "/oauth/callback";

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (`providerId:userId:nonce`)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Router serving the callback endpoint
pub fn callback_routes(manager: Arc<TokenManager>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(manager)
}

/// Handle the OAuth callback
async fn handle_callback(
    State(manager): State<Arc<TokenManager>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    debug!(has_code = params.code.is_some(), state = ?params.state, "Received OAuth callback");

    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Provider returned an authorization error");
        return (StatusCode::BAD_REQUEST, Html(error_page(&error, &description)));
    }

    let (Some(code), Some(state)) = (params.code, params.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("missing_params", "Authorization code or state not provided")),
        );
    };

    match manager.handle_callback(&code, &state).await {
        Ok(outcome) => {
            info!(provider = %outcome.provider_id, user = %outcome.user_id, "OAuth callback completed");
            (StatusCode::OK, Html(success_page(&outcome.provider_id)))
        }
        Err(e) => {
            warn!(error = %e, code = e.code(), "OAuth callback failed");
            let status = match e {
                Error::InvalidState(_) | Error::MissingCodeVerifier | Error::UnknownProvider(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, Html(error_page(e.code(), &e.to_string())))
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn success_page(provider: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
    <h1>Authorization Successful</h1>
    <p>{} is connected. You can close this window.</p>
</body>
</html>"#,
        escape(provider)
    )
}

fn error_page(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
    <h1>Authorization Failed</h1>
    <p>{}</p>
    <p style="font-family: monospace; opacity: 0.7;">Error: {}</p>
</body>
</html>"#,
        escape(description),
        escape(error)
    )
}
