//! Token lifecycle management
//!
//! Exchanges authorization codes, refreshes tokens (on read when expired, or
//! when the external scheduler calls back), revokes, and hands the next
//! refresh to the [`RefreshPublisher`]. Scheduling always happens after the
//! token write and never rolls it back.

use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::flow::{OAuthFlowEngine, OAuthState};
use super::store::{DEFAULT_ACCOUNT, TokenStore};
use super::token::{Token, TokenResponse, now_ms};
use crate::config::{DEFAULT_REFRESH_LEAD_MS, OAuthSpec};
use crate::refresh::{RefreshPublisher, ScheduleInput};
use crate::{Error, Result};

/// Result of handing the next refresh to the publisher
#[derive(Debug)]
pub enum ScheduleStatus {
    /// Token does not expire; nothing to schedule
    NotNeeded,
    /// Publisher accepted the schedule
    Scheduled(ScheduleInput),
    /// Publisher failed; the token was still persisted
    Failed {
        /// The schedule that could not be published
        input: ScheduleInput,
        /// Publish error
        error: Error,
    },
}

impl ScheduleStatus {
    /// Epoch ms of the next scheduled refresh, if one was computed
    #[must_use]
    pub fn run_at(&self) -> Option<i64> {
        match self {
            Self::NotNeeded => None,
            Self::Scheduled(input) | Self::Failed { input, .. } => Some(input.run_at),
        }
    }

    /// Publish error, if scheduling failed
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Result of a successful authorization-code callback
#[derive(Debug)]
pub struct CallbackOutcome {
    /// The persisted token
    pub token: Token,
    /// User the token belongs to
    pub user_id: String,
    /// Provider the token was issued by
    pub provider_id: String,
    /// Refresh scheduling outcome
    pub schedule: ScheduleStatus,
}

/// Result of a successful refresh
#[derive(Debug)]
pub struct RefreshOutcome {
    /// The persisted token
    pub token: Token,
    /// Refresh scheduling outcome
    pub schedule: ScheduleStatus,
}

/// Refresh summary returned to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    /// New expiry (epoch ms)
    pub expires_at: Option<i64>,
    /// Next scheduled refresh (epoch ms)
    pub next_run_at: Option<i64>,
}

impl From<&RefreshOutcome> for RefreshSummary {
    fn from(outcome: &RefreshOutcome) -> Self {
        Self {
            expires_at: outcome.token.expires_at,
            next_run_at: outcome.schedule.run_at(),
        }
    }
}

/// Owns the per-user, per-provider token lifecycle
pub struct TokenManager {
    flow: Arc<OAuthFlowEngine>,
    store: Arc<dyn TokenStore>,
    publisher: Arc<dyn RefreshPublisher>,
    default_lead_ms: u64,
}

impl TokenManager {
    /// Create a token manager
    #[must_use]
    pub fn new(
        flow: Arc<OAuthFlowEngine>,
        store: Arc<dyn TokenStore>,
        publisher: Arc<dyn RefreshPublisher>,
    ) -> Self {
        Self {
            flow,
            store,
            publisher,
            default_lead_ms: DEFAULT_REFRESH_LEAD_MS,
        }
    }

    /// Override the default refresh lead time
    #[must_use]
    pub fn with_default_lead_ms(mut self, lead_ms: u64) -> Self {
        self.default_lead_ms = lead_ms;
        self
    }

    /// The flow engine used for authorization URLs
    #[must_use]
    pub fn flow(&self) -> &Arc<OAuthFlowEngine> {
        &self.flow
    }

    /// Exchange an authorization code for a token
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<CallbackOutcome> {
        let parsed = OAuthState::parse(state)?;
        let provider_id = parsed.provider_id.as_str();
        let spec = self.flow.registry().oauth_spec(provider_id)?;

        // Single use: removed whether or not the exchange succeeds
        let pending = self.flow.take_pending(state);
        let verifier = if spec.use_pkce {
            Some(
                pending
                    .and_then(|p| p.verifier)
                    .ok_or(Error::MissingCodeVerifier)?,
            )
        } else {
            if pending.is_none() {
                warn!(provider = %provider_id, "Callback state was never issued or already used");
                return Err(Error::InvalidState(state.to_string()));
            }
            None
        };

        let client_id = self.flow.resolve_client_id(provider_id, spec).await?;

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id.as_str()),
            ("redirect_uri", self.flow.redirect_uri()),
        ];
        if let Some(ref verifier) = verifier {
            params.push(("code_verifier", verifier.as_str()));
        }
        if let Some(secret) = confidential_secret(spec) {
            params.push(("client_secret", secret));
        }

        let issued_at = now_ms();
        let response = self
            .post_token_form(&spec.token_url, &params, |status, body| {
                Error::TokenExchangeFailed { status, body }
            })
            .await?;
        let token = Token::from_response(response, issued_at);

        self.store
            .set_token(&parsed.user_id, provider_id, DEFAULT_ACCOUNT, token.clone())
            .await?;
        info!(provider = %provider_id, user = %parsed.user_id, "Authorization completed");

        let schedule = self
            .schedule_next(&parsed.user_id, provider_id, DEFAULT_ACCOUNT, &token)
            .await;

        Ok(CallbackOutcome {
            token,
            user_id: parsed.user_id,
            provider_id: parsed.provider_id,
            schedule,
        })
    }

    /// Current token for the default account
    ///
    /// An expired token is refreshed synchronously before returning.
    pub async fn get_token(&self, user_id: &str, provider_id: &str) -> Result<Option<Token>> {
        let Some(token) = self.store.get_token(user_id, provider_id, None).await? else {
            return Ok(None);
        };

        if token.is_expired() {
            debug!(provider = %provider_id, user = %user_id, "Stored token expired, refreshing");
            let outcome = self.refresh_token(user_id, provider_id).await?;
            return Ok(Some(outcome.token));
        }

        Ok(Some(token))
    }

    /// Refresh the default account's token
    pub async fn refresh_token(&self, user_id: &str, provider_id: &str) -> Result<RefreshOutcome> {
        self.refresh_account(user_id, provider_id, DEFAULT_ACCOUNT)
            .await
    }

    /// Refresh a specific account's token
    pub async fn refresh_account(
        &self,
        user_id: &str,
        provider_id: &str,
        account_id: &str,
    ) -> Result<RefreshOutcome> {
        let spec = self.flow.registry().oauth_spec(provider_id)?;

        let previous = self
            .store
            .get_token(user_id, provider_id, Some(account_id))
            .await?;
        let Some(refresh_token) = previous.and_then(|t| t.refresh_token) else {
            return Err(Error::NoRefreshToken(provider_id.to_string()));
        };

        let client_id = self.flow.known_client_id(provider_id, spec);
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("redirect_uri", self.flow.redirect_uri()),
        ];
        if let Some(ref client_id) = client_id {
            params.push(("client_id", client_id.as_str()));
        }
        if let Some(secret) = confidential_secret(spec) {
            params.push(("client_secret", secret));
        }

        let issued_at = now_ms();
        let response = self
            .post_token_form(&spec.token_url, &params, |status, body| {
                Error::TokenRefreshFailed { status, body }
            })
            .await?;

        let mut token = Token::from_response(response, issued_at);
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token);
        }

        self.store
            .set_token(user_id, provider_id, account_id, token.clone())
            .await?;
        info!(provider = %provider_id, user = %user_id, account = %account_id, "Token refreshed");

        let schedule = self
            .schedule_next(user_id, provider_id, account_id, &token)
            .await;
        Ok(RefreshOutcome { token, schedule })
    }

    /// Delete the local token record. No upstream revocation is issued.
    pub async fn revoke_token(&self, user_id: &str, provider_id: &str) -> Result<()> {
        self.store
            .revoke_token(user_id, provider_id, DEFAULT_ACCOUNT)
            .await?;
        info!(provider = %provider_id, user = %user_id, "Token revoked locally");
        Ok(())
    }

    /// Account ids with a stored token for this user and provider
    pub async fn accounts(&self, user_id: &str, provider_id: &str) -> Result<Vec<String>> {
        self.store.get_accounts(user_id, provider_id).await
    }

    /// Lead time for a provider, falling back to the default
    fn lead_ms(&self, provider_id: &str) -> u64 {
        self.flow
            .registry()
            .get(provider_id)
            .and_then(|p| p.refresh_lead_ms)
            .unwrap_or(self.default_lead_ms)
    }

    /// Ask the publisher to refresh `token` ahead of its expiry
    async fn schedule_next(
        &self,
        user_id: &str,
        provider_id: &str,
        account_id: &str,
        token: &Token,
    ) -> ScheduleStatus {
        let Some(run_at) = token.refresh_run_at(self.lead_ms(provider_id)) else {
            return ScheduleStatus::NotNeeded;
        };

        let input = ScheduleInput {
            user_id: user_id.to_string(),
            provider_id: provider_id.to_string(),
            account_id: account_id.to_string(),
            run_at,
        };

        match self.publisher.schedule_refresh(&input).await {
            Ok(()) => ScheduleStatus::Scheduled(input),
            Err(error) => {
                warn!(provider = %provider_id, user = %user_id, error = %error, "Failed to schedule token refresh");
                ScheduleStatus::Failed { input, error }
            }
        }
    }

    /// POST a form to the token endpoint; rejections are mapped by `reject`
    async fn post_token_form(
        &self,
        token_url: &str,
        params: &[(&str, &str)],
        reject: impl FnOnce(u16, String) -> Error,
    ) -> Result<TokenResponse> {
        let client: &Client = self.flow.http_client();
        let response = client
            .post(token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, url = %token_url, "Token endpoint rejected request");
            return Err(reject(status.as_u16(), body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            reject(
                status.as_u16(),
                format!("Failed to parse token response: {e}"),
            )
        })
    }
}

/// Client secret sent with token requests; never under PKCE
fn confidential_secret(spec: &OAuthSpec) -> Option<&str> {
    if spec.use_pkce {
        None
    } else {
        spec.client_secret.as_deref()
    }
}
