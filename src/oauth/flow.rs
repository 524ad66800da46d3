//! OAuth flow engine
//!
//! Builds authorization URLs for the authorization-code grant, with PKCE
//! (RFC 7636) and dynamic client registration (RFC 7591) when the provider
//! asks for them. The pending-authorization and registered-client tables live
//! on the engine instance.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::config::OAuthSpec;
use crate::registry::ProviderRegistry;
use crate::{Error, Result};

/// Parsed OAuth `state` parameter (`providerId:userId:nonce`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    /// Provider id
    pub provider_id: String,
    /// User id
    pub user_id: String,
    /// Single-use nonce
    pub nonce: String,
}

impl OAuthState {
    /// Create a state with a fresh nonce
    #[must_use]
    pub fn new(provider_id: &str, user_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            user_id: user_id.to_string(),
            nonce: generate_nonce(),
        }
    }

    /// Parse a state string
    ///
    /// The provider id is the first segment and the nonce the last, so user
    /// ids may themselves contain `:`.
    pub fn parse(state: &str) -> Result<Self> {
        let invalid = || Error::InvalidState(state.to_string());

        let (provider_id, rest) = state.split_once(':').ok_or_else(invalid)?;
        let (user_id, nonce) = rest.rsplit_once(':').ok_or_else(invalid)?;

        if provider_id.is_empty() || user_id.is_empty() || nonce.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            provider_id: provider_id.to_string(),
            user_id: user_id.to_string(),
            nonce: nonce.to_string(),
        })
    }
}

impl std::fmt::Display for OAuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.provider_id, self.user_id, self.nonce)
    }
}

/// How long an issued state stays redeemable
pub const PENDING_TTL: Duration = Duration::from_secs(600);

/// Upper bound on outstanding authorizations; the oldest is evicted past it
const MAX_PENDING: usize = 10_000;

/// An issued state awaiting its callback
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// PKCE code verifier, for PKCE providers only
    pub verifier: Option<String>,
    issued_at: Instant,
}

/// Client registration response
#[derive(Debug, Deserialize)]
struct ClientRegistrationResponse {
    #[serde(default)]
    client_id: Option<String>,
}

/// Authorization URL builder with PKCE and dynamic registration
pub struct OAuthFlowEngine {
    /// HTTP client for registration requests
    http_client: Client,
    /// Configured providers
    registry: Arc<ProviderRegistry>,
    /// Redirect URI sent with every request
    redirect_uri: String,
    /// Client name used for dynamic registration
    client_name: String,
    /// Issued state -> pending authorization, single use
    pending: DashMap<String, PendingAuthorization>,
    /// Lifetime of a pending authorization
    pending_ttl: Duration,
    /// provider id -> dynamically registered client id
    registered_clients: DashMap<String, String>,
}

impl OAuthFlowEngine {
    /// Create a new flow engine
    #[must_use]
    pub fn new(
        http_client: Client,
        registry: Arc<ProviderRegistry>,
        redirect_uri: String,
        client_name: String,
    ) -> Self {
        Self {
            http_client,
            registry,
            redirect_uri,
            client_name,
            pending: DashMap::new(),
            pending_ttl: PENDING_TTL,
            registered_clients: DashMap::new(),
        }
    }

    /// Override how long an issued state stays redeemable
    #[must_use]
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    /// Provider registry backing this engine
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Redirect URI sent to providers
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// HTTP client shared with the token lifecycle
    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Build the authorization URL for `user_id` against `provider_id`
    pub async fn authorization_url(&self, provider_id: &str, user_id: &str) -> Result<String> {
        let spec = self.registry.oauth_spec(provider_id)?;
        let client_id = self.resolve_client_id(provider_id, spec).await?;

        let state = OAuthState::new(provider_id, user_id).to_string();

        let mut auth_url = Url::parse(&spec.auth_url)
            .map_err(|e| Error::Config(format!("Invalid auth endpoint for {provider_id}: {e}")))?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            params.append_pair("state", &state);

            let verifier = if spec.use_pkce {
                let (verifier, challenge) = generate_pkce();
                params.append_pair("code_challenge", &challenge);
                params.append_pair("code_challenge_method", "S256");
                Some(verifier)
            } else {
                None
            };
            self.remember(state.clone(), verifier);

            if !spec.scopes.is_empty() {
                params.append_pair("scope", &spec.scopes.join(" "));
            }
        }

        debug!(provider = %provider_id, user = %user_id, pkce = spec.use_pkce, "Built authorization URL");
        Ok(auth_url.to_string())
    }

    /// Remove and return the pending authorization issued for `state`
    ///
    /// Unknown, already redeemed and expired states all yield `None`.
    pub fn take_pending(&self, state: &str) -> Option<PendingAuthorization> {
        self.pending
            .remove(state)
            .map(|(_, p)| p)
            .filter(|p| p.issued_at.elapsed() < self.pending_ttl)
    }

    /// Number of authorization flows awaiting their callback
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Record an issued state, reclaiming expired entries first
    fn remember(&self, state: String, verifier: Option<String>) {
        let ttl = self.pending_ttl;
        self.pending.retain(|_, p| p.issued_at.elapsed() < ttl);

        if self.pending.len() >= MAX_PENDING {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|e| e.value().issued_at)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.pending.remove(&oldest);
            }
        }

        self.pending.insert(
            state,
            PendingAuthorization {
                verifier,
                issued_at: Instant::now(),
            },
        );
    }

    /// Client id already known for a provider (explicit or registered)
    #[must_use]
    pub fn known_client_id(&self, provider_id: &str, spec: &OAuthSpec) -> Option<String> {
        spec.client_id.clone().or_else(|| {
            self.registered_clients
                .get(provider_id)
                .map(|id| id.value().clone())
        })
    }

    /// Resolve the client id: explicit config, cached registration, or a new
    /// dynamic registration
    pub async fn resolve_client_id(&self, provider_id: &str, spec: &OAuthSpec) -> Result<String> {
        if let Some(id) = self.known_client_id(provider_id, spec) {
            return Ok(id);
        }

        let Some(ref endpoint) = spec.registration_url else {
            return Err(Error::Config(format!(
                "No client_id or registration_url configured for provider {provider_id}"
            )));
        };

        let client_id = self.register_client(provider_id, endpoint).await?;
        self.registered_clients
            .insert(provider_id.to_string(), client_id.clone());
        Ok(client_id)
    }

    /// Register a new public client dynamically
    async fn register_client(&self, provider_id: &str, endpoint: &str) -> Result<String> {
        let body = serde_json::json!({
            "client_name": self.client_name,
            "redirect_uris": [self.redirect_uri],
            "grant_types": ["authorization_code", "refresh_token"],
            "token_endpoint_auth_method": "none"
        });

        let response = self
            .http_client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RegistrationFailed {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RegistrationFailed {
                status: Some(status.as_u16()),
                message: format!("HTTP {status} - {body}"),
            });
        }

        let registration: ClientRegistrationResponse =
            response.json().await.map_err(|e| Error::RegistrationFailed {
                status: Some(status.as_u16()),
                message: format!("Failed to parse registration response: {e}"),
            })?;

        let client_id = registration
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::RegistrationFailed {
                status: Some(status.as_u16()),
                message: "Registration response has no client_id".to_string(),
            })?;

        info!(provider = %provider_id, client_id = %client_id, "Registered OAuth client");
        Ok(client_id)
    }
}

/// Generate PKCE code verifier and S256 challenge
pub(crate) fn generate_pkce() -> (String, String) {
    let verifier_bytes: [u8; 32] = rand::random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
    (verifier.clone(), pkce_challenge(&verifier))
}

/// base64url(SHA-256(verifier))
pub(crate) fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// 32 random bytes, hex encoded
fn generate_nonce() -> String {
    let nonce_bytes: [u8; 32] = rand::random();
    hex::encode(nonce_bytes)
}
