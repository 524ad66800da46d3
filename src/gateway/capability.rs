//! Capability gate
//!
//! Reports which providers a user is authenticated with and, when a request
//! needs providers the user has not authorized yet, hands back the
//! authorization URLs to visit before retrying.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::Result;
use crate::oauth::TokenManager;

/// Authentication state of one provider for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    /// Provider id
    pub id: String,
    /// Whether a usable token exists (always true for providers without OAuth)
    pub authenticated: bool,
}

/// Outcome of a capability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum GateDecision {
    /// Every required provider is usable
    #[serde(rename_all = "camelCase")]
    Ready {
        /// Status of the checked providers
        providers: Vec<ProviderStatus>,
    },
    /// Some providers need authorization first
    #[serde(rename_all = "camelCase")]
    NeedsAuthorization {
        /// Status of the checked providers
        providers: Vec<ProviderStatus>,
        /// Provider id -> authorization URL, unauthenticated providers only
        auth_urls: BTreeMap<String, String>,
    },
}

impl GateDecision {
    /// Whether the request can proceed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Statuses of the checked providers
    #[must_use]
    pub fn providers(&self) -> &[ProviderStatus] {
        match self {
            Self::Ready { providers } | Self::NeedsAuthorization { providers, .. } => providers,
        }
    }
}

/// Gate in front of tool execution
pub struct CapabilityGate {
    tokens: Arc<TokenManager>,
}

impl CapabilityGate {
    /// Create a gate
    #[must_use]
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self { tokens }
    }

    /// Status of every configured provider, sorted by id
    pub async fn status(&self, user_id: &str) -> Result<Vec<ProviderStatus>> {
        let ids: Vec<String> = self
            .tokens
            .flow()
            .registry()
            .all()
            .into_iter()
            .map(|p| p.id.clone())
            .collect();
        self.statuses(user_id, &ids).await
    }

    /// Check the providers a request needs; an empty list means all of them
    pub async fn check(&self, user_id: &str, required: &[String]) -> Result<GateDecision> {
        let providers = if required.is_empty() {
            self.status(user_id).await?
        } else {
            self.statuses(user_id, required).await?
        };

        let mut auth_urls = BTreeMap::new();
        for status in providers.iter().filter(|s| !s.authenticated) {
            let url = self
                .tokens
                .flow()
                .authorization_url(&status.id, user_id)
                .await?;
            auth_urls.insert(status.id.clone(), url);
        }

        if auth_urls.is_empty() {
            Ok(GateDecision::Ready { providers })
        } else {
            debug!(user = %user_id, missing = auth_urls.len(), "Authorization required");
            Ok(GateDecision::NeedsAuthorization {
                providers,
                auth_urls,
            })
        }
    }

    async fn statuses(&self, user_id: &str, ids: &[String]) -> Result<Vec<ProviderStatus>> {
        let registry = self.tokens.flow().registry();
        let mut statuses = Vec::with_capacity(ids.len());

        for id in ids {
            let provider = registry.require(id)?;
            let authenticated = if provider.uses_oauth() {
                match self.tokens.get_token(user_id, id).await {
                    Ok(token) => token.is_some(),
                    Err(e) => {
                        warn!(provider = %id, user = %user_id, error = %e, "Stored token unusable");
                        false
                    }
                }
            } else {
                true
            };
            statuses.push(ProviderStatus {
                id: id.clone(),
                authenticated,
            });
        }

        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses.dedup_by(|a, b| a.id == b.id);
        Ok(statuses)
    }
}
