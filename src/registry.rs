//! Provider registry
//!
//! Read-only view over the configured upstream providers, shared by the OAuth
//! engine, the session gateway and the capability gate.

use std::collections::HashMap;

use crate::config::{OAuthSpec, ProviderConfig};
use crate::{Error, Result};

/// Registry of upstream providers keyed by id
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Create a registry from provider configs
    #[must_use]
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Look up a provider by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Look up a provider, failing with `ProviderNotFound`
    pub fn require(&self, id: &str) -> Result<&ProviderConfig> {
        self.get(id)
            .ok_or_else(|| Error::ProviderNotFound(id.to_string()))
    }

    /// OAuth settings of a provider, failing with `UnknownProvider`
    pub fn oauth_spec(&self, id: &str) -> Result<&OAuthSpec> {
        self.get(id)
            .and_then(|p| p.oauth.as_ref())
            .ok_or_else(|| Error::UnknownProvider(id.to_string()))
    }

    /// All providers, sorted by id
    #[must_use]
    pub fn all(&self) -> Vec<&ProviderConfig> {
        let mut all: Vec<_> = self.providers.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
