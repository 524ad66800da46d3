//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default lead time before expiry at which a refresh is scheduled (10 minutes)
pub const DEFAULT_REFRESH_LEAD_MS: u64 = 600_000;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// OAuth client-side settings shared by all providers
    pub oauth: OAuthSettings,
    /// Out-of-band refresh scheduler
    pub scheduler: SchedulerConfig,
    /// Upstream providers keyed by id
    pub providers: HashMap<String, ProviderConfig>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MCP_AUTH_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("MCP_AUTH_GATEWAY_").split("__"));

        Self::from_figment(&figment)
    }

    /// Extract and post-process a config from an already assembled figment
    pub(crate) fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();
        config.normalize_providers();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in secret-bearing values
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for provider in self.providers.values_mut() {
            provider.url = Self::expand_string(&re, &provider.url);
            if let Some(oauth) = provider.oauth.as_mut() {
                for value in [&mut oauth.client_id, &mut oauth.client_secret]
                    .into_iter()
                    .flatten()
                {
                    *value = Self::expand_string(&re, value);
                }
            }
        }

        for value in [&mut self.scheduler.endpoint, &mut self.scheduler.signing_key]
            .into_iter()
            .flatten()
        {
            *value = Self::expand_string(&re, value);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Providers declared as map entries take their id from the key
    fn normalize_providers(&mut self) {
        for (key, provider) in &mut self.providers {
            if provider.id.is_empty() {
                provider.id.clone_from(key);
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Timeout applied to every outbound call (seconds)
    pub request_timeout_secs: u64,
    /// Connect timeout for outbound calls (seconds)
    pub connect_timeout_secs: u64,
}

impl ServerConfig {
    /// Outbound request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Outbound connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// OAuth client-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    /// Redirect URI registered with providers
    pub redirect_uri: String,
    /// Client name sent during dynamic registration
    pub client_name: String,
    /// Default refresh lead time (ms), overridable per provider
    pub refresh_lead_ms: u64,
    /// Directory for the file token store (in-memory store when unset)
    pub token_dir: Option<String>,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            redirect_uri: "http://127.0.0.1:39500/oauth/callback".to_string(),
            client_name: "MCP Auth Gateway".to_string(),
            refresh_lead_ms: DEFAULT_REFRESH_LEAD_MS,
            token_dir: None,
        }
    }
}

/// Refresh scheduler configuration
///
/// With no endpoint, refreshes are not scheduled out of band.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Webhook endpoint receiving `auth/schedule` events
    pub endpoint: Option<String>,
    /// HMAC key for outbound and inbound signatures
    pub signing_key: Option<String>,
}

/// Upstream MCP provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider id (defaults to the map key)
    #[serde(default)]
    pub id: String,
    /// MCP endpoint URL
    #[serde(default)]
    pub url: String,
    /// OAuth settings; providers without this are always authenticated
    #[serde(default)]
    pub oauth: Option<OAuthSpec>,
    /// Refresh lead time override (ms)
    #[serde(default)]
    pub refresh_lead_ms: Option<u64>,
}

impl ProviderConfig {
    /// Whether calls to this provider need an OAuth token
    #[must_use]
    pub fn uses_oauth(&self) -> bool {
        self.oauth.is_some()
    }
}

/// OAuth endpoints and client settings for a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthSpec {
    /// Authorization endpoint
    pub auth_url: String,
    /// Token endpoint
    pub token_url: String,
    /// Client ID (resolved through dynamic registration when absent)
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret (never sent under PKCE)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Use PKCE (S256)
    #[serde(default)]
    pub use_pkce: bool,
    /// Scopes to request
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Dynamic client registration endpoint
    #[serde(default)]
    pub registration_url: Option<String>,
}
