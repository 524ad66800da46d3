//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::capability::CapabilityGate;
use super::session::SessionGateway;
use super::webhooks::refresh_trigger_routes;
use crate::config::Config;
use crate::oauth::{
    CALLBACK_PATH, FileTokenStore, MemoryTokenStore, OAuthFlowEngine, TokenManager, TokenStore,
    callback_routes,
};
use crate::refresh::{NoopPublisher, RefreshPublisher, WebhookPublisher};
use crate::registry::ProviderRegistry;
use crate::transport::HttpTransport;
use crate::{Error, Result};

/// Fully wired gateway: token lifecycle, session gateway and HTTP surface
pub struct Gateway {
    config: Config,
    registry: Arc<ProviderRegistry>,
    tokens: Arc<TokenManager>,
    sessions: Arc<SessionGateway>,
    gate: Arc<CapabilityGate>,
}

impl Gateway {
    /// Build a gateway from configuration
    pub fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::new(config.providers.values().cloned()));

        let transport =
            HttpTransport::new(config.server.request_timeout(), config.server.connect_timeout())?;
        let flow = Arc::new(OAuthFlowEngine::new(
            transport.client().clone(),
            Arc::clone(&registry),
            config.oauth.redirect_uri.clone(),
            config.oauth.client_name.clone(),
        ));

        let store: Arc<dyn TokenStore> = match &config.oauth.token_dir {
            Some(dir) => {
                info!(dir = %dir, "Using file token store");
                Arc::new(FileTokenStore::open(dir)?)
            }
            None => {
                warn!("No token_dir configured, tokens are kept in memory only");
                Arc::new(MemoryTokenStore::new())
            }
        };

        let publisher: Arc<dyn RefreshPublisher> =
            match (&config.scheduler.endpoint, &config.scheduler.signing_key) {
                (Some(endpoint), Some(key)) => Arc::new(WebhookPublisher::with_client(
                    transport.client().clone(),
                    endpoint.clone(),
                    key.clone(),
                )),
                (Some(_), None) => {
                    return Err(Error::Config(
                        "scheduler.endpoint requires scheduler.signing_key".to_string(),
                    ));
                }
                (None, _) => Arc::new(NoopPublisher),
            };

        let tokens = Arc::new(
            TokenManager::new(flow, store, publisher)
                .with_default_lead_ms(config.oauth.refresh_lead_ms),
        );
        let sessions = Arc::new(SessionGateway::new(transport, Arc::clone(&tokens)));
        let gate = Arc::new(CapabilityGate::new(Arc::clone(&tokens)));

        for provider in registry.all() {
            info!(provider = %provider.id, oauth = provider.uses_oauth(), "Registered provider");
        }

        Ok(Self {
            config,
            registry,
            tokens,
            sessions,
            gate,
        })
    }

    /// Provider registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Token lifecycle manager
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Protocol session gateway
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionGateway> {
        &self.sessions
    }

    /// Capability gate
    #[must_use]
    pub fn gate(&self) -> &Arc<CapabilityGate> {
        &self.gate
    }

    /// HTTP routes: OAuth callback, refresh trigger and health
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .merge(callback_routes(Arc::clone(&self.tokens)))
            .merge(refresh_trigger_routes(
                Arc::clone(&self.tokens),
                self.config.scheduler.signing_key.clone(),
            ))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!(version = env!("CARGO_PKG_VERSION"), host = %self.config.server.host, port = self.config.server.port, "MCP auth gateway listening");
        info!(providers = self.registry.len(), callback = CALLBACK_PATH, "Providers loaded");
        if self.config.scheduler.endpoint.is_none() {
            warn!("No scheduler endpoint configured, tokens refresh only on read");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
