//! MCP Auth Gateway Library
//!
//! Per-user OAuth token lifecycle for MCP providers plus an authorized
//! JSON-RPC session gateway.
//!
//! # Features
//!
//! - **OAuth**: authorization-code flow with PKCE and dynamic client registration
//! - **Token lifecycle**: refresh on read, out-of-band refresh scheduling over a
//!   signed webhook, and a signed inbound refresh trigger
//! - **Sessions**: one cached MCP session per (user, provider), SSE or JSON replies
//! - **Capability gate**: authorization URLs for providers a user still has to connect
//!
//! # Protocol Version
//!
//! Sessions are opened with MCP protocol version 2025-11-25.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod protocol;
pub mod refresh;
pub mod registry;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {e}")))
}
