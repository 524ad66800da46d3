//! MCP Auth Gateway
//!
//! Per-user OAuth token lifecycle and authorized MCP sessions.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_auth_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Status { user }) => run_status(&gateway, &user).await,
        Some(Command::Serve) | None => run_server(gateway).await,
    }
}

fn load_config(cli: &Cli) -> mcp_auth_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Print per-provider authentication state for a user
async fn run_status(gateway: &Gateway, user: &str) -> ExitCode {
    match gateway.gate().status(user).await {
        Ok(statuses) => {
            if statuses.is_empty() {
                println!("No providers configured.");
            }
            for status in statuses {
                let mark = if status.authenticated { "✅" } else { "❌" };
                println!("{mark} {}", status.id);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Status check failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(gateway: Gateway) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        providers = gateway.registry().len(),
        "Starting MCP auth gateway"
    );

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
