//! MCP JSON-RPC protocol types

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP Protocol version sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2025-11-25";

/// Header carrying the upstream session id
pub const SESSION_HEADER: &str = "Mcp-Session-Id";
