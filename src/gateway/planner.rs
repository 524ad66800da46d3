//! Tool planning seam
//!
//! A planner turns a natural-language request into an ordered list of tool
//! invocations over the catalog the gateway exposes. The gateway ships no
//! planner of its own; embedders plug in whatever model or rules they use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::protocol::Tool;

/// A tool offered by one provider
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Provider that serves the tool
    pub provider_id: String,
    /// Tool definition as listed by the provider
    pub tool: Tool,
}

/// One planned tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Target provider
    pub provider_id: String,
    /// Tool name on that provider
    pub tool_name: String,
    /// Tool arguments
    #[serde(default)]
    pub arguments: Value,
}

/// Produces a tool plan for a request
#[async_trait]
pub trait ToolPlanner: Send + Sync {
    /// Plan the calls needed to satisfy `prompt`, in execution order
    async fn plan(&self, prompt: &str, catalog: &[CatalogEntry]) -> Result<Vec<ToolInvocation>>;
}
