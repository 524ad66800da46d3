//! Session gateway, capability gate and HTTP surface

mod capability;
mod planner;
mod server;
mod session;
mod webhooks;

pub use capability::{CapabilityGate, GateDecision, ProviderStatus};
pub use planner::{CatalogEntry, ToolInvocation, ToolPlanner};
pub use server::Gateway;
pub use session::SessionGateway;
pub use webhooks::{REFRESH_TRIGGER_PATH, refresh_trigger_routes};
