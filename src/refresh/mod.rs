//! Out-of-band token refresh scheduling
//!
//! Outbound: [`RefreshPublisher`] implementations hand refreshes to an
//! external scheduler. Inbound: the scheduler calls back through the signed
//! refresh trigger served by [`crate::gateway::refresh_trigger_routes`].

mod publisher;
pub mod signing;

pub use publisher::{NoopPublisher, RefreshPublisher, SCHEDULE_EVENT, ScheduleInput, WebhookPublisher};
