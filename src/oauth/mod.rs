//! OAuth 2.0 token lifecycle for upstream providers
//!
//! Features:
//! - Authorization code flow with PKCE (RFC 7636)
//! - Dynamic client registration (RFC 7591)
//! - Read-triggered refresh with rotation-or-reuse of refresh tokens
//! - Out-of-band refresh scheduling through a [`crate::refresh::RefreshPublisher`]
//! - Redirect callback endpoint

mod callback;
mod flow;
mod lifecycle;
mod store;
mod token;

pub use callback::{CALLBACK_PATH, CallbackParams, callback_routes};
pub use flow::{OAuthFlowEngine, OAuthState, PENDING_TTL, PendingAuthorization};
pub use lifecycle::{CallbackOutcome, RefreshOutcome, RefreshSummary, ScheduleStatus, TokenManager};
pub use store::{DEFAULT_ACCOUNT, FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{Token, TokenResponse, now_ms};
