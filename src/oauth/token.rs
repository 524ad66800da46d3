//! OAuth token model

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Stored OAuth token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Access token
    pub access_token: String,

    /// Refresh token (optional)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Expiry as epoch ms; `None` never expires
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// Issue time as epoch ms
    pub issued_at: i64,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Build a token from a token endpoint response issued at `issued_at`
    #[must_use]
    pub fn from_response(response: TokenResponse, issued_at: i64) -> Self {
        let expires_at = response.expires_in.map(|secs| {
            let millis = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
            issued_at.saturating_add(millis)
        });

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
            issued_at,
            token_type: response.token_type.unwrap_or_else(default_token_type),
        }
    }

    /// Whether the token is expired at `now` (epoch ms)
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the token is expired right now
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    /// When the next refresh should run given a lead time; `None` for
    /// non-expiring tokens
    #[must_use]
    pub fn refresh_run_at(&self, lead_ms: u64) -> Option<i64> {
        let lead = i64::try_from(lead_ms).unwrap_or(i64::MAX);
        self.expires_at
            .map(|expires_at| expires_at.saturating_sub(lead).max(0))
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Refresh token, if issued or rotated
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Token type
    #[serde(default)]
    pub token_type: Option<String>,
}
