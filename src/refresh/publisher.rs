//! Refresh event publishers
//!
//! "Run this refresh later" is delegated to an external scheduler. Without one
//! configured the [`NoopPublisher`] is used and tokens are refreshed lazily on
//! read.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::signing::{self, SIGNATURE_HEADER};
use crate::oauth::now_ms;
use crate::{Error, Result};

/// Event name sent to the scheduler
pub const SCHEDULE_EVENT: &str = "auth/schedule";

/// A refresh to run at `run_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInput {
    /// User (tenant) id
    pub user_id: String,
    /// Provider id
    pub provider_id: String,
    /// Account id
    pub account_id: String,
    /// Epoch ms at which to refresh
    pub run_at: i64,
}

/// Schedules future token refreshes
#[async_trait]
pub trait RefreshPublisher: Send + Sync {
    /// Ask the scheduler to run a refresh later
    async fn schedule_refresh(&self, input: &ScheduleInput) -> Result<()>;
}

/// Publisher used when no external scheduler is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl RefreshPublisher for NoopPublisher {
    async fn schedule_refresh(&self, input: &ScheduleInput) -> Result<()> {
        debug!(
            user = %input.user_id,
            provider = %input.provider_id,
            run_at = input.run_at,
            "No scheduler configured, skipping refresh schedule"
        );
        Ok(())
    }
}

/// Publishes signed `auth/schedule` events to a webhook endpoint
pub struct WebhookPublisher {
    client: Client,
    endpoint: String,
    signing_key: String,
}

impl WebhookPublisher {
    /// Create a publisher posting to `endpoint`
    pub fn new(endpoint: String, signing_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, endpoint, signing_key))
    }

    /// Create a publisher with an existing HTTP client
    #[must_use]
    pub fn with_client(client: Client, endpoint: String, signing_key: String) -> Self {
        Self {
            client,
            endpoint,
            signing_key,
        }
    }
}

#[async_trait]
impl RefreshPublisher for WebhookPublisher {
    async fn schedule_refresh(&self, input: &ScheduleInput) -> Result<()> {
        let body = serde_json::to_vec(&json!({
            "name": SCHEDULE_EVENT,
            "data": input,
            "ts": now_ms(),
        }))?;
        let signature = signing::sign(&self.signing_key, &body)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::PublishFailed {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, endpoint = %self.endpoint, "Refresh schedule rejected");
            return Err(Error::PublishFailed {
                status: Some(status.as_u16()),
                message: format!("HTTP {status} - {body}"),
            });
        }

        info!(
            user = %input.user_id,
            provider = %input.provider_id,
            run_at = input.run_at,
            "Scheduled token refresh"
        );
        Ok(())
    }
}
