//! Forwarding of submissions to the downstream automation webhook.

use bytes::Bytes;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Webhook returned non-success status {0}")]
    Status(StatusCode),

    #[error("Webhook returned malformed JSON: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

/// JSON body sent to the webhook. Field names are part of the downstream contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayPayload {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Branding_Direction")]
    pub branding_direction: String,
    /// Bare file name; the automation resolves it against its own mount
    #[serde(rename = "Image_Filename")]
    pub image_filename: Option<String>,
}

/// Downstream response body, kept as the exact bytes received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse(Bytes);

impl RelayResponse {
    /// Accept `body` only if it is well-formed JSON.
    pub fn from_json_bytes(body: Bytes) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<serde::de::IgnoredAny>(&body)?;
        Ok(Self(body))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRelay {
    client: reqwest::Client,
    webhook_url: String,
    timeout: Option<Duration>,
}

impl SubmissionRelay {
    pub fn new(webhook_url: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
            timeout,
        }
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// POST the payload once and hand back the response body untouched.
    pub async fn forward(&self, payload: &RelayPayload) -> Result<RelayResponse, RelayError> {
        debug!(webhook_url = %self.webhook_url, ?payload, "Sending submission to webhook");

        let mut request = self.client.post(&self.webhook_url).json(payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(webhook_url = %self.webhook_url, %status, "Webhook returned non-success status");
            return Err(RelayError::Status(status));
        }

        let body = response.bytes().await?;
        let response = RelayResponse::from_json_bytes(body)?;
        info!(webhook_url = %self.webhook_url, %status, bytes = response.len(), "Webhook called successfully");

        Ok(response)
    }
}
