//! Delivery of attempt records to the results-sheet webhook.
//!
//! One POST per attempt, JSON body, bounded timeout, no retries. Anything but HTTP 200 is a
//! failed delivery.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::model::AttemptRecord;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_PREVIEW_CHAR_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("results logging is not configured")]
    NotConfigured,
    #[error("could not build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("timed out saving to the results sheet: {0}")]
    Timeout(String),
    #[error("could not reach the results sheet: {0}")]
    Transport(String),
    #[error("saving to the results sheet failed (HTTP {status}): {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    endpoint: Option<String>,
}

impl WebhookClient {
    /// A client for `endpoint`. With no endpoint every delivery fails with
    /// [`WebhookError::NotConfigured`].
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WebhookError::Client)?;
        Ok(Self { client, endpoint })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// POSTs one attempt record.
    pub async fn send(&self, record: &AttemptRecord) -> Result<(), WebhookError> {
        let endpoint = self.endpoint.as_deref().ok_or(WebhookError::NotConfigured)?;
        let response = self
            .client
            .post(endpoint)
            .json(record)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(WebhookError::Status {
            status: status.as_u16(),
            body: body_preview(&body),
        })
    }
}

fn map_transport_error(error: reqwest::Error) -> WebhookError {
    if error.is_timeout() {
        WebhookError::Timeout(error.to_string())
    } else {
        WebhookError::Transport(error.to_string())
    }
}

fn body_preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHAR_LIMIT).collect()
}
