//! HTTP implementation of the remote boundary.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::chunks::Chunk;
use crate::config::ApiConfig;

use super::error::{ApiError, Result};
use super::types::{JobSnapshot, SubscriptionSnapshot, TriggerReceipt};
use super::{BillingApi, ProcessingApi};

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for HTTP requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum length for unstructured error bodies kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates an unstructured error body to a reasonable length.
fn sanitize_error_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", truncated)
    } else {
        body.to_string()
    }
}

/// Structured error body the API returns on rejections.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// HTTP client for the paper pipeline API and the billing endpoint.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a client with default timeouts.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeouts(base_url, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client from endpoint configuration.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::with_timeouts(
            &config.base_url,
            config.connect_timeout(),
            config.request_timeout(),
        )
    }

    /// Creates a client with explicit timeouts.
    pub fn with_timeouts(base_url: &str, connect: Duration, request: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decodes a success body, or maps a non-2xx response to an error.
    ///
    /// Rejections with a structured `{code, message}` body become
    /// `ApiError::Rejected`; anything else keeps the raw status.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => Err(ApiError::Rejected {
                code: parsed.code,
                message: parsed.message,
            }),
            Err(_) => Err(ApiError::Status {
                status: status.as_u16(),
                message: sanitize_error_body(&body),
            }),
        }
    }
}

#[async_trait]
impl ProcessingApi for ApiClient {
    async fn fetch_job(&self, job_id: &str) -> Result<JobSnapshot> {
        debug!("Fetching status for job {}", job_id);
        let response = self
            .client
            .get(self.url(&format!("/v1/jobs/{}", job_id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn fetch_chunks(&self, job_id: &str) -> Result<Vec<Chunk>> {
        debug!("Fetching chunks for job {}", job_id);
        let response = self
            .client
            .get(self.url(&format!("/v1/jobs/{}/chunks", job_id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn trigger_processing(&self, job_id: &str) -> Result<TriggerReceipt> {
        debug!("Requesting queued processing for job {}", job_id);
        let response = self
            .client
            .post(self.url(&format!("/v1/jobs/{}/process", job_id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn trigger_processing_direct(&self, job_id: &str) -> Result<JobSnapshot> {
        debug!("Requesting direct processing for job {}", job_id);
        let response = self
            .client
            .post(self.url(&format!("/v1/jobs/{}/process/direct", job_id)))
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl BillingApi for ApiClient {
    async fn fetch_subscription(&self) -> Result<SubscriptionSnapshot> {
        debug!("Fetching subscription state");
        let response = self
            .client
            .get(self.url("/v1/billing/subscription"))
            .send()
            .await?;
        Self::decode(response).await
    }
}
