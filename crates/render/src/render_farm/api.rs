//! REST client for the render farm HTTP endpoints.
//!
//! Covers job creation, status lookup and cancellation using [`reqwest`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP client for a single render farm deployment.
pub struct RenderFarmApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

/// Body of `POST /jobs`.
#[derive(Debug, Serialize)]
pub struct CreateJobRequest<'a> {
    pub source_ref: &'a str,
    pub variant_index: u32,
    pub parameters: &'a BTreeMap<String, String>,
}

/// Job state as reported by the farm.
#[derive(Debug, Clone, Deserialize)]
pub struct FarmJob {
    /// Server-assigned job identifier.
    pub id: String,
    /// Raw farm status, e.g. `"queued"`, `"running"`, `"done"`.
    pub status: String,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Errors from the render farm REST layer.
#[derive(Debug, thiserror::Error)]
pub enum RenderFarmApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The farm returned a non-2xx status code.
    #[error("Render farm API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl RenderFarmApi {
    /// Create a client for the farm at `api_url`, e.g. `http://farm:9000`.
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RenderFarmApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Queue a render. Sends `POST /jobs`.
    pub async fn create_job(
        &self,
        request: &CreateJobRequest<'_>,
    ) -> Result<FarmJob, RenderFarmApiError> {
        let response = self
            .authorized(self.client.post(format!("{}/jobs", self.api_url)))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Look up a job. Sends `GET /jobs/{id}`.
    pub async fn get_job(&self, job_id: &str) -> Result<FarmJob, RenderFarmApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/jobs/{}", self.api_url, job_id)))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Ask the farm to stop a job. Sends `POST /jobs/{id}/cancel`.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), RenderFarmApiError> {
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/jobs/{}/cancel", self.api_url, job_id)),
            )
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Ensure the response has a success status code, returning an
    /// [`RenderFarmApiError::ApiError`] with the body text otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RenderFarmApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RenderFarmApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RenderFarmApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
