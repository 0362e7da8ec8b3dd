//! Backend availability probe.
//!
//! One read-only GET against the model-listing surface. Unavailability is
//! ordinary, so [`AvailabilityProbe::check_available`] never errors.

use std::sync::Arc;
use std::time::Duration;

use super::errors::InferenceError;
use super::provider::join_url;
use super::transport::{Transport, TransportRequest};
use super::types::ModelListResponse;

/// Health check against a backend's model-listing path.
///
/// Holds no session state; any number of probes may run concurrently with
/// an in-flight generation.
#[derive(Clone)]
pub struct AvailabilityProbe {
    transport: Arc<dyn Transport>,
    models_path: String,
    headers: Vec<(String, String)>,
}

impl AvailabilityProbe {
    pub fn new(transport: Arc<dyn Transport>, models_path: impl Into<String>) -> Self {
        Self {
            transport,
            models_path: models_path.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// `true` only when the backend answered 2xx within `timeout`.
    pub async fn check_available(&self, endpoint: &str, timeout: Duration) -> bool {
        let url = join_url(endpoint, &self.models_path);
        let request = TransportRequest::get(&url, timeout).with_headers(self.headers.clone());

        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(resp)) => {
                let ok = resp.is_success();
                tracing::debug!(url = %url, status = resp.status, available = ok, "probe");
                ok
            }
            Ok(Err(e)) => {
                tracing::debug!(url = %url, error = %e, "probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "probe timed out");
                false
            }
        }
    }

    /// List model names reported by the backend.
    pub async fn list_models(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, InferenceError> {
        let url = join_url(endpoint, &self.models_path);
        let request = TransportRequest::get(&url, timeout).with_headers(self.headers.clone());

        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| InferenceError::Timeout {
                duration_ms: timeout.as_millis() as u64,
            })??;

        if !response.is_success() {
            let status = response.status;
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError { status, body });
        }

        let text = response.text().await?;
        let listing: ModelListResponse =
            serde_json::from_str(&text).map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to parse model listing: {e}"),
            })?;

        Ok(listing.models.into_iter().map(|m| m.name).collect())
    }
}
