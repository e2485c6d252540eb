//! Non-streaming calls to the extraction service: single-document extraction
//! and the health probe.

use serde::Deserialize;

use crate::{Config, CoordinatorError, ResultMetadata, Schema, schema_json};

/// Response of `POST /extract` for a single document.
#[derive(Debug, Clone, Deserialize)]
pub struct SingleExtraction {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: f64,
    #[serde(default)]
    pub components: std::collections::BTreeMap<String, String>,
}

/// Error body shape the service uses for non-success responses.
#[derive(Debug, Deserialize)]
struct ErrorDetail {
    detail: String,
}

/// Thin client for the service's request/response endpoints. The streaming
/// batch endpoint lives in [`crate::BatchCoordinator`].
pub struct ExtractionApi {
    client: reqwest::Client,
    base_url: String,
}

impl ExtractionApi {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }

    /// Extract data from a single document, outside of any batch run.
    pub async fn extract(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        label: &str,
        schema: &Schema,
    ) -> Result<SingleExtraction, CoordinatorError> {
        let part = reqwest::multipart::Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("label", label.to_string())
            .text("extraction_schema", schema_json(schema));

        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorDetail>()
                .await
                .map(|e| e.detail)
                .unwrap_or_else(|_| "extraction failed".to_string());
            return Err(CoordinatorError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(response.json().await?)
    }

    /// Probe the service's health endpoint.
    pub async fn health(&self) -> Result<HealthStatus, CoordinatorError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::Status {
                status: status.as_u16(),
                detail: "service is not responding".to_string(),
            });
        }
        Ok(response.json().await?)
    }
}
