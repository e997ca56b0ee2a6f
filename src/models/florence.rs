use crate::common::constants::FLORENCE_MODEL;
use crate::common::error::{ExtractError, Result};
use crate::common::types::{ImagePayload, ModelExtraction, VisionModel};
use serde::Serialize;
use tracing::instrument;

/// Florence-2 backend, reached through a local inference service that wraps
/// the model and answers with the structured extraction JSON directly.
/// Needs no API key; if the service is not running the call simply fails
/// and the ensemble continues without it.
pub struct FlorenceVision {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct FlorenceRequest {
    image: String,
    media_type: String,
}

impl FlorenceVision {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl VisionModel for FlorenceVision {
    fn model_name(&self) -> &'static str {
        FLORENCE_MODEL
    }

    #[instrument(skip(self, image))]
    async fn extract(&self, image: &ImagePayload) -> Result<ModelExtraction> {
        let request = FlorenceRequest {
            image: image.to_base64(),
            media_type: image.media_type.clone(),
        };

        let response = self
            .client
            .post(format!("{}/extract", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::ModelUnavailable {
                model: FLORENCE_MODEL.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ModelUnavailable {
                model: FLORENCE_MODEL.to_string(),
                message: format!("inference service returned {status}: {body}"),
            });
        }

        let raw: super::RawExtraction =
            response
                .json()
                .await
                .map_err(|e| ExtractError::MalformedResponse {
                    model: FLORENCE_MODEL.to_string(),
                    message: e.to_string(),
                })?;

        Ok(raw.into_extraction(FLORENCE_MODEL))
    }
}
