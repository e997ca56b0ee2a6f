use crate::common::constants::GEMINI_MODEL;
use crate::common::error::{ExtractError, Result};
use crate::common::types::{ImagePayload, ModelExtraction, VisionModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const GENERATE_URL_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini vision backend.
pub struct GeminiVision {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiVision {
    pub fn new(api_key: String, model_id: String, temperature: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model_id,
            temperature,
        }
    }
}

#[async_trait::async_trait]
impl VisionModel for GeminiVision {
    fn model_name(&self) -> &'static str {
        GEMINI_MODEL
    }

    #[instrument(skip(self, image))]
    async fn extract(&self, image: &ImagePayload) -> Result<ModelExtraction> {
        let url = format!(
            "{GENERATE_URL_BASE}/{}:generateContent?key={}",
            self.model_id, self.api_key
        );

        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![
                    Part::Text {
                        text: super::EXTRACTION_PROMPT.to_string(),
                    },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: image.media_type.clone(),
                            data: image.to_base64(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            ExtractError::ModelUnavailable {
                model: GEMINI_MODEL.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ModelUnavailable {
                model: GEMINI_MODEL.to_string(),
                message: format!("API returned {status}: {body}"),
            });
        }

        let reply: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| ExtractError::MalformedResponse {
                    model: GEMINI_MODEL.to_string(),
                    message: e.to_string(),
                })?;

        let text = reply
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .unwrap_or_default();
        debug!(chars = text.len(), "gemini reply received");

        super::parse_reply(GEMINI_MODEL, text)
    }
}
