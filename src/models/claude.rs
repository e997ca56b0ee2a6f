use crate::common::constants::CLAUDE_MODEL;
use crate::common::error::{ExtractError, Result};
use crate::common::types::{ImagePayload, ModelExtraction, VisionModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude vision backend.
pub struct ClaudeVision {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl ClaudeVision {
    pub fn new(api_key: String, model_id: String, max_tokens: u32, temperature: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model_id,
            max_tokens,
            temperature,
        }
    }
}

#[async_trait::async_trait]
impl VisionModel for ClaudeVision {
    fn model_name(&self) -> &'static str {
        CLAUDE_MODEL
    }

    #[instrument(skip(self, image))]
    async fn extract(&self, image: &ImagePayload) -> Result<ModelExtraction> {
        let request = MessagesRequest {
            model: self.model_id.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user",
                content: vec![
                    Content::Image {
                        source: ImageSource {
                            source_type: "base64",
                            media_type: image.media_type.clone(),
                            data: image.to_base64(),
                        },
                    },
                    Content::Text {
                        text: super::EXTRACTION_PROMPT.to_string(),
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::ModelUnavailable {
                model: CLAUDE_MODEL.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ModelUnavailable {
                model: CLAUDE_MODEL.to_string(),
                message: format!("API returned {status}: {body}"),
            });
        }

        let reply: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| ExtractError::MalformedResponse {
                    model: CLAUDE_MODEL.to_string(),
                    message: e.to_string(),
                })?;

        let text = reply
            .content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default();
        debug!(chars = text.len(), "claude reply received");

        super::parse_reply(CLAUDE_MODEL, text)
    }
}
