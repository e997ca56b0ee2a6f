use crate::common::constants::GPT4O_MODEL;
use crate::common::error::{ExtractError, Result};
use crate::common::types::{ImagePayload, ModelExtraction, VisionModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI GPT-4o vision backend.
pub struct OpenAiVision {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Content {
    Text {
        #[serde(rename = "type")]
        content_type: &'static str,
        text: String,
    },
    Image {
        #[serde(rename = "type")]
        content_type: &'static str,
        image_url: ImageUrl,
    },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OpenAiVision {
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
impl VisionModel for OpenAiVision {
    fn model_name(&self) -> &'static str {
        GPT4O_MODEL
    }

    #[instrument(skip(self, image))]
    async fn extract(&self, image: &ImagePayload) -> Result<ModelExtraction> {
        let data_url = format!("data:{};base64,{}", image.media_type, image.to_base64());

        let request = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![Message {
                role: "user",
                content: vec![
                    Content::Text {
                        content_type: "text",
                        text: super::EXTRACTION_PROMPT.to_string(),
                    },
                    Content::Image {
                        content_type: "image_url",
                        image_url: ImageUrl {
                            url: data_url,
                            detail: "high",
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::ModelUnavailable {
                model: GPT4O_MODEL.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ModelUnavailable {
                model: GPT4O_MODEL.to_string(),
                message: format!("API returned {status}: {body}"),
            });
        }

        let reply: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ExtractError::MalformedResponse {
                    model: GPT4O_MODEL.to_string(),
                    message: e.to_string(),
                })?;

        let text = reply
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();
        debug!(chars = text.len(), "gpt4o reply received");

        super::parse_reply(GPT4O_MODEL, text)
    }
}
