// Vision-language backends. Each file implements `VisionModel` for one
// provider; everything provider-agnostic (prompt, reply parsing, factory)
// lives here.

pub mod claude;
pub mod florence;
pub mod gemini;
pub mod openai;

use crate::common::constants::{CLAUDE_MODEL, FLORENCE_MODEL, GEMINI_MODEL, GPT4O_MODEL};
use crate::common::error::{ExtractError, Result};
use crate::common::types::{FieldCandidate, FieldKind, ModelExtraction, VisionModel};
use crate::config::ModelsConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub use claude::ClaudeVision;
pub use florence::FlorenceVision;
pub use gemini::GeminiVision;
pub use openai::OpenAiVision;

/// Shared extraction prompt. Every hosted backend receives the screenshot
/// plus this instruction and must answer with the JSON object alone.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert at extracting MOT reminder data from garage management software screenshots with extreme precision.

Analyze this screenshot and extract the following information:

1. Vehicle Registration Number (UK format: AB12 CDE, A123 BCD, etc.)
2. MOT Expiry Date (DD/MM/YYYY format)
3. Vehicle Make
4. Vehicle Model
5. Customer Name
6. Customer Phone Number
7. Customer Email Address

CRITICAL REQUIREMENTS:
- UK registration numbers follow specific patterns (AB12 CDE, A123 BCD, ABC 123D, 1234 AB)
- Dates must be in DD/MM/YYYY format
- If any field is unclear, missing, or you're not confident, use "NOT_FOUND"
- Provide a confidence score (0.0-1.0) for each field based on clarity and certainty
- Try to identify the garage management software being used

IMPORTANT: Look carefully at the entire screenshot. Data might be in tables, forms, or scattered across the interface.

Return ONLY a valid JSON object with this exact structure:
{
    "registration": "extracted_registration_or_NOT_FOUND",
    "mot_expiry": "DD/MM/YYYY_or_NOT_FOUND",
    "make": "extracted_make_or_NOT_FOUND",
    "model": "extracted_model_or_NOT_FOUND",
    "customer_name": "extracted_name_or_NOT_FOUND",
    "customer_phone": "extracted_phone_or_NOT_FOUND",
    "customer_email": "extracted_email_or_NOT_FOUND",
    "confidence_scores": {
        "registration": 0.0,
        "mot_expiry": 0.0,
        "make": 0.0,
        "model": 0.0,
        "customer_name": 0.0,
        "customer_phone": 0.0,
        "customer_email": 0.0
    },
    "software_detected": "detected_software_name_or_UNKNOWN"
}

Do not include any text before or after the JSON object."#;

/// Wire shape every backend must produce, one way or another.
#[derive(Debug, Deserialize)]
pub struct RawExtraction {
    pub registration: String,
    pub mot_expiry: String,
    pub make: String,
    pub model: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    #[serde(default)]
    pub confidence_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub software_detected: Option<String>,
}

impl RawExtraction {
    /// Convert the wire shape into field candidates, dropping NOT_FOUND
    /// sentinels and clamping confidences into [0, 1].
    pub fn into_extraction(self, model_name: &str) -> ModelExtraction {
        let values = [
            (FieldKind::Registration, self.registration),
            (FieldKind::MotExpiry, self.mot_expiry),
            (FieldKind::Make, self.make),
            (FieldKind::Model, self.model),
            (FieldKind::CustomerName, self.customer_name),
            (FieldKind::CustomerPhone, self.customer_phone),
            (FieldKind::CustomerEmail, self.customer_email),
        ];

        let mut candidates = Vec::new();
        for (field, value) in values {
            let value = value.trim().to_string();
            if value.is_empty() || value == "NOT_FOUND" {
                continue;
            }
            let confidence = self
                .confidence_scores
                .get(field.as_str())
                .copied()
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            candidates.push(FieldCandidate {
                field,
                value,
                confidence,
                source_model: model_name.to_string(),
            });
        }

        let software_detected = self
            .software_detected
            .filter(|s| !s.is_empty() && s != "UNKNOWN");

        ModelExtraction {
            model_name: model_name.to_string(),
            candidates,
            software_detected,
        }
    }
}

/// Parse a model's free-text reply into an extraction, tolerating markdown
/// fences and surrounding prose.
pub fn parse_reply(model_name: &str, text: &str) -> Result<ModelExtraction> {
    let json = extract_json(text);
    let raw: RawExtraction =
        serde_json::from_str(&json).map_err(|e| ExtractError::MalformedResponse {
            model: model_name.to_string(),
            message: e.to_string(),
        })?;
    Ok(raw.into_extraction(model_name))
}

/// Extract the JSON object from a reply, handling ```json code fences and
/// any text before or after the object.
fn extract_json(text: &str) -> String {
    let text = text.trim();

    if text.starts_with("```") {
        if let Some(start) = text.find('\n') {
            let after_first_line = &text[start + 1..];
            if let Some(end) = after_first_line.rfind("```") {
                return after_first_line[..end].trim().to_string();
            }
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            return text[start..=end].to_string();
        }
    }

    text.to_string()
}

/// Factory creating backends by configured name. Hosted backends whose API
/// key is absent from the environment are skipped with a warning so a
/// partially-credentialed deployment still runs on the rest of the ensemble.
pub fn create_model(name: &str, config: &ModelsConfig) -> Option<Arc<dyn VisionModel>> {
    match name {
        CLAUDE_MODEL => match std::env::var(crate::common::constants::ANTHROPIC_API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Some(Arc::new(ClaudeVision::new(
                key,
                config.claude_model_id.clone(),
                config.max_tokens,
                config.temperature,
            ))),
            _ => {
                warn!("skipping claude backend: ANTHROPIC_API_KEY not set");
                None
            }
        },
        GPT4O_MODEL => match std::env::var(crate::common::constants::OPENAI_API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Some(Arc::new(OpenAiVision::new(
                key,
                config.openai_model_id.clone(),
                config.max_tokens,
                config.temperature,
            ))),
            _ => {
                warn!("skipping gpt4o backend: OPENAI_API_KEY not set");
                None
            }
        },
        GEMINI_MODEL => match std::env::var(crate::common::constants::GOOGLE_API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Some(Arc::new(GeminiVision::new(
                key,
                config.gemini_model_id.clone(),
                config.temperature,
            ))),
            _ => {
                warn!("skipping gemini backend: GOOGLE_API_KEY not set");
                None
            }
        },
        FLORENCE_MODEL => Some(Arc::new(FlorenceVision::new(
            config.florence_endpoint.clone(),
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{
        "registration": "AB12 CDE",
        "mot_expiry": "01/06/2026",
        "make": "Ford",
        "model": "NOT_FOUND",
        "customer_name": "Jo Bloggs",
        "customer_phone": "NOT_FOUND",
        "customer_email": "NOT_FOUND",
        "confidence_scores": {
            "registration": 0.95,
            "mot_expiry": 0.9,
            "make": 0.8,
            "customer_name": 0.7
        },
        "software_detected": "UNKNOWN"
    }"#;

    #[test]
    fn parses_a_plain_json_reply() {
        let extraction = parse_reply("claude", REPLY).unwrap();
        assert_eq!(extraction.candidates.len(), 4);
        let reg = &extraction.candidates[0];
        assert_eq!(reg.field, FieldKind::Registration);
        assert_eq!(reg.value, "AB12 CDE");
        assert!((reg.confidence - 0.95).abs() < f64::EPSILON);
        assert!(extraction.software_detected.is_none());
    }

    #[test]
    fn parses_a_fenced_reply() {
        let fenced = format!("```json\n{REPLY}\n```");
        let extraction = parse_reply("gpt4o", &fenced).unwrap();
        assert_eq!(extraction.candidates.len(), 4);
    }

    #[test]
    fn parses_a_reply_with_surrounding_prose() {
        let wrapped = format!("Here is the data you asked for:\n{REPLY}\nLet me know!");
        assert!(parse_reply("gemini", &wrapped).is_ok());
    }

    #[test]
    fn rejects_non_json_replies() {
        let err = parse_reply("claude", "I cannot read this image").unwrap_err();
        assert!(matches!(
            err,
            ExtractError::MalformedResponse { ref model, .. } if model == "claude"
        ));
    }

    #[test]
    fn missing_confidence_defaults_to_zero() {
        let reply = r#"{
            "registration": "AB12 CDE",
            "mot_expiry": "NOT_FOUND",
            "make": "NOT_FOUND",
            "model": "NOT_FOUND",
            "customer_name": "NOT_FOUND",
            "customer_phone": "NOT_FOUND",
            "customer_email": "NOT_FOUND"
        }"#;
        let extraction = parse_reply("claude", reply).unwrap();
        assert_eq!(extraction.candidates.len(), 1);
        assert_eq!(extraction.candidates[0].confidence, 0.0);
    }
}
