use crate::common::error::Result;
use crate::validation;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The structured fields extracted from a garage-software screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Registration,
    MotExpiry,
    Make,
    Model,
    CustomerName,
    CustomerPhone,
    CustomerEmail,
}

impl FieldKind {
    pub const ALL: [FieldKind; 7] = [
        FieldKind::Registration,
        FieldKind::MotExpiry,
        FieldKind::Make,
        FieldKind::Model,
        FieldKind::CustomerName,
        FieldKind::CustomerPhone,
        FieldKind::CustomerEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Registration => "registration",
            FieldKind::MotExpiry => "mot_expiry",
            FieldKind::Make => "make",
            FieldKind::Model => "model",
            FieldKind::CustomerName => "customer_name",
            FieldKind::CustomerPhone => "customer_phone",
            FieldKind::CustomerEmail => "customer_email",
        }
    }

    /// Canonical representation used when comparing candidate values across
    /// models. Two candidates agree iff their normalized forms are equal.
    pub fn normalize(&self, raw: &str) -> String {
        match self {
            FieldKind::Registration => validation::registration::normalize(raw),
            // Dates canonicalize to ISO so 01/06/2026, 01-06-2026 and
            // 2026-06-01 all land in the same group.
            FieldKind::MotExpiry => validation::dates::canonicalize(raw)
                .unwrap_or_else(|| collapse_upper(raw)),
            FieldKind::CustomerPhone => {
                let mut out = String::with_capacity(raw.len());
                for (i, c) in raw.trim().chars().enumerate() {
                    if c.is_ascii_digit() || (c == '+' && i == 0) {
                        out.push(c);
                    }
                }
                out
            }
            FieldKind::CustomerEmail => raw.trim().to_lowercase(),
            FieldKind::Make | FieldKind::Model | FieldKind::CustomerName => collapse_upper(raw),
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn collapse_upper(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Screenshot bytes handed to every vision backend.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    /// Hex sha256 of the raw bytes; keys the result store.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }

    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Media type for an uploaded screenshot, by file extension.
pub fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// One model's proposed value for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub field: FieldKind,
    pub value: String,
    pub confidence: f64,
    pub source_model: String,
}

/// What a vision backend returns for one screenshot, before the ensemble
/// layer attaches configuration weights.
#[derive(Debug, Clone)]
pub struct ModelExtraction {
    pub model_name: String,
    pub candidates: Vec<FieldCandidate>,
    pub software_detected: Option<String>,
}

/// A completed, weighted model call. Immutable once created; consumed by the
/// consensus engine.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub model_name: String,
    pub weight: f64,
    pub candidates: Vec<FieldCandidate>,
    pub software_detected: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Why a model call produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    MalformedResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFailure {
    pub model_name: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Core trait every vision-language backend implements.
#[async_trait::async_trait]
pub trait VisionModel: Send + Sync {
    /// Unique identifier for this backend, matching configuration keys.
    fn model_name(&self) -> &'static str;

    /// Extract field candidates from a screenshot.
    async fn extract(&self, image: &ImagePayload) -> Result<ModelExtraction>;
}

/// Vehicle record held by the external registry authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub registration: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub colour: Option<String>,
    pub fuel_type: Option<String>,
    pub mot_status: Option<String>,
    pub mot_expiry_date: Option<NaiveDate>,
    pub tax_status: Option<String>,
    pub year_of_manufacture: Option<i32>,
}

/// Outcome of a reachable registry lookup.
#[derive(Debug, Clone)]
pub enum RegistryLookup {
    Found(VehicleRecord),
    NotFound,
}

/// External authority used to corroborate extracted registrations.
#[async_trait::async_trait]
pub trait VehicleRegistry: Send + Sync {
    async fn lookup(&self, registration: &str) -> Result<RegistryLookup>;
}
