use crate::common::constants::{
    CLAUDE_MODEL, FLORENCE_MODEL, GEMINI_MODEL, GPT4O_MODEL, KNOWN_MODELS,
};
use crate::common::error::{ExtractError, Result};
use crate::common::types::FieldKind;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Immutable application configuration, loaded once at startup and passed
/// into each component. API keys are read from the environment, never from
/// this file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub ensemble: EnsembleConfig,
    pub review: ReviewConfig,
    pub dvla: DvlaConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Backends to construct, by factory name.
    pub enabled: Vec<String>,
    /// Static trust weight per backend; missing entries fall back to
    /// `default_weight`.
    pub weights: BTreeMap<String, f64>,
    /// Tie-break order, most trusted first.
    pub priority: Vec<String>,
    pub default_weight: f64,
    pub claude_model_id: String,
    pub openai_model_id: String,
    pub gemini_model_id: String,
    /// Local Florence-2 inference service.
    pub florence_endpoint: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(CLAUDE_MODEL.to_string(), 0.35);
        weights.insert(GPT4O_MODEL.to_string(), 0.25);
        weights.insert(GEMINI_MODEL.to_string(), 0.20);
        weights.insert(FLORENCE_MODEL.to_string(), 0.20);

        Self {
            enabled: KNOWN_MODELS.iter().map(|s| s.to_string()).collect(),
            weights,
            priority: KNOWN_MODELS.iter().map(|s| s.to_string()).collect(),
            default_weight: 0.1,
            claude_model_id: "claude-3-5-sonnet-20241022".to_string(),
            openai_model_id: "gpt-4o".to_string(),
            gemini_model_id: "gemini-1.5-pro".to_string(),
            florence_endpoint: "http://127.0.0.1:8600".to_string(),
            max_tokens: 4096,
            temperature: 0.1,
        }
    }
}

impl ModelsConfig {
    pub fn weight_for(&self, model_name: &str) -> f64 {
        self.weights
            .get(model_name)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Rank in the static priority list; unlisted models rank last.
    pub fn priority_rank(&self, model_name: &str) -> usize {
        self.priority
            .iter()
            .position(|m| m == model_name)
            .unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub per_call_timeout_secs: u64,
    pub overall_timeout_secs: u64,
    /// Fewer successful model responses than this fails the request.
    pub min_required_successes: usize,
    /// Distinct models that must back the winning value before its
    /// confidence is trusted as-is.
    pub minimum_model_agreement: usize,
    /// Confidence ceiling applied when agreement falls below the minimum
    /// while other models disagreed.
    pub single_agreement_ceiling: f64,
    /// Candidates at or below this confidence are treated as not extracted.
    pub min_candidate_confidence: f64,
    /// End-to-end ceiling for one request, cross-validation included.
    pub request_timeout_secs: u64,
    pub max_concurrent_requests: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            per_call_timeout_secs: 60,
            overall_timeout_secs: 90,
            min_required_successes: 2,
            minimum_model_agreement: 2,
            single_agreement_ceiling: 0.5,
            min_candidate_confidence: 0.3,
            request_timeout_secs: 300,
            max_concurrent_requests: 10,
        }
    }
}

impl EnsembleConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_secs)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub min_confidence_score: f64,
    pub strict_min_confidence_score: f64,
    pub strict_mode: bool,
    pub min_agreement_level: f64,
    /// More distinct normalized values than this for one field signals a
    /// noisy screenshot.
    pub max_value_spread: usize,
    pub required_fields: Vec<FieldKind>,
    /// Importance weight per field for the overall confidence average;
    /// missing entries weigh 1.0.
    pub field_importance: BTreeMap<FieldKind, f64>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            min_confidence_score: 0.85,
            strict_min_confidence_score: 0.90,
            strict_mode: false,
            min_agreement_level: 0.5,
            max_value_spread: 2,
            required_fields: vec![FieldKind::Registration, FieldKind::MotExpiry],
            field_importance: BTreeMap::new(),
        }
    }
}

impl ReviewConfig {
    pub fn effective_min_confidence(&self) -> f64 {
        if self.strict_mode {
            self.strict_min_confidence_score
        } else {
            self.min_confidence_score
        }
    }

    pub fn importance_of(&self, field: FieldKind) -> f64 {
        self.field_importance.get(&field).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DvlaConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for DvlaConfig {
    fn default() -> Self {
        Self {
            api_url: "https://driver-vehicle-licensing.api.gov.uk/vehicle-enquiry/v1/vehicles"
                .to_string(),
            timeout_secs: 30,
        }
    }
}

impl DvlaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub results_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_dir: "results".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ExtractError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `config.toml` when present, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("ignoring unreadable config {}: {e}", path.display());
                }
            }
        }
        Config::default()
    }
}
