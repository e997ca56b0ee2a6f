use anyhow::Result;
use motscan::common::error::ExtractError;
use motscan::common::types::{
    FieldCandidate, FieldKind, ImagePayload, ModelExtraction, RegistryLookup, VehicleRecord,
    VehicleRegistry, VisionModel,
};
use motscan::config::Config;
use motscan::pipeline::ExtractionPipeline;
use std::sync::Arc;
use std::time::Duration;

/// A scripted vision backend for driving the pipeline without the network.
struct ScriptedModel {
    name: &'static str,
    delay: Option<Duration>,
    /// None means the call fails outright.
    fields: Option<Vec<(FieldKind, &'static str, f64)>>,
}

impl ScriptedModel {
    fn answering(name: &'static str, fields: Vec<(FieldKind, &'static str, f64)>) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: None,
            fields: Some(fields),
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: None,
            fields: None,
        })
    }

    fn stalled(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: Some(delay),
            fields: Some(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl VisionModel for ScriptedModel {
    fn model_name(&self) -> &'static str {
        self.name
    }

    async fn extract(
        &self,
        _image: &ImagePayload,
    ) -> motscan::common::error::Result<ModelExtraction> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fields {
            Some(fields) => Ok(ModelExtraction {
                model_name: self.name.to_string(),
                candidates: fields
                    .iter()
                    .map(|(field, value, confidence)| FieldCandidate {
                        field: *field,
                        value: value.to_string(),
                        confidence: *confidence,
                        source_model: self.name.to_string(),
                    })
                    .collect(),
                software_detected: None,
            }),
            None => Err(ExtractError::ModelUnavailable {
                model: self.name.to_string(),
                message: "scripted failure".to_string(),
            }),
        }
    }
}

/// A scripted vehicle registry.
enum ScriptedRegistry {
    Found(VehicleRecord),
    NotFound,
    Unreachable,
}

#[async_trait::async_trait]
impl VehicleRegistry for ScriptedRegistry {
    async fn lookup(&self, _registration: &str) -> motscan::common::error::Result<RegistryLookup> {
        match self {
            ScriptedRegistry::Found(record) => Ok(RegistryLookup::Found(record.clone())),
            ScriptedRegistry::NotFound => Ok(RegistryLookup::NotFound),
            ScriptedRegistry::Unreachable => Err(ExtractError::ValidationUnavailable(
                "connection refused".to_string(),
            )),
        }
    }
}

fn matching_record() -> VehicleRecord {
    VehicleRecord {
        registration: "AB12CDE".to_string(),
        make: Some("FORD".to_string()),
        model: Some("FOCUS".to_string()),
        colour: Some("BLUE".to_string()),
        fuel_type: Some("PETROL".to_string()),
        mot_status: Some("Valid".to_string()),
        mot_expiry_date: chrono::NaiveDate::from_ymd_opt(2026, 6, 1),
        tax_status: Some("Taxed".to_string()),
        year_of_manufacture: Some(2012),
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.ensemble.per_call_timeout_secs = 1;
    config.ensemble.overall_timeout_secs = 2;
    config
}

fn test_image() -> ImagePayload {
    ImagePayload::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg")
}

fn pipeline(
    config: &Config,
    clients: Vec<Arc<dyn VisionModel>>,
    registry: ScriptedRegistry,
) -> ExtractionPipeline {
    ExtractionPipeline::new(config, clients, Arc::new(registry))
}

fn agreeing_fields() -> Vec<(FieldKind, &'static str, f64)> {
    vec![
        (FieldKind::Registration, "AB12 CDE", 1.0),
        (FieldKind::MotExpiry, "01/06/2026", 1.0),
        (FieldKind::Make, "Ford", 1.0),
    ]
}

#[tokio::test]
async fn unanimous_models_ship_automatically() -> Result<()> {
    let config = test_config();
    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering("claude", agreeing_fields()),
        ScriptedModel::answering("gpt4o", agreeing_fields()),
        ScriptedModel::answering("gemini", agreeing_fields()),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Found(matching_record()));
    let result = pipeline.process(test_image()).await?;

    assert!(!result.requires_manual_review);
    assert_eq!(result.models_used.len(), 3);
    assert!(result.failures.is_empty());
    assert!((result.overall_confidence - 1.0).abs() < f64::EPSILON);

    let reg = &result.per_field[&FieldKind::Registration];
    assert!((reg.agreement_level - 1.0).abs() < f64::EPSILON);
    assert!((reg.aggregated_confidence - 1.0).abs() < f64::EPSILON);
    assert!(result.validation.is_consistent);
    assert!(result.error.is_none());
    Ok(())
}

#[tokio::test]
async fn too_few_successful_models_fails_the_request() {
    let config = test_config();
    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering("claude", agreeing_fields()),
        ScriptedModel::failing("gpt4o"),
        ScriptedModel::failing("gemini"),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Unreachable);
    let error = pipeline.process(test_image()).await.unwrap_err();

    assert!(matches!(
        error,
        ExtractError::InsufficientModels {
            got: 1,
            required: 2
        }
    ));
}

#[tokio::test]
async fn timed_out_models_degrade_gracefully() -> Result<()> {
    let config = test_config();
    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering("claude", agreeing_fields()),
        ScriptedModel::answering("gpt4o", agreeing_fields()),
        ScriptedModel::stalled("gemini", Duration::from_secs(10)),
        ScriptedModel::stalled("florence", Duration::from_secs(10)),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Found(matching_record()));
    let result = pipeline.process(test_image()).await?;

    // Agreement is computed over the two respondents only.
    let reg = &result.per_field[&FieldKind::Registration];
    assert!((reg.agreement_level - 1.0).abs() < f64::EPSILON);
    assert_eq!(result.models_used.len(), 2);
    assert_eq!(result.failures.len(), 2);
    assert!(result
        .failures
        .iter()
        .all(|f| f.kind == motscan::common::types::FailureKind::Timeout));
    Ok(())
}

#[tokio::test]
async fn registry_mismatch_forces_manual_review() -> Result<()> {
    let config = test_config();
    let mut record = matching_record();
    record.make = Some("VAUXHALL".to_string());

    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering("claude", agreeing_fields()),
        ScriptedModel::answering("gpt4o", agreeing_fields()),
        ScriptedModel::answering("gemini", agreeing_fields()),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Found(record));
    let result = pipeline.process(test_image()).await?;

    // Even at confidence 1.0 a registry mismatch routes to a human.
    assert!(result.requires_manual_review);
    assert!(!result.validation.is_consistent);
    assert!(!result.validation.unavailable);
    assert!(result.validation.mismatches.contains(&FieldKind::Make));
    Ok(())
}

#[tokio::test]
async fn unreachable_registry_is_not_an_inconsistency() -> Result<()> {
    let config = test_config();
    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering("claude", agreeing_fields()),
        ScriptedModel::answering("gpt4o", agreeing_fields()),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Unreachable);
    let result = pipeline.process(test_image()).await?;

    assert!(result.validation.unavailable);
    assert!(result.validation.is_consistent);
    // Review is driven by confidence and agreement alone here.
    assert!(!result.requires_manual_review);
    Ok(())
}

#[tokio::test]
async fn registry_not_found_flags_review() -> Result<()> {
    let config = test_config();
    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering("claude", agreeing_fields()),
        ScriptedModel::answering("gpt4o", agreeing_fields()),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::NotFound);
    let result = pipeline.process(test_image()).await?;

    assert!(!result.validation.is_consistent);
    assert!(!result.validation.unavailable);
    assert!(result.requires_manual_review);
    Ok(())
}

#[tokio::test]
async fn disagreeing_models_lower_confidence_and_flag_review() -> Result<()> {
    let config = test_config();
    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering(
            "claude",
            vec![
                (FieldKind::Registration, "AB12 CDE", 0.95),
                (FieldKind::MotExpiry, "01/06/2026", 0.6),
            ],
        ),
        ScriptedModel::answering(
            "gpt4o",
            vec![
                (FieldKind::Registration, "AB12 CDE", 0.90),
                (FieldKind::MotExpiry, "07/06/2026", 0.6),
            ],
        ),
        ScriptedModel::answering(
            "gemini",
            vec![
                (FieldKind::Registration, "AB12 COE", 0.85),
                (FieldKind::MotExpiry, "01/06/2025", 0.6),
            ],
        ),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Found(matching_record()));
    let result = pipeline.process(test_image()).await?;

    // The majority registration wins, but the scattered expiry dates cap
    // confidence and trip the review gate.
    let reg = &result.per_field[&FieldKind::Registration];
    assert_eq!(reg.winning_value, "AB12 CDE");
    assert!(reg.dissenting_models.contains("gemini"));

    let expiry = &result.per_field[&FieldKind::MotExpiry];
    assert!(expiry.aggregated_confidence <= 0.5);
    assert_eq!(expiry.value_spread, 3);
    assert!(result.requires_manual_review);
    Ok(())
}

#[tokio::test]
async fn request_deadline_bounds_end_to_end_latency() {
    let mut config = test_config();
    config.ensemble.request_timeout_secs = 1;
    config.ensemble.per_call_timeout_secs = 30;
    config.ensemble.overall_timeout_secs = 30;

    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::stalled("claude", Duration::from_secs(10)),
        ScriptedModel::stalled("gpt4o", Duration::from_secs(10)),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Unreachable);
    let error = pipeline.process(test_image()).await.unwrap_err();
    assert!(matches!(error, ExtractError::RequestTimeout));
}

#[tokio::test]
async fn results_persist_under_the_image_digest() -> Result<()> {
    let config = test_config();
    let clients: Vec<Arc<dyn VisionModel>> = vec![
        ScriptedModel::answering("claude", agreeing_fields()),
        ScriptedModel::answering("gpt4o", agreeing_fields()),
    ];

    let pipeline = pipeline(&config, clients, ScriptedRegistry::Found(matching_record()));
    let image = test_image();
    let digest = image.digest();
    let result = pipeline.process(image).await?;
    assert_eq!(result.image_digest, digest);

    let temp = tempfile::tempdir()?;
    let path = motscan::storage::write_result(temp.path(), &digest, &result)?;
    let written: serde_json::Value = serde_json::from_slice(&std::fs::read(path)?)?;
    assert_eq!(written["image_digest"], digest.as_str());
    assert_eq!(written["requires_manual_review"], false);
    Ok(())
}
