// Extraction pipeline: fan-out, consensus, cross-validation, review.
// Each stage owns and fully consumes the previous stage's output; nothing
// is mutated after creation.

pub mod consensus;
pub mod cross_validate;
pub mod fanout;
pub mod review;

use crate::common::error::{ExtractError, Result};
use crate::common::types::{
    FieldKind, ImagePayload, ModelFailure, ModelResponse, VehicleRegistry, VisionModel,
};
use crate::config::Config;
use crate::pipeline::consensus::{ConsensusEngine, ConsensusResult};
use crate::pipeline::cross_validate::{CrossValidator, ValidationResult};
use crate::pipeline::fanout::FanOutInvoker;
use crate::pipeline::review::{ReviewPolicy, ReviewReason};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tracing::{info, instrument};
use uuid::Uuid;

/// Request-level failure kinds surfaced on the terminal artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestErrorKind {
    InsufficientModels,
    RequestTimeout,
}

/// Terminal artifact of one extraction request. Created once per request,
/// never mutated after finalization.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub request_id: Uuid,
    pub per_field: BTreeMap<FieldKind, ConsensusResult>,
    pub overall_confidence: f64,
    pub requires_manual_review: bool,
    pub review_reasons: Vec<ReviewReason>,
    pub validation: ValidationResult,
    /// Models that contributed a response, in arrival order.
    pub models_used: Vec<String>,
    pub failures: Vec<ModelFailure>,
    pub software_detected: Option<String>,
    pub image_digest: String,
    pub processing_time_ms: u64,
    pub error: Option<RequestErrorKind>,
}

impl ExtractionResult {
    /// Structured stand-in for a request that could not produce a result;
    /// always flagged for manual review.
    pub fn failure(kind: RequestErrorKind, image_digest: String, elapsed: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            per_field: BTreeMap::new(),
            overall_confidence: 0.0,
            requires_manual_review: true,
            review_reasons: Vec::new(),
            validation: ValidationResult::unavailable(),
            models_used: Vec::new(),
            failures: Vec::new(),
            software_detected: None,
            image_digest,
            processing_time_ms: elapsed.as_millis() as u64,
            error: Some(kind),
        }
    }
}

/// The whole engine: fans a screenshot out to every backend, reconciles the
/// answers, cross-checks the registration and decides whether the result
/// ships automatically.
pub struct ExtractionPipeline {
    clients: Vec<Arc<dyn VisionModel>>,
    invoker: FanOutInvoker,
    engine: ConsensusEngine,
    validator: CrossValidator,
    policy: ReviewPolicy,
    /// Process-wide admission control; requests beyond capacity queue here.
    admission: Arc<Semaphore>,
    request_timeout: Duration,
}

impl ExtractionPipeline {
    pub fn new(
        config: &Config,
        clients: Vec<Arc<dyn VisionModel>>,
        registry: Arc<dyn VehicleRegistry>,
    ) -> Self {
        Self {
            clients,
            invoker: FanOutInvoker::new(&config.ensemble, &config.models),
            engine: ConsensusEngine::new(&config.ensemble, &config.models),
            validator: CrossValidator::new(registry),
            policy: ReviewPolicy::new(&config.review),
            admission: Arc::new(Semaphore::new(config.ensemble.max_concurrent_requests)),
            request_timeout: config.ensemble.request_timeout(),
        }
    }

    pub fn models_available(&self) -> usize {
        self.clients.len()
    }

    /// Process one screenshot end to end.
    ///
    /// Per-model and registry failures are absorbed into the result; only
    /// `InsufficientModels` and the request deadline reach the caller.
    #[instrument(skip(self, image), fields(request_id = tracing::field::Empty))]
    pub async fn process(&self, image: ImagePayload) -> Result<ExtractionResult> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| ExtractError::Config("request admission closed".to_string()))?;

        let request_id = Uuid::new_v4();
        tracing::Span::current().record("request_id", tracing::field::display(request_id));
        let started = Instant::now();
        let image_digest = image.digest();
        metrics::counter!("motscan_requests_total").increment(1);

        let staged = timeout(self.request_timeout, self.run_stages(image)).await;
        let elapsed = started.elapsed();
        metrics::histogram!("motscan_request_duration_seconds").record(elapsed.as_secs_f64());

        let (responses, failures, per_field, validation, decision) = match staged {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ExtractError::RequestTimeout),
        };

        if decision.requires_manual_review {
            metrics::counter!("motscan_manual_review_total").increment(1);
        }
        metrics::histogram!("motscan_overall_confidence").record(decision.overall_confidence);

        let software_detected = plurality_software(&responses);
        let models_used: Vec<String> = responses.into_iter().map(|r| r.model_name).collect();

        info!(
            models = models_used.len(),
            fields = per_field.len(),
            overall_confidence = decision.overall_confidence,
            requires_manual_review = decision.requires_manual_review,
            "extraction complete"
        );

        Ok(ExtractionResult {
            request_id,
            per_field,
            overall_confidence: decision.overall_confidence,
            requires_manual_review: decision.requires_manual_review,
            review_reasons: decision.reasons,
            validation,
            models_used,
            failures,
            software_detected,
            image_digest,
            processing_time_ms: elapsed.as_millis() as u64,
            error: None,
        })
    }

    async fn run_stages(
        &self,
        image: ImagePayload,
    ) -> Result<(
        Vec<ModelResponse>,
        Vec<ModelFailure>,
        BTreeMap<FieldKind, ConsensusResult>,
        ValidationResult,
        review::ReviewDecision,
    )> {
        let outcome = self.invoker.invoke(Arc::new(image), &self.clients).await?;
        let per_field = self.engine.reconcile(&outcome.responses);
        let validation = self.validator.validate(&per_field).await;
        let decision = self.policy.decide(&per_field, &validation);
        Ok((
            outcome.responses,
            outcome.failures,
            per_field,
            validation,
            decision,
        ))
    }
}

/// Most common software name across responses; ties resolve alphabetically.
fn plurality_software(responses: &[ModelResponse]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for response in responses {
        if let Some(software) = &response.software_detected {
            *counts.entry(software.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(name, _)| name.to_string())
}
