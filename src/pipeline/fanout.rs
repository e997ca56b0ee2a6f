use crate::common::error::{ExtractError, Result};
use crate::common::types::{FailureKind, ImagePayload, ModelFailure, ModelResponse, VisionModel};
use crate::config::{EnsembleConfig, ModelsConfig};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

/// Everything the fan-out settled on: the successful responses in arrival
/// order plus one failure entry per model that produced nothing.
#[derive(Debug)]
pub struct FanOutOutcome {
    pub responses: Vec<ModelResponse>,
    pub failures: Vec<ModelFailure>,
}

/// Issues one extraction call per backend, all started concurrently, each
/// isolated from its siblings' failures.
pub struct FanOutInvoker {
    per_call_timeout: Duration,
    overall_timeout: Duration,
    min_required_successes: usize,
    models: ModelsConfig,
}

impl FanOutInvoker {
    pub fn new(ensemble: &EnsembleConfig, models: &ModelsConfig) -> Self {
        Self {
            per_call_timeout: ensemble.per_call_timeout(),
            overall_timeout: ensemble.overall_timeout(),
            min_required_successes: ensemble.min_required_successes,
            models: models.clone(),
        }
    }

    /// Run the fan-out. Completes when every call has settled or the overall
    /// deadline fires, whichever is first; calls still outstanding at the
    /// deadline are aborted and recorded as timeouts.
    ///
    /// The only hard failure here is `InsufficientModels`.
    pub async fn invoke(
        &self,
        image: Arc<ImagePayload>,
        clients: &[Arc<dyn VisionModel>],
    ) -> Result<FanOutOutcome> {
        let mut join_set = JoinSet::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();

        for client in clients {
            let name = client.model_name().to_string();
            pending.insert(name.clone());
            let client = Arc::clone(client);
            let image = Arc::clone(&image);
            let per_call = self.per_call_timeout;
            join_set.spawn(async move {
                let result = timeout(per_call, client.extract(&image)).await;
                (name, result)
            });
        }

        let deadline = Instant::now() + self.overall_timeout;
        let mut responses = Vec::new();
        let mut failures = Vec::new();

        while !join_set.is_empty() {
            match timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((name, result)))) => {
                    pending.remove(&name);
                    match result {
                        Ok(Ok(extraction)) => {
                            debug!(model = %name, candidates = extraction.candidates.len(),
                                "model response received");
                            responses.push(ModelResponse {
                                weight: self.models.weight_for(&name),
                                model_name: name,
                                candidates: extraction.candidates,
                                software_detected: extraction.software_detected,
                                received_at: Utc::now(),
                            });
                        }
                        Ok(Err(e)) => {
                            let kind = match &e {
                                ExtractError::MalformedResponse { .. } => {
                                    FailureKind::MalformedResponse
                                }
                                _ => FailureKind::Transport,
                            };
                            warn!(model = %name, error = %e, "model call failed");
                            metrics::counter!("motscan_model_failures_total", "model" => name.clone())
                                .increment(1);
                            failures.push(ModelFailure {
                                model_name: name,
                                kind,
                                message: e.to_string(),
                            });
                        }
                        Err(_) => {
                            warn!(model = %name, "model call exceeded per-call timeout");
                            metrics::counter!("motscan_model_failures_total", "model" => name.clone())
                                .increment(1);
                            failures.push(ModelFailure {
                                model_name: name,
                                kind: FailureKind::Timeout,
                                message: format!(
                                    "no response within {}s",
                                    self.per_call_timeout.as_secs()
                                ),
                            });
                        }
                    }
                }
                Ok(Some(Err(join_err))) => {
                    // Task panicked or was aborted; its name stays in
                    // `pending` and is swept below.
                    warn!(error = %join_err, "model task did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(outstanding = pending.len(), "overall fan-out deadline reached");
                    break;
                }
            }
        }

        // Best-effort cancellation of anything still running.
        join_set.abort_all();

        for name in pending {
            metrics::counter!("motscan_model_failures_total", "model" => name.clone()).increment(1);
            failures.push(ModelFailure {
                model_name: name,
                kind: FailureKind::Timeout,
                message: "call did not settle before the overall deadline".to_string(),
            });
        }

        if responses.len() < self.min_required_successes {
            return Err(ExtractError::InsufficientModels {
                got: responses.len(),
                required: self.min_required_successes,
            });
        }

        Ok(FanOutOutcome {
            responses,
            failures,
        })
    }
}
