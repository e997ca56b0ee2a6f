use crate::common::types::{FieldKind, ModelResponse};
use crate::config::{EnsembleConfig, ModelsConfig};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// The reconciled answer for one field.
///
/// Invariants: `contributing_models` and `dissenting_models` are disjoint;
/// both confidence figures are recomputed from the response set on every
/// call, never carried over.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusResult {
    pub field: FieldKind,
    pub winning_value: String,
    pub aggregated_confidence: f64,
    pub agreement_level: f64,
    pub contributing_models: BTreeSet<String>,
    pub dissenting_models: BTreeSet<String>,
    /// Distinct normalized values observed for this field across all models.
    pub value_spread: usize,
}

/// Weighted-vote reconciliation of model responses into one answer per
/// field. Pure and deterministic: no I/O, no hidden state.
pub struct ConsensusEngine {
    minimum_model_agreement: usize,
    single_agreement_ceiling: f64,
    min_candidate_confidence: f64,
    models: ModelsConfig,
}

#[derive(Debug, Default)]
struct ValueGroup {
    /// Σ model_weight × candidate confidence over contributing candidates.
    support: f64,
    /// Highest single candidate confidence in the group (first tie-break).
    best_confidence: f64,
    /// Original text of the highest-confidence candidate, reported as the
    /// winning value so callers see what a model actually read.
    best_value: String,
    /// Best static priority rank in the group (second tie-break).
    best_rank: usize,
    models: BTreeSet<String>,
}

impl ConsensusEngine {
    pub fn new(ensemble: &EnsembleConfig, models: &ModelsConfig) -> Self {
        Self {
            minimum_model_agreement: ensemble.minimum_model_agreement,
            single_agreement_ceiling: ensemble.single_agreement_ceiling,
            min_candidate_confidence: ensemble.min_candidate_confidence,
            models: models.clone(),
        }
    }

    /// Reconcile all responses into per-field consensus. Fields no model
    /// extracted are absent from the result map.
    pub fn reconcile(&self, responses: &[ModelResponse]) -> BTreeMap<FieldKind, ConsensusResult> {
        let mut result = BTreeMap::new();
        for field in FieldKind::ALL {
            if let Some(consensus) = self.reconcile_field(field, responses) {
                result.insert(field, consensus);
            }
        }
        result
    }

    fn reconcile_field(
        &self,
        field: FieldKind,
        responses: &[ModelResponse],
    ) -> Option<ConsensusResult> {
        // Group candidates by normalized value; BTreeMap keeps iteration
        // order independent of response arrival order.
        let mut groups: BTreeMap<String, ValueGroup> = BTreeMap::new();
        let mut responders: BTreeSet<String> = BTreeSet::new();

        for response in responses {
            for candidate in response.candidates.iter().filter(|c| c.field == field) {
                if candidate.confidence <= self.min_candidate_confidence {
                    continue;
                }
                let key = field.normalize(&candidate.value);
                if key.is_empty() {
                    continue;
                }
                responders.insert(response.model_name.clone());

                let rank = self.models.priority_rank(&response.model_name);
                let group = groups.entry(key).or_insert_with(|| ValueGroup {
                    best_rank: usize::MAX,
                    ..ValueGroup::default()
                });
                group.support += response.weight * candidate.confidence;
                group.models.insert(response.model_name.clone());
                match candidate
                    .confidence
                    .partial_cmp(&group.best_confidence)
                    .unwrap_or(Ordering::Equal)
                {
                    Ordering::Greater => {
                        group.best_confidence = candidate.confidence;
                        group.best_value = candidate.value.clone();
                        group.best_rank = rank;
                    }
                    Ordering::Equal if rank < group.best_rank => {
                        group.best_value = candidate.value.clone();
                        group.best_rank = rank;
                    }
                    _ => {}
                }
            }
        }

        let total_support: f64 = groups.values().map(|g| g.support).sum();
        let group = Self::pick_winner(&groups)?;

        let mut aggregated_confidence = if total_support > 0.0 {
            group.support / total_support
        } else {
            0.0
        };

        // A value backed by fewer models than the agreement minimum is never
        // trusted as high confidence while other models disagreed.
        if group.models.len() < self.minimum_model_agreement && responders.len() > 1 {
            aggregated_confidence = aggregated_confidence.min(self.single_agreement_ceiling);
        }

        let agreement_level = group.models.len() as f64 / responders.len() as f64;
        let dissenting_models: BTreeSet<String> =
            responders.difference(&group.models).cloned().collect();

        Some(ConsensusResult {
            field,
            winning_value: group.best_value.clone(),
            aggregated_confidence,
            agreement_level,
            contributing_models: group.models.clone(),
            dissenting_models,
            value_spread: groups.len(),
        })
    }

    /// Highest support wins; ties break on the best single candidate
    /// confidence, then on static model priority. None iff no groups exist.
    fn pick_winner(groups: &BTreeMap<String, ValueGroup>) -> Option<&ValueGroup> {
        let mut best: Option<&ValueGroup> = None;
        for group in groups.values() {
            best = match best {
                None => Some(group),
                Some(best_group) => {
                    let ordering = group
                        .support
                        .partial_cmp(&best_group.support)
                        .unwrap_or(Ordering::Equal)
                        .then(
                            group
                                .best_confidence
                                .partial_cmp(&best_group.best_confidence)
                                .unwrap_or(Ordering::Equal),
                        )
                        .then(best_group.best_rank.cmp(&group.best_rank));
                    if ordering == Ordering::Greater {
                        Some(group)
                    } else {
                        Some(best_group)
                    }
                }
            };
        }
        best
    }
}
