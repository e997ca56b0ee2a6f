use crate::common::types::FieldKind;
use crate::config::ReviewConfig;
use crate::pipeline::consensus::ConsensusResult;
use crate::pipeline::cross_validate::ValidationResult;
use serde::Serialize;
use std::collections::BTreeMap;

/// Why a result was routed to a human.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    LowOverallConfidence {
        overall: f64,
        threshold: f64,
    },
    MissingRequiredField {
        field: FieldKind,
    },
    RegistryInconsistent {
        mismatches: Vec<FieldKind>,
    },
    LowAgreement {
        field: FieldKind,
        agreement_level: f64,
        threshold: f64,
    },
    /// Models scattered across too many distinct values; the screenshot is
    /// probably noisy.
    NoisyField {
        field: FieldKind,
        value_spread: usize,
        max_value_spread: usize,
    },
    NothingExtracted,
}

/// The final accept / manual-review verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewDecision {
    pub overall_confidence: f64,
    pub requires_manual_review: bool,
    pub reasons: Vec<ReviewReason>,
}

/// Applies the configured thresholds to consensus and cross-validation
/// outputs. A pure function of its inputs: no I/O, cannot fail, and always
/// returns a decision. Incomplete or ambiguous input flags review.
pub struct ReviewPolicy {
    config: ReviewConfig,
}

impl ReviewPolicy {
    pub fn new(config: &ReviewConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn decide(
        &self,
        per_field: &BTreeMap<FieldKind, ConsensusResult>,
        validation: &ValidationResult,
    ) -> ReviewDecision {
        let mut reasons = Vec::new();

        if per_field.is_empty() {
            reasons.push(ReviewReason::NothingExtracted);
        }

        let overall_confidence = self.overall_confidence(per_field);
        let threshold = self.config.effective_min_confidence();
        if overall_confidence < threshold {
            reasons.push(ReviewReason::LowOverallConfidence {
                overall: overall_confidence,
                threshold,
            });
        }

        for field in &self.config.required_fields {
            if !per_field.contains_key(field) {
                reasons.push(ReviewReason::MissingRequiredField { field: *field });
            }
        }

        if !validation.unavailable && !validation.is_consistent {
            reasons.push(ReviewReason::RegistryInconsistent {
                mismatches: validation.mismatches.clone(),
            });
        }

        for (field, consensus) in per_field {
            if consensus.agreement_level < self.config.min_agreement_level {
                reasons.push(ReviewReason::LowAgreement {
                    field: *field,
                    agreement_level: consensus.agreement_level,
                    threshold: self.config.min_agreement_level,
                });
            }
            if consensus.value_spread > self.config.max_value_spread {
                reasons.push(ReviewReason::NoisyField {
                    field: *field,
                    value_spread: consensus.value_spread,
                    max_value_spread: self.config.max_value_spread,
                });
            }
        }

        ReviewDecision {
            overall_confidence,
            requires_manual_review: !reasons.is_empty(),
            reasons,
        }
    }

    /// Importance-weighted average over the required fields; a required
    /// field that was not extracted contributes zero.
    fn overall_confidence(&self, per_field: &BTreeMap<FieldKind, ConsensusResult>) -> f64 {
        let fields: &[FieldKind] = if self.config.required_fields.is_empty() {
            &FieldKind::ALL
        } else {
            &self.config.required_fields
        };

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for field in fields {
            let importance = self.config.importance_of(*field);
            total_weight += importance;
            if let Some(consensus) = per_field.get(field) {
                weighted_sum += importance * consensus.aggregated_confidence;
            }
        }

        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn consensus(field: FieldKind, confidence: f64, agreement: f64) -> ConsensusResult {
        ConsensusResult {
            field,
            winning_value: "value".to_string(),
            aggregated_confidence: confidence,
            agreement_level: agreement,
            contributing_models: BTreeSet::new(),
            dissenting_models: BTreeSet::new(),
            value_spread: 1,
        }
    }

    fn good_fields() -> BTreeMap<FieldKind, ConsensusResult> {
        let mut per_field = BTreeMap::new();
        per_field.insert(
            FieldKind::Registration,
            consensus(FieldKind::Registration, 0.95, 1.0),
        );
        per_field.insert(
            FieldKind::MotExpiry,
            consensus(FieldKind::MotExpiry, 0.92, 1.0),
        );
        per_field
    }

    fn consistent() -> ValidationResult {
        ValidationResult {
            is_consistent: true,
            record: None,
            unavailable: false,
            mismatches: Vec::new(),
        }
    }

    #[test]
    fn clean_extraction_ships_automatically() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let decision = policy.decide(&good_fields(), &consistent());
        assert!(!decision.requires_manual_review);
        assert!(decision.reasons.is_empty());
        assert!(decision.overall_confidence > 0.9);
    }

    #[test]
    fn low_overall_confidence_flags_review() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let mut per_field = good_fields();
        per_field.insert(
            FieldKind::MotExpiry,
            consensus(FieldKind::MotExpiry, 0.4, 1.0),
        );

        let decision = policy.decide(&per_field, &consistent());
        assert!(decision.requires_manual_review);
        assert!(decision
            .reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::LowOverallConfidence { .. })));
    }

    #[test]
    fn missing_required_field_flags_review() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let mut per_field = good_fields();
        per_field.remove(&FieldKind::MotExpiry);

        let decision = policy.decide(&per_field, &consistent());
        assert!(decision.requires_manual_review);
        assert!(decision.reasons.contains(&ReviewReason::MissingRequiredField {
            field: FieldKind::MotExpiry
        }));
    }

    #[test]
    fn registry_mismatch_overrides_high_confidence() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let validation = ValidationResult {
            is_consistent: false,
            record: None,
            unavailable: false,
            mismatches: vec![FieldKind::Make],
        };

        let decision = policy.decide(&good_fields(), &validation);
        assert!(decision.requires_manual_review);
        assert!(decision
            .reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::RegistryInconsistent { .. })));
    }

    #[test]
    fn unavailable_registry_does_not_flag_on_its_own() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let decision = policy.decide(&good_fields(), &ValidationResult::unavailable());
        assert!(!decision.requires_manual_review);
    }

    #[test]
    fn low_agreement_flags_review() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let mut per_field = good_fields();
        per_field.insert(
            FieldKind::Registration,
            consensus(FieldKind::Registration, 0.95, 0.25),
        );

        let decision = policy.decide(&per_field, &consistent());
        assert!(decision.requires_manual_review);
        assert!(decision
            .reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::LowAgreement { field: FieldKind::Registration, .. })));
    }

    #[test]
    fn scattered_values_flag_a_noisy_screenshot() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let mut per_field = good_fields();
        let mut noisy = consensus(FieldKind::Registration, 0.95, 1.0);
        noisy.value_spread = 4;
        per_field.insert(FieldKind::Registration, noisy);

        let decision = policy.decide(&per_field, &consistent());
        assert!(decision.requires_manual_review);
        assert!(decision
            .reasons
            .iter()
            .any(|r| matches!(r, ReviewReason::NoisyField { .. })));
    }

    #[test]
    fn empty_extraction_is_conservatively_flagged() {
        let policy = ReviewPolicy::new(&ReviewConfig::default());
        let decision = policy.decide(&BTreeMap::new(), &ValidationResult::unavailable());
        assert!(decision.requires_manual_review);
        assert_eq!(decision.overall_confidence, 0.0);
        assert!(decision.reasons.contains(&ReviewReason::NothingExtracted));
    }

    #[test]
    fn strict_mode_tightens_the_gate() {
        let mut config = ReviewConfig::default();
        config.strict_mode = true;
        let policy = ReviewPolicy::new(&config);

        let mut per_field = good_fields();
        per_field.insert(
            FieldKind::Registration,
            consensus(FieldKind::Registration, 0.87, 1.0),
        );
        per_field.insert(
            FieldKind::MotExpiry,
            consensus(FieldKind::MotExpiry, 0.87, 1.0),
        );

        let decision = policy.decide(&per_field, &consistent());
        // 0.87 passes the default 0.85 gate but not the strict 0.90 gate.
        assert!(decision.requires_manual_review);
    }
}
