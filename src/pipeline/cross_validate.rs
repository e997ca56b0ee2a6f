use crate::common::types::{FieldKind, RegistryLookup, VehicleRecord, VehicleRegistry};
use crate::pipeline::consensus::ConsensusResult;
use crate::validation::{dates, registration};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of corroborating the consensus against the vehicle registry.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    /// False only when the registry was reachable and disagreed, or held no
    /// record. Never false merely because the registry was unreachable.
    pub is_consistent: bool,
    pub record: Option<VehicleRecord>,
    pub unavailable: bool,
    pub mismatches: Vec<FieldKind>,
}

impl ValidationResult {
    /// The registry could not be consulted; downstream must treat this as
    /// missing corroboration, not as a mismatch.
    pub fn unavailable() -> Self {
        Self {
            is_consistent: true,
            record: None,
            unavailable: true,
            mismatches: Vec::new(),
        }
    }
}

/// Cross-checks the consensus registration against the external registry
/// and corroborates whatever other fields both sides know.
pub struct CrossValidator {
    registry: Arc<dyn VehicleRegistry>,
}

impl CrossValidator {
    pub fn new(registry: Arc<dyn VehicleRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, consensus))]
    pub async fn validate(
        &self,
        consensus: &BTreeMap<FieldKind, ConsensusResult>,
    ) -> ValidationResult {
        let Some(reg) = consensus.get(&FieldKind::Registration) else {
            debug!("no registration extracted; skipping registry lookup");
            return ValidationResult::unavailable();
        };

        // Raw -> Normalized -> Valid/Invalid; malformed input never reaches
        // the external service.
        let checked = registration::check(&reg.winning_value);
        if !checked.is_valid {
            debug!(registration = %checked.normalized, "registration failed format check; skipping lookup");
            return ValidationResult::unavailable();
        }

        match self.registry.lookup(&checked.normalized).await {
            Ok(RegistryLookup::Found(record)) => {
                let mismatches = corroborate(&record, consensus);
                ValidationResult {
                    is_consistent: mismatches.is_empty(),
                    record: Some(record),
                    unavailable: false,
                    mismatches,
                }
            }
            Ok(RegistryLookup::NotFound) => {
                debug!(registration = %checked.normalized, "registry holds no record");
                ValidationResult {
                    is_consistent: false,
                    record: None,
                    unavailable: false,
                    mismatches: vec![FieldKind::Registration],
                }
            }
            Err(e) => {
                warn!(error = %e, "vehicle registry unreachable");
                metrics::counter!("motscan_registry_unavailable_total").increment(1);
                ValidationResult::unavailable()
            }
        }
    }
}

/// Fields the pipeline can corroborate: make and model by lenient text
/// match, MOT expiry by date equality. Only fields both sides know count.
fn corroborate(
    record: &VehicleRecord,
    consensus: &BTreeMap<FieldKind, ConsensusResult>,
) -> Vec<FieldKind> {
    let mut mismatches = Vec::new();

    if let (Some(extracted), Some(registry_make)) =
        (consensus.get(&FieldKind::Make), record.make.as_deref())
    {
        if !text_matches(&extracted.winning_value, registry_make) {
            mismatches.push(FieldKind::Make);
        }
    }

    if let (Some(extracted), Some(registry_model)) =
        (consensus.get(&FieldKind::Model), record.model.as_deref())
    {
        if !text_matches(&extracted.winning_value, registry_model) {
            mismatches.push(FieldKind::Model);
        }
    }

    if let (Some(extracted), Some(registry_expiry)) = (
        consensus.get(&FieldKind::MotExpiry),
        record.mot_expiry_date,
    ) {
        match dates::parse_mot_date(&extracted.winning_value) {
            Some(date) if date == registry_expiry => {}
            _ => mismatches.push(FieldKind::MotExpiry),
        }
    }

    mismatches
}

/// Case-insensitive containment either way, so "Mercedes" matches the
/// registry's "MERCEDES-BENZ" and vice versa.
fn text_matches(extracted: &str, registry: &str) -> bool {
    let a = extracted.trim().to_uppercase();
    let b = registry.trim().to_uppercase();
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}
