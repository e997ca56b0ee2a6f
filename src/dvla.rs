use crate::common::constants::DVLA_API_KEY_ENV;
use crate::common::error::{ExtractError, Result};
use crate::common::types::{RegistryLookup, VehicleRecord, VehicleRegistry};
use crate::config::DvlaConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

/// Client for the DVLA Vehicle Enquiry Service.
///
/// A missing API key is tolerated at construction; every lookup then reports
/// the registry as unavailable so extraction degrades instead of failing.
pub struct DvlaClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnquiryRequest<'a> {
    registration_number: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnquiryResponse {
    registration_number: Option<String>,
    make: Option<String>,
    model: Option<String>,
    colour: Option<String>,
    fuel_type: Option<String>,
    mot_status: Option<String>,
    mot_expiry_date: Option<String>,
    tax_status: Option<String>,
    year_of_manufacture: Option<i32>,
}

impl DvlaClient {
    pub fn from_config(config: &DvlaConfig) -> Self {
        let api_key = std::env::var(DVLA_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("DVLA_API_KEY not set; registry cross-validation will be skipped");
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
        }
    }

    fn parse_record(response: EnquiryResponse, registration: &str) -> VehicleRecord {
        let mot_expiry_date = response
            .mot_expiry_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

        VehicleRecord {
            registration: response
                .registration_number
                .unwrap_or_else(|| registration.to_string()),
            make: response.make,
            model: response.model,
            colour: response.colour,
            fuel_type: response.fuel_type,
            mot_status: response.mot_status,
            mot_expiry_date,
            tax_status: response.tax_status,
            year_of_manufacture: response.year_of_manufacture,
        }
    }
}

#[async_trait::async_trait]
impl VehicleRegistry for DvlaClient {
    #[instrument(skip(self))]
    async fn lookup(&self, registration: &str) -> Result<RegistryLookup> {
        let Some(api_key) = &self.api_key else {
            return Err(ExtractError::ValidationUnavailable(
                "DVLA API key not configured".to_string(),
            ));
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .json(&EnquiryRequest {
                registration_number: registration,
            })
            .send()
            .await
            .map_err(|e| ExtractError::ValidationUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(RegistryLookup::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ValidationUnavailable(format!(
                "DVLA API returned {status}: {body}"
            )));
        }

        let body: EnquiryResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::ValidationUnavailable(e.to_string()))?;

        Ok(RegistryLookup::Found(Self::parse_record(body, registration)))
    }
}
