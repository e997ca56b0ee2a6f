use crate::common::error::ExtractError;
use crate::common::types::{ImagePayload, RegistryLookup, VehicleRecord, VehicleRegistry};
use crate::config::Config;
use crate::pipeline::{ExtractionPipeline, ExtractionResult, RequestErrorKind};
use crate::validation::registration::{self, RegistrationCheck};
use crate::{metrics, storage};
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Json as AxumJson, Router,
};
use base64::Engine;
use hyper::Server;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

/// Shared state handed to every handler.
pub struct AppState {
    pub pipeline: ExtractionPipeline,
    pub registry: Arc<dyn VehicleRegistry>,
    pub config: Config,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    /// Base64-encoded screenshot bytes.
    pub image_base64: String,
    /// Defaults to JPEG, the common garage-software export.
    pub media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub registration: String,
    /// Also consult the DVLA, not just the offline format check.
    #[serde(default)]
    pub lookup: bool,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub registration: String,
    pub check: RegistrationCheck,
    pub registry_record: Option<VehicleRecord>,
    pub registry_unavailable: bool,
}

/// Health check endpoint
async fn health(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "motscan",
        "version": env!("CARGO_PKG_VERSION"),
        "models_available": state.pipeline.models_available(),
    }))
}

/// Run one screenshot through the full pipeline.
///
/// Degraded outcomes (too few models, request deadline) still answer 200
/// with a structured result flagged for manual review; only malformed
/// requests and internal faults map to error statuses.
async fn extract(
    Extension(state): Extension<Arc<AppState>>,
    AxumJson(request): AxumJson<ExtractRequest>,
) -> axum::response::Response {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(&request.image_base64) {
        Ok(bytes) => bytes,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid base64 image: {e}"))
                .into_response();
        }
    };

    if bytes.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty image".to_string()).into_response();
    }
    if bytes.len() > state.config.server.max_upload_bytes {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "image exceeds maximum size of {} bytes",
                state.config.server.max_upload_bytes
            ),
        )
            .into_response();
    }

    let media_type = request
        .media_type
        .unwrap_or_else(|| "image/jpeg".to_string());
    let image = ImagePayload::new(bytes, media_type);
    let digest = image.digest();

    let result = match state.pipeline.process(image).await {
        Ok(result) => result,
        Err(ExtractError::InsufficientModels { .. }) => ExtractionResult::failure(
            RequestErrorKind::InsufficientModels,
            digest.clone(),
            Duration::ZERO,
        ),
        Err(ExtractError::RequestTimeout) => ExtractionResult::failure(
            RequestErrorKind::RequestTimeout,
            digest.clone(),
            Duration::ZERO,
        ),
        Err(e) => {
            error!(error = %e, "extraction request failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let results_dir = Path::new(&state.config.storage.results_dir);
    if let Err(e) = storage::write_result(results_dir, &digest, &result) {
        warn!(error = %e, "failed to persist extraction result");
    }

    Json(result).into_response()
}

/// Validate a UK registration, offline and optionally against the DVLA.
async fn validate_registration(
    Extension(state): Extension<Arc<AppState>>,
    AxumJson(request): AxumJson<ValidateRequest>,
) -> impl IntoResponse {
    let check = registration::check(&request.registration);

    let mut registry_record = None;
    let mut registry_unavailable = false;
    if request.lookup && check.is_valid {
        match state.registry.lookup(&check.normalized).await {
            Ok(RegistryLookup::Found(record)) => registry_record = Some(record),
            Ok(RegistryLookup::NotFound) => {}
            Err(e) => {
                warn!(error = %e, "registry lookup failed during validation");
                registry_unavailable = true;
            }
        }
    }

    Json(ValidateResponse {
        registration: request.registration,
        check,
        registry_record,
        registry_unavailable,
    })
}

/// Create the HTTP server with all routes.
pub fn create_server(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract))
        .route("/validate-registration", post(validate_registration))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the configured address.
pub async fn start_server(state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error>> {
    metrics::init_metrics();

    let host: std::net::IpAddr = state.config.server.host.parse()?;
    let addr = SocketAddr::from((host, state.config.server.port));
    let app = create_server(state);

    tracing::info!("HTTP server running on http://{addr}");
    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
