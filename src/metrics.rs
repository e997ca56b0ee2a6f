use metrics::{describe_counter, describe_histogram};
use std::net::SocketAddr;
use std::sync::Once;

static DESCRIBE: Once = Once::new();

/// Install the Prometheus exporter and register metric descriptions.
/// Called once in serve mode; CLI runs skip it and metric calls become
/// no-ops against the default recorder.
pub fn init_metrics() {
    let port: u16 = std::env::var("MOTSCAN_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            tracing::info!("Prometheus exporter listening on http://{addr}/metrics");
        }
        Err(e) => {
            tracing::warn!("Prometheus exporter install failed (possibly already installed): {e}");
        }
    }

    describe_metrics();
}

fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "motscan_requests_total",
            "Extraction requests admitted to the pipeline"
        );
        describe_counter!(
            "motscan_manual_review_total",
            "Requests whose result was flagged for manual review"
        );
        describe_counter!(
            "motscan_model_failures_total",
            "Model calls that produced no usable response, by model"
        );
        describe_counter!(
            "motscan_registry_unavailable_total",
            "Registry lookups that could not be completed"
        );
        describe_histogram!(
            "motscan_request_duration_seconds",
            "End-to-end extraction latency including cross-validation"
        );
        describe_histogram!(
            "motscan_overall_confidence",
            "Overall confidence of finalized extraction results"
        );
    });
}
