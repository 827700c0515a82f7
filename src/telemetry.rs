//! Telemetry and structured logging for the export worker.

use crate::job::{ExportJob, JobStatus};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TRACER_NAME: &str = "snapstep-export-worker";

/// Jobs slower than this are logged as a warning.
const SLOW_JOB_THRESHOLD_MS: i64 = 30_000;

/// Installs the global tracing subscriber: `RUST_LOG` filter (default `info`) and
/// the fmt layer.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Records telemetry for a completed or failed job.
///
/// Emits an `export_job` span carrying the job identity, outcome and duration, and
/// the matching structured log lines.
pub fn record_job_telemetry(job: &ExportJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("export_job");

    span.set_attribute(KeyValue::new("job_id", job.job_id.clone()));
    span.set_attribute(KeyValue::new("guide_id", job.guide_id));
    span.set_attribute(KeyValue::new("tenant_id", job.tenant_id));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));
    span.set_attribute(KeyValue::new("format", job.format.clone()));

    if let Some(duration_ms) = job.processing_duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            job_id = %job.job_id,
            guide_id = job.guide_id,
            duration_ms = duration_ms,
            status = %job.status,
            "Export job finished"
        );

        if duration_ms > SLOW_JOB_THRESHOLD_MS {
            warn!(
                job_id = %job.job_id,
                duration_ms = duration_ms,
                "Export exceeded performance threshold ({}ms)",
                SLOW_JOB_THRESHOLD_MS
            );
        }
    }

    match (job.status, &job.output_key, &job.error_message) {
        (JobStatus::Completed, Some(key), _) => {
            span.set_attribute(KeyValue::new("output_key", key.clone()));
        }
        (JobStatus::Failed, _, Some(error)) => {
            span.set_attribute(KeyValue::new("error", error.clone()));
            warn!(
                job_id = %job.job_id,
                guide_id = job.guide_id,
                error = %error,
                "Export job failed"
            );
        }
        _ => {}
    }

    span.end();
}

/// Records one poll of the job store.
///
/// # Arguments
///
/// * `pending_found` - Number of pending jobs returned by the poll
pub fn record_worker_heartbeat(pending_found: usize) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("worker_heartbeat");

    span.set_attribute(KeyValue::new("pending_found", pending_found as i64));
    span.end();

    tracing::debug!(pending_found = pending_found, "Worker heartbeat");
}

/// Initializes OpenTelemetry with OTLP exporter.
///
/// Call once at worker startup, inside the tokio runtime. Reads configuration
/// from environment variables:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - Collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - Service name (default: snapstep-export-worker)
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    global::set_tracer_provider(tracer.provider().ok_or("OTLP tracer has no provider")?);

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}
