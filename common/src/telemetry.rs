// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::TriggerType;

const SERVICE_NAME: &str = "flow-triggers";

/// Initialize structured logging with JSON formatting and trace context
///
/// Log levels come from `RUST_LOG` when set, otherwise from `log_level`.
/// When `tracing_endpoint` is provided spans are also exported over OTLP.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus recorder and describe the trigger metrics.
///
/// The returned handle renders the scrape body served at `GET /metrics`.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!(
        "trigger_fired_total",
        "Total number of trigger firings that started a flow execution"
    );
    describe_counter!(
        "trigger_failed_total",
        "Total number of trigger firings that failed"
    );
    describe_histogram!(
        "trigger_execution_duration_seconds",
        "Wall-clock duration of trigger firings in seconds"
    );
    describe_gauge!("triggers_armed", "Number of triggers currently armed");

    tracing::info!("Prometheus metrics recorder installed");

    Ok(handle)
}

#[inline]
pub fn record_trigger_fired(trigger_type: TriggerType) {
    counter!("trigger_fired_total", "trigger_type" => trigger_type.as_str()).increment(1);
}

#[inline]
pub fn record_trigger_failure(trigger_type: TriggerType, reason: &'static str) {
    counter!(
        "trigger_failed_total",
        "trigger_type" => trigger_type.as_str(),
        "reason" => reason
    )
    .increment(1);
}

#[inline]
pub fn record_execution_duration(trigger_type: TriggerType, duration_seconds: f64) {
    histogram!(
        "trigger_execution_duration_seconds",
        "trigger_type" => trigger_type.as_str()
    )
    .record(duration_seconds);
}

#[inline]
pub fn update_armed_triggers(count: usize) {
    gauge!("triggers_armed").set(count as f64);
}
